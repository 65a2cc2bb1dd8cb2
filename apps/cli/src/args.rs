//! Command-line argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Browse a repository and transfer single files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Config file (default: platform config dir, seaclient/client.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List a repository directory
    Ls {
        repo: String,
        #[arg(default_value = "/")]
        path: String,
    },

    /// Download one file
    Get {
        repo: String,
        /// Path of the file inside the repository, e.g. /docs/report.pdf
        remote: String,
        /// Commit to download from
        #[arg(long)]
        rev: Option<String>,
        /// Target directory (default: configured download_dir)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Download even if the file cache has a copy
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Upload one file
    Put {
        repo: String,
        /// Target directory inside the repository
        dir: String,
        file: PathBuf,
        /// Remote file name (default: local file name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Write server and token to the config file
    Configure {
        #[arg(long)]
        server: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        download_dir: Option<PathBuf>,
    },
}

/// Splits `/a/b/c.txt` into `("/a/b/", "c.txt")`.
pub fn split_remote(remote: &str) -> Option<(String, String)> {
    let trimmed = remote.trim_end_matches('/');
    let (dir, name) = match trimmed.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", trimmed),
    };
    if name.is_empty() {
        return None;
    }
    Some((format!("{dir}/"), name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_remote_paths() {
        assert_eq!(
            split_remote("/docs/report.pdf"),
            Some(("/docs/".into(), "report.pdf".into()))
        );
        assert_eq!(split_remote("a.txt"), Some(("/".into(), "a.txt".into())));
        assert_eq!(split_remote("/a.txt"), Some(("/".into(), "a.txt".into())));
        assert_eq!(split_remote("/"), None);
    }

    #[test]
    fn parses_get() {
        let args = Args::parse_from(["seaclient", "get", "r1", "/x/y.bin", "--rev", "abc"]);
        match args.command {
            Command::Get { repo, remote, rev, force, .. } => {
                assert_eq!(repo, "r1");
                assert_eq!(remote, "/x/y.bin");
                assert_eq!(rev.as_deref(), Some("abc"));
                assert!(!force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
