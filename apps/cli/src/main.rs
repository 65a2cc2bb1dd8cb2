//! seaclient entry point.

mod args;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::Parser;
use seaclient_api::{ApiClient, Dirent};
use seaclient_file_manager::config::config_path;
use seaclient_file_manager::{ClientConfig, FileCache, TaskEvent, TaskHandle, TransferRegistry};
use tracing_subscriber::EnvFilter;

use crate::args::{Args, Command, split_remote};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config_file = match &args.config {
        Some(path) => path.clone(),
        None => config_path().context("no configuration directory on this platform")?,
    };
    let mut config = ClientConfig::load_from(&config_file)
        .with_context(|| format!("loading {}", config_file.display()))?;
    config.apply_env(|key| std::env::var(key).ok());

    match args.command {
        Command::Configure {
            server,
            token,
            download_dir,
        } => {
            config.server_url = server;
            config.token = token;
            if let Some(dir) = download_dir {
                config.download_dir = dir;
            }
            config.save_to(&config_file)?;
            println!("saved {}", config_file.display());
            Ok(())
        }
        Command::Ls { repo, path } => list(&config, &repo, &path),
        Command::Get {
            repo,
            remote,
            rev,
            out,
            force,
        } => {
            let cache_file = config
                .cache_file
                .clone()
                .unwrap_or_else(|| config_file.with_file_name("files.json"));
            get(&config, &cache_file, &repo, &remote, rev.as_deref(), out, force)
        }
        Command::Put {
            repo,
            dir,
            file,
            name,
        } => put(&config, &repo, &dir, &file, name),
    }
}

fn require_server(config: &ClientConfig) -> anyhow::Result<()> {
    if config.server_url.is_empty() {
        bail!("no server configured; run `seaclient configure` or set SEACLIENT_SERVER");
    }
    Ok(())
}

fn list_dir(config: &ClientConfig, repo: &str, path: &str) -> anyhow::Result<Vec<Dirent>> {
    let client = ApiClient::new(&config.client_options())?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(client.list_dir(repo, path))?)
}

fn list(config: &ClientConfig, repo: &str, path: &str) -> anyhow::Result<()> {
    require_server(config)?;
    for entry in list_dir(config, repo, path)? {
        if entry.is_dir() {
            println!("{:>12}  {}/", "-", entry.name);
        } else {
            println!("{:>12}  {}", entry.size, entry.name);
        }
    }
    Ok(())
}

fn get(
    config: &ClientConfig,
    cache_file: &Path,
    repo: &str,
    remote: &str,
    rev: Option<&str>,
    out: Option<PathBuf>,
    force: bool,
) -> anyhow::Result<()> {
    require_server(config)?;
    let (dir, name) = split_remote(remote).context("remote path names no file")?;

    let entry = list_dir(config, repo, &dir)?
        .into_iter()
        .find(|e| e.name == name && !e.is_dir())
        .with_context(|| format!("{remote} not found in {repo}"))?;

    let mut cache = FileCache::open(cache_file);
    if !force && rev.is_none() {
        if let Some(path) = cache.get(&entry.id) {
            println!("{}", path.display());
            return Ok(());
        }
    }

    let mut config = config.clone();
    if let Some(out) = out {
        config.download_dir = out;
    }
    let registry = TransferRegistry::from_config(&config)?;
    let handle = match rev {
        Some(rev) => registry.create_download_task_at_revision(repo, &dir, &name, rev),
        None => registry.create_download_task(repo, &dir, &name),
    };

    let path = wait(&registry, handle, &name)?;
    if rev.is_none() {
        if let Err(e) = cache.set(&entry.id, &path) {
            tracing::debug!(error = %e, "file not cached");
        }
    }
    println!("{}", path.display());
    Ok(())
}

fn put(
    config: &ClientConfig,
    repo: &str,
    dir: &str,
    file: &Path,
    name: Option<String>,
) -> anyhow::Result<()> {
    require_server(config)?;
    let name = match name {
        Some(name) => name,
        None => file
            .file_name()
            .and_then(|n| n.to_str())
            .context("local file has no usable name")?
            .to_string(),
    };

    let registry = TransferRegistry::from_config(config)?;
    let handle = registry.create_upload_task(repo, dir, &name, file)?;
    wait(&registry, handle, &name)?;
    println!("uploaded {name} to {repo}:{dir}");
    Ok(())
}

/// Prints progress until the task ends; returns the finished local path.
fn wait(
    registry: &TransferRegistry,
    handle: TaskHandle,
    label: &str,
) -> anyhow::Result<PathBuf> {
    let mut events = registry
        .take_events(handle)?
        .context("task events already taken")?;

    while let Some(event) = events.blocking_recv() {
        match event {
            TaskEvent::Started => tracing::debug!(%handle, "transfer started"),
            TaskEvent::Progress { processed, total } => {
                if total > 0 {
                    let percent = processed * 100 / total;
                    eprint!("\r{label}: {processed}/{total} bytes ({percent}%)");
                } else {
                    eprint!("\r{label}: {processed} bytes");
                }
            }
            TaskEvent::Redirected { url } => tracing::debug!(%handle, %url, "redirected"),
            TaskEvent::Finished { local_path } => {
                eprintln!();
                return Ok(local_path);
            }
            TaskEvent::Aborted { error, reason } => {
                eprintln!();
                bail!("{label}: transfer failed ({error:?}): {reason}");
            }
        }
    }
    bail!("{label}: transfer ended without a result")
}
