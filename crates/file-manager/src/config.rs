//! Client configuration.
//!
//! Stored as TOML:
//! - Linux: `$XDG_CONFIG_HOME/seaclient/client.toml` (or `~/.config/...`)
//! - Windows: `%APPDATA%/seaclient/client.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use seaclient_api::ClientOptions;
use seaclient_transfer::{DEFAULT_MAX_REDIRECTS, TransferOptions};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Overrides `server_url`.
pub const ENV_SERVER: &str = "SEACLIENT_SERVER";
/// Overrides `token`.
pub const ENV_TOKEN: &str = "SEACLIENT_TOKEN";

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the server.
    pub server_url: String,

    /// Account token, sent as `Authorization: Token <token>`.
    pub token: String,

    /// Where downloads are written.
    pub download_dir: PathBuf,

    /// Connect and idle-read timeout in seconds; 0 disables it. Long
    /// transfers are not cut off while data keeps flowing.
    pub request_timeout_secs: u64,

    /// Redirects followed per task before giving up.
    pub max_redirects: usize,

    /// Index file of the local file cache.
    pub cache_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            token: String::new(),
            download_dir: default_download_dir(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            cache_file: None,
        }
    }
}

impl ClientConfig {
    /// Loads the default config file and applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path().ok_or(ConfigError::NoConfigDir)?;
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Saves to the default location.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Holds the account token.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Applies `SEACLIENT_SERVER` / `SEACLIENT_TOKEN` as returned by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(server) = lookup(ENV_SERVER).filter(|v| !v.is_empty()) {
            self.server_url = server;
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|v| !v.is_empty()) {
            self.token = token;
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            server_url: self.server_url.clone(),
            token: self.token.clone(),
            timeout: self.request_timeout(),
        }
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            max_redirects: self.max_redirects,
        }
    }
}

/// Default config file location, if the platform has one.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("seaclient").join("client.toml"))
}

fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

fn default_download_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE").ok();
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME").ok();

    match home {
        Some(home) => PathBuf::from(home).join("Downloads"),
        None => std::env::temp_dir(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ClientConfig::default();
        assert!(config.server_url.is_empty());
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.max_redirects, 10);
        assert!(config.cache_file.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load_from(&dir.path().join("none.toml")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(&path, "server_url = \"https://cloud.example.com\"\nmax_redirects = 3\n")
            .unwrap();

        let config = ClientConfig::load_from(&path).unwrap();
        assert_eq!(config.server_url, "https://cloud.example.com");
        assert_eq!(config.max_redirects, 3);
        assert_eq!(config.request_timeout_secs, 60);
        assert_eq!(config.transfer_options().max_redirects, 3);
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("client.toml");
        let config = ClientConfig {
            server_url: "https://h".into(),
            token: "secret".into(),
            download_dir: dir.path().to_path_buf(),
            request_timeout_secs: 0,
            max_redirects: 4,
            cache_file: Some(dir.path().join("cache.json")),
        };
        config.save_to(&path).unwrap();

        let loaded = ClientConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.request_timeout(), None);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn invalid_toml_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(&path, "max_redirects = \"many\"").unwrap();
        assert!(matches!(
            ClientConfig::load_from(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = ClientConfig {
            server_url: "https://file".into(),
            token: "file-token".into(),
            ..Default::default()
        };
        config.apply_env(|key| match key {
            ENV_SERVER => Some("https://env".into()),
            ENV_TOKEN => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.server_url, "https://env");
        assert_eq!(config.token, "file-token");

        let opts = config.client_options();
        assert_eq!(opts.server_url, "https://env");
        assert_eq!(opts.timeout, Some(Duration::from_secs(60)));
    }
}
