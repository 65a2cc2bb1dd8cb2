use std::path::PathBuf;

use seaclient_api::ApiError;
use seaclient_transfer::TaskHandle;

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown task handle {0}")]
    UnknownHandle(TaskHandle),

    #[error("upload source is not a readable file: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("worker context error: {0}")]
    Worker(#[from] std::io::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Errors from loading or saving the client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("configuration directory not available")]
    NoConfigDir,
}

/// Errors from file cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache index: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache disabled")]
    Disabled,
}
