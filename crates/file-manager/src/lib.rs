//! Collaborator-facing side of the transfer engine.
//!
//! [`TransferRegistry`] creates and tracks transfer tasks and runs them on a
//! shared worker thread. [`ClientConfig`] carries the account and transfer
//! settings; [`FileCache`] maps content object ids to downloaded files.

pub mod cache;
pub mod config;
pub mod error;
pub mod registry;

pub use cache::FileCache;
pub use config::ClientConfig;
pub use error::{CacheError, ConfigError, RegistryError};
pub use registry::TransferRegistry;

pub use seaclient_transfer::{
    TaskErrorKind, TaskEvent, TaskHandle, TaskKind, TaskSnapshot, TaskStatus,
};
