//! Single-file transfers against the repository API.
//!
//! A [`TransferTask`] resolves its transfer URL (prefetch and redirects),
//! picks or validates the local file, streams the bytes, and reports
//! progress and the outcome as [`TaskEvent`]s.

mod allocator;
mod error;
mod events;
mod progress;
mod state;
mod task;

pub use allocator::{
    LocalPathAllocator, MAX_COLLISION_SUFFIX, PartialDownload, validate_file_name,
};
pub use error::TransferError;
pub use events::{TaskErrorKind, TaskEvent, TaskHandle, TaskKind};
pub use progress::ProgressCounter;
pub use state::{IllegalTransition, StateMachine, TaskStatus, Transition};
pub use task::{TaskParams, TaskSnapshot, TransferOptions, TransferTask};

/// Default bound on redirects followed by one task.
pub const DEFAULT_MAX_REDIRECTS: usize = 10;
