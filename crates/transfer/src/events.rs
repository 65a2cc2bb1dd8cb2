use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Opaque task identifier, unique within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskHandle(pub usize);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Download,
    Upload,
}

/// Failure classification reported with [`TaskEvent::Aborted`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// Not yet classified. Never the error of a terminated task.
    #[default]
    Unknown,
    /// Clean cancel.
    NoError,
    FileError,
    NetworkError,
}

/// Notifications pushed to whoever holds the task's event receiver.
///
/// `Aborted` or `Finished` is always the last event of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    Started,
    Progress { processed: u64, total: u64 },
    Redirected { url: String },
    Aborted { error: TaskErrorKind, reason: String },
    Finished { local_path: PathBuf },
}

impl TaskEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Aborted { .. } | Self::Finished { .. })
    }
}
