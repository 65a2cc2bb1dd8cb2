use std::path::PathBuf;

use seaclient_api::ApiError;

use crate::events::TaskErrorKind;
use crate::state::IllegalTransition;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}")]
    Status { status: u16 },

    #[error("no free file name for {}", .0.display())]
    NameExhausted(PathBuf),

    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("not a readable file: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("canceled")]
    Cancelled,

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
}

impl TransferError {
    /// Collaborator-visible classification of this error.
    pub fn kind(&self) -> TaskErrorKind {
        match self {
            Self::Io(_)
            | Self::NameExhausted(_)
            | Self::InvalidFileName(_)
            | Self::SourceMissing(_) => TaskErrorKind::FileError,
            Self::Api(_) | Self::Http(_) | Self::Status { .. } => TaskErrorKind::NetworkError,
            Self::Cancelled => TaskErrorKind::NoError,
            Self::IllegalTransition(_) => TaskErrorKind::Unknown,
        }
    }
}
