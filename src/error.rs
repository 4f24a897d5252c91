//! Error taxonomy for the FSAL daemon.
//!
//! Each variant is surfaced to wire clients as `success=false` plus a
//! human-readable `<error>` string, never as a connection abort (the
//! exception is `Protocol`, which closes the connection instead).

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the indexer, path validation, and wire layers.
#[derive(Debug, Error)]
pub enum FsalError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("no such file or directory \"{0}\"")]
    NotFound(String),

    #[error("destination path \"{0}\" already exists")]
    AlreadyExists(String),

    #[error("path \"{0}\" exceeds the maximum transfer path length")]
    LimitExceeded(String),

    #[error("filesystem error on \"{path}\": {source}")]
    Filesystem {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed request: {0}")]
    Protocol(String),

    #[error("notification source unavailable: {0}")]
    NotificationSourceUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl FsalError {
    /// Render the human-readable message placed in a wire `<error>` node.
    pub fn to_wire_message(&self) -> String {
        self.to_string()
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FsalError::Filesystem {
            path: path.into().to_string_lossy().into_owned(),
            source,
        }
    }
}

pub type FsalResult<T> = Result<T, FsalError>;
