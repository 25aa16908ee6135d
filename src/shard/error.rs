//! Tablet errors

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a shard
#[derive(Error, Debug)]
pub enum ShardError {
    /// Underlying filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A tablet file or directory could not be used
    #[error("Tablet storage error at {path:?}: {message}")]
    Storage { path: PathBuf, message: String },

    /// An event or identifier could not be encoded for the log
    #[error("Record encoding error: {0}")]
    Encoding(String),

    /// A record passed its checksum but could not be decoded
    #[error("Corrupt record at offset {offset} in {path:?}: {reason}")]
    Corruption {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// Another handle already holds the tablet lock
    #[error("Tablet is locked by another process: {0:?}")]
    Locked(PathBuf),

    /// The tablet has not been opened, or was closed
    #[error("Tablet is closed")]
    Closed,

    /// Failure reported by a custom shard implementation
    #[error("{0}")]
    Other(String),
}

/// Result alias for shard operations
pub type ShardResult<T> = std::result::Result<T, ShardError>;

impl ShardError {
    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn corruption(path: impl Into<PathBuf>, offset: u64, reason: impl ToString) -> Self {
        Self::Corruption {
            path: path.into(),
            offset,
            reason: reason.to_string(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Whether the tablet refused to open because another handle holds it
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked(_))
    }

    /// Whether the operation hit a closed tablet
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether the log holds data that cannot be replayed
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }
}

impl From<serde_json::Error> for ShardError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}
