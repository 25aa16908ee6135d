//! Error handling for tabletdb
//!
//! This module provides the table-level error type and result alias.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::identifier::EncodeError;
use crate::shard::ShardError;

/// Errors that can occur in table operations
#[derive(Error, Debug)]
pub enum Error {
    /// The table root directory already exists
    #[error("Table already exists: {0:?}")]
    AlreadyExists(PathBuf),

    /// The table root directory does not exist
    #[error("Table does not exist: {0:?}")]
    NotFound(PathBuf),

    /// A routing call was made on a closed table
    #[error("Table is not open")]
    NotOpen,

    /// The object identifier has no canonical encoding
    #[error("Invalid object identifier: {0}")]
    InvalidIdentifier(#[from] EncodeError),

    /// A shard operation failed
    #[error("Shard error: {0}")]
    Shard(#[from] ShardError),

    /// Directory creation or listing failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Errors related to configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The shard directories on disk disagree with the recorded shard count
    #[error("Shard count mismatch: table was created with {expected} shards, found {found}")]
    ShardCountMismatch { expected: u32, found: usize },

    /// Errors related to reading or writing table metadata
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for table operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new already-exists error
    pub fn already_exists(path: impl Into<PathBuf>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a new not-found error
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Check if this is an already-exists error
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a not-open error
    pub fn is_not_open(&self) -> bool {
        matches!(self, Self::NotOpen)
    }

    /// Check if this is an invalid identifier error
    pub fn is_invalid_identifier(&self) -> bool {
        matches!(self, Self::InvalidIdentifier(_))
    }

    /// Check if this error was raised by a shard
    pub fn is_shard_error(&self) -> bool {
        matches!(self, Self::Shard(_))
    }

    /// Check if this is an I/O error
    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Get a user-friendly suggestion for resolving the error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::AlreadyExists(_) => Some("Open the existing table instead of creating it".to_string()),
            Self::NotFound(_) => Some("Create the table before opening it".to_string()),
            Self::NotOpen => Some("Call open() before routing events".to_string()),
            Self::Io(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                Some("You don't have permission to access the table directory".to_string())
            }
            Self::Shard(ShardError::Locked(_)) => {
                Some("Another handle has this table open; close it first".to_string())
            }
            Self::ShardCountMismatch { .. } => {
                Some("Restore the missing shard directories or migrate the table".to_string())
            }
            _ => None,
        }
    }
}
