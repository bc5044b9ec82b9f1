//! Storage error types.
//!
//! Defines errors that can occur during storage operations:
//! - `Serialization`: Failed to encode/decode a record
//! - `Io`: Underlying storage system errors
//!
//! A missing record is not an error; loads return `Ok(None)`.

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}
