//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A corruption was detected.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// The bytes do not form a valid object, hash, or payload.
    #[error("invalid object: {0}")]
    InvalidObject(String),
}
