//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The storage file could not be decoded.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The in-memory image could not be encoded.
    #[error("storage encoding failed: {0}")]
    Encoding(String),

    /// The storage file was written by an unknown format version.
    #[error("unsupported storage format version {found} (expected {expected})")]
    UnsupportedFormat {
        /// Version found in the file.
        found: u64,
        /// Version this build writes.
        expected: u64,
    },
}
