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

    /// Attempted to read beyond the end of a handle.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current handle size.
        size: u64,
    },

    /// A write would place bytes past the addressable range.
    #[error("write out of range: offset {offset}, len {len}")]
    OutOfRange {
        /// The requested write offset.
        offset: u64,
        /// The requested write length.
        len: usize,
    },

    /// A stored object is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A handle name is not usable by the store.
    #[error("invalid handle name: {0:?}")]
    InvalidName(String),
}
