//! Error types for the chunkstore engine.

use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] chunkstore_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Stored segments do not tile the file without gap or overlap.
    ///
    /// This means a writer contract was broken upstream; it is never retried.
    #[error("segments of storage {storage_id} are not contiguous: expected offset {expected}, found {found}")]
    NonContiguousSegments {
        /// The storage whose segments were scanned.
        storage_id: u64,
        /// Offset the next segment had to start at.
        expected: u64,
        /// Offset the next segment actually starts at.
        found: u64,
    },

    /// The assembled bytes disagree with the finalized size.
    #[error("size mismatch: finalized at {expected} bytes, stored {actual}")]
    SizeMismatch {
        /// Size given to the final persist.
        expected: u64,
        /// Size actually stored.
        actual: u64,
    },

    /// The storage was used before `init`.
    #[error("storage {storage_id} is not initialized")]
    NotInitialized {
        /// The storage that was used.
        storage_id: u64,
    },

    /// `get_file` was called before a final persist.
    #[error("storage {storage_id} has not been finalized")]
    NotFinalized {
        /// The storage that was used.
        storage_id: u64,
    },
}

impl CoreError {
    /// Returns true if this error means a broken contract rather than a
    /// transient failure.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::NonContiguousSegments { .. }
                | CoreError::SizeMismatch { .. }
                | CoreError::NotInitialized { .. }
                | CoreError::NotFinalized { .. }
        )
    }
}
