//! Random-access handle trait definition.

use crate::error::StorageResult;

/// A random-access byte handle.
///
/// Handles are **opaque byte stores**. They know nothing about writers,
/// persistence tables or segments; the engine owns all interpretation of
/// the bytes.
///
/// # Invariants
///
/// - `write_at` places exactly `data` at `offset`, growing the handle if needed
///   (any gap is zero-filled)
/// - `read_at` returns exactly the bytes previously written at that offset,
///   or `ReadPastEnd` if the range is not fully backed
/// - `set_len` is the only operation that shrinks a handle
/// - Handles must be `Send + Sync`; all methods take `&self` and lock
///   internally
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The read would extend beyond the current size
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Writes `data` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range overflows or an I/O error occurs.
    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Returns the current size of the handle in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Sets the size of the handle, truncating or zero-extending it.
    ///
    /// # Errors
    ///
    /// Returns an error if the resize fails.
    fn set_len(&self, new_size: u64) -> StorageResult<()>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&self) -> StorageResult<()>;
}
