//! In-memory random-access handle for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory random-access handle.
///
/// This handle stores all data in memory and is suitable for unit tests,
/// integration tests and ephemeral assemblies that never need to resume.
///
/// # Example
///
/// ```rust
/// use chunkstore_storage::{StorageBackend, InMemoryBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.write_at(2, b"cd").unwrap();
/// backend.write_at(0, b"ab").unwrap();
/// assert_eq!(backend.data(), b"abcd");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory handle with pre-existing data.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of all data in the handle.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn write_at(&self, offset: u64, new_data: &[u8]) -> StorageResult<()> {
        let out_of_range = || StorageError::OutOfRange {
            offset,
            len: new_data.len(),
        };
        let start = usize::try_from(offset).map_err(|_| out_of_range())?;
        let end = start.checked_add(new_data.len()).ok_or_else(out_of_range)?;

        if new_data.is_empty() {
            return Ok(());
        }

        let mut data = self.data.write();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(new_data);
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn set_len(&self, new_size: u64) -> StorageResult<()> {
        let len = usize::try_from(new_size).map_err(|_| StorageError::OutOfRange {
            offset: new_size,
            len: 0,
        })?;
        self.data.write().resize(len, 0);
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        // Nothing to make durable
        Ok(())
    }
}
