//! Storage contract.
//!
//! Every backend implements [`ChunkStorage`]. Backends that can resume an
//! interrupted assembly, start over and serve random reads additionally
//! implement [`ResumableStorage`]. The write-once segmented backend does not,
//! so those operations cannot be called on it at all.
//!
//! ## Lifecycle
//!
//! ```text
//! new -> init -> (writer | persist)* -> persist(final) -> get_file
//!                       \-> reset (resumable only) -> back to empty
//!                       \-> delete
//! ```

use crate::error::CoreResult;
use crate::events::ErrorReceiver;
use crate::finished::FinishedFile;
use crate::random_access::RandomAccessStorage;
use crate::segmented::SegmentedStorage;
use crate::writer::Writer;
use async_trait::async_trait;
use bytes::Bytes;

/// Identifier of a storage instance.
pub type StorageId = u64;

/// Operations shared by every backend.
#[async_trait]
pub trait ChunkStorage: Send + Sync {
    /// The storage id.
    fn id(&self) -> StorageId;

    /// True if writes only become durable after an explicit writer flush.
    fn need_flush(&self) -> bool;

    /// Subscribes to out-of-band error events.
    fn subscribe_errors(&self) -> ErrorReceiver;

    /// Opens or creates the backing resource.
    ///
    /// With `is_loaded` set an existing resource for this id is reused;
    /// otherwise the resource is guaranteed to start out clean.
    async fn init(&self, is_loaded: bool) -> CoreResult<()>;

    /// Creates a writer bound to `start_position`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    fn writer(&self, start_position: u64) -> Writer;

    /// Records writer metadata at `total_size`.
    ///
    /// With `is_final` set the backing resource is instead cut to exactly
    /// `total_size`. Does nothing if `total_size` is `None`.
    async fn persist(&self, total_size: Option<u64>, is_final: bool) -> CoreResult<()>;

    /// Materializes the finished file.
    ///
    /// A final [`persist`](ChunkStorage::persist) must have happened first.
    async fn get_file(&self) -> CoreResult<FinishedFile>;

    /// Removes the backing resource, best-effort.
    ///
    /// Failures are logged and reported on the error channel. Every other
    /// method stays callable afterwards.
    async fn delete(&self);
}

/// Operations of backends that can resume, reset and read.
#[async_trait]
pub trait ResumableStorage: ChunkStorage {
    /// Rebuilds writers from the metadata persisted at `total_size`.
    ///
    /// Missing or malformed metadata yields an empty list. Writers created
    /// before the call are invalidated.
    async fn load(&self, total_size: u64) -> CoreResult<Vec<Writer>>;

    /// Invalidates every writer created so far and empties the storage.
    async fn reset(&self) -> CoreResult<()>;

    /// Reads `size` bytes at `position`.
    async fn read(&self, position: u64, size: usize) -> CoreResult<Bytes>;
}

/// A storage instance of either backend.
#[derive(Debug)]
pub enum Storage {
    /// Random-access backend.
    RandomAccess(RandomAccessStorage),
    /// Segmented write-once backend.
    Segmented(SegmentedStorage),
}

impl Storage {
    /// The shared contract of the wrapped backend.
    pub fn as_chunk_storage(&self) -> &dyn ChunkStorage {
        match self {
            Storage::RandomAccess(storage) => storage,
            Storage::Segmented(storage) => storage,
        }
    }

    /// The resumable contract, if the wrapped backend supports it.
    pub fn as_resumable(&self) -> Option<&dyn ResumableStorage> {
        match self {
            Storage::RandomAccess(storage) => Some(storage),
            Storage::Segmented(_) => None,
        }
    }
}

impl From<RandomAccessStorage> for Storage {
    fn from(storage: RandomAccessStorage) -> Self {
        Storage::RandomAccess(storage)
    }
}

impl From<SegmentedStorage> for Storage {
    fn from(storage: SegmentedStorage) -> Self {
        Storage::Segmented(storage)
    }
}
