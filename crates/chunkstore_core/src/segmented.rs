//! Segmented write-once backend.
//!
//! Writers buffer in memory and store one immutable segment per non-empty
//! flush, keyed at `(storage_id, start + flushed)`. `get_file` stitches the
//! segments back together and refuses anything that does not tile the file
//! from offset zero without gap or overlap.
//!
//! There is no resume path: this backend implements only
//! [`ChunkStorage`], never [`crate::ResumableStorage`].
//!
//! `delete` advances the generation before purging segments. A flush from
//! an older generation drops its buffer instead of storing it; flush and
//! delete exclude each other so a flush that already passed its check
//! finishes storing before the purge runs.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::events::{ErrorChannel, ErrorReceiver, ErrorSource, StorageErrorEvent};
use crate::finished::FinishedFile;
use crate::generation::Generation;
use crate::queue::ChunkSink;
use crate::storage::{ChunkStorage, StorageId};
use crate::writer::Writer;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chunkstore_storage::SegmentStore;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
struct Shared {
    id: StorageId,
    store: Arc<dyn SegmentStore>,
    recovery: Option<Arc<dyn SegmentStore>>,
    errors: ErrorChannel,
    generation: Generation,
    /// Held shared by flushes, exclusively by delete.
    commit: RwLock<()>,
    final_size: Mutex<Option<u64>>,
}

impl Shared {
    fn partitions(&self) -> impl Iterator<Item = &Arc<dyn SegmentStore>> {
        std::iter::once(&self.store).chain(self.recovery.iter())
    }
}

/// Storage that assembles a file from append-only segments.
///
/// # Example
///
/// ```rust
/// use chunkstore_core::{ChunkStorage, Config, SegmentedStorage};
/// use chunkstore_storage::InMemorySegmentStore;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let storage = SegmentedStorage::new(7, Arc::new(InMemorySegmentStore::new()), Config::default());
/// storage.init(false).await.unwrap();
///
/// let writer = storage.writer(0);
/// writer.write(&b"AAAA"[..]);
/// writer.write(&b"BBBB"[..]);
/// writer.flush().await;
///
/// storage.persist(Some(8), true).await.unwrap();
/// let file = storage.get_file().await.unwrap();
/// assert_eq!(file.to_bytes().unwrap().as_ref(), b"AAAABBBB");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SegmentedStorage {
    shared: Arc<Shared>,
}

impl SegmentedStorage {
    /// Creates an uninitialized storage for `id` whose segments live in `store`.
    ///
    /// Of `config`, only the error channel capacity applies to this backend.
    pub fn new(id: StorageId, store: Arc<dyn SegmentStore>, config: Config) -> Self {
        Self::build(id, store, None, &config)
    }

    /// Creates a storage that also purges a recovery partition on a fresh
    /// `init` and on `delete`.
    pub fn with_recovery(
        id: StorageId,
        store: Arc<dyn SegmentStore>,
        recovery: Arc<dyn SegmentStore>,
        config: Config,
    ) -> Self {
        Self::build(id, store, Some(recovery), &config)
    }

    fn build(
        id: StorageId,
        store: Arc<dyn SegmentStore>,
        recovery: Option<Arc<dyn SegmentStore>>,
        config: &Config,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                store,
                recovery,
                errors: ErrorChannel::new(config.error_channel_capacity),
                generation: Generation::default(),
                commit: RwLock::new(()),
                final_size: Mutex::new(None),
            }),
        }
    }

    /// The error channel writers of this storage report to.
    pub fn errors(&self) -> &ErrorChannel {
        &self.shared.errors
    }

    /// Stitches stored segments together, checking that they tile the file.
    fn assemble(&self) -> CoreResult<Bytes> {
        let id = self.shared.id;
        let segments = self.shared.store.segments(id)?;

        let total: usize = segments.iter().map(|segment| segment.data.len()).sum();
        let mut bytes = BytesMut::with_capacity(total);
        let mut expected = 0u64;
        for segment in segments {
            if segment.start != expected {
                error!(
                    storage_id = id,
                    expected,
                    found = segment.start,
                    "segments are not contiguous"
                );
                return Err(CoreError::NonContiguousSegments {
                    storage_id: id,
                    expected,
                    found: segment.start,
                });
            }
            expected = segment.end();
            bytes.extend_from_slice(&segment.data);
        }
        Ok(bytes.freeze())
    }
}

#[async_trait]
impl ChunkStorage for SegmentedStorage {
    fn id(&self) -> StorageId {
        self.shared.id
    }

    fn need_flush(&self) -> bool {
        true
    }

    fn subscribe_errors(&self) -> ErrorReceiver {
        self.shared.errors.subscribe()
    }

    async fn init(&self, is_loaded: bool) -> CoreResult<()> {
        let shared = &self.shared;
        if !is_loaded {
            // Leftovers of an aborted earlier run
            for partition in shared.partitions() {
                let removed = partition.delete_segments(shared.id)?;
                if removed > 0 {
                    info!(storage_id = shared.id, removed, "purged stale segments");
                }
            }
        }
        *shared.final_size.lock() = None;
        info!(storage_id = shared.id, is_loaded, "storage initialized");
        Ok(())
    }

    fn writer(&self, start_position: u64) -> Writer {
        let sink = SegmentedSink {
            shared: Arc::downgrade(&self.shared),
            start: start_position,
            generation: self.shared.generation.current(),
            buffer: Mutex::new(Buffer::default()),
        };
        Writer::new(
            self.shared.id,
            start_position,
            Arc::new(sink),
            self.shared.errors.clone(),
        )
    }

    async fn persist(&self, total_size: Option<u64>, is_final: bool) -> CoreResult<()> {
        let Some(total_size) = total_size else {
            return Ok(());
        };
        // Flushed segments are already durable; only the final size matters.
        if is_final {
            *self.shared.final_size.lock() = Some(total_size);
            info!(storage_id = self.shared.id, total_size, "storage finalized");
        }
        Ok(())
    }

    async fn get_file(&self) -> CoreResult<FinishedFile> {
        let id = self.shared.id;
        let expected = (*self.shared.final_size.lock())
            .ok_or(CoreError::NotFinalized { storage_id: id })?;

        let bytes = self.assemble()?;
        let actual = bytes.len() as u64;
        if actual != expected {
            error!(storage_id = id, expected, actual, "assembled size mismatch");
            return Err(CoreError::SizeMismatch { expected, actual });
        }
        Ok(FinishedFile::Snapshot(bytes))
    }

    async fn delete(&self) {
        let shared = &self.shared;
        let _commit = shared.commit.write();
        let generation = shared.generation.advance();
        *shared.final_size.lock() = None;

        for partition in shared.partitions() {
            if let Err(e) = partition.delete_segments(shared.id) {
                warn!(storage_id = shared.id, error = %e, "failed to delete segments");
                shared.errors.emit(StorageErrorEvent {
                    storage_id: shared.id,
                    writer_start: None,
                    source: ErrorSource::Delete,
                    error: Arc::new(e.into()),
                });
            }
        }
        info!(storage_id = shared.id, generation, "storage deleted");
    }
}

#[derive(Debug, Default)]
struct Buffer {
    chunks: Vec<Bytes>,
    /// Bytes in `chunks`.
    pending: u64,
    /// Bytes already stored as segments.
    flushed: u64,
    /// Bytes ever accepted, including dropped ones.
    written: u64,
}

/// Buffers writes in memory; each non-empty flush stores one segment.
struct SegmentedSink {
    shared: Weak<Shared>,
    start: u64,
    generation: u64,
    buffer: Mutex<Buffer>,
}

#[async_trait]
impl ChunkSink for SegmentedSink {
    async fn write(&self, data: Bytes) -> CoreResult<()> {
        let mut buffer = self.buffer.lock();
        buffer.pending += data.len() as u64;
        buffer.written += data.len() as u64;
        buffer.chunks.push(data);
        Ok(())
    }

    async fn flush(&self) -> CoreResult<()> {
        let Some(shared) = self.shared.upgrade() else {
            return Ok(());
        };

        let _commit = shared.commit.read();
        let mut buffer = self.buffer.lock();
        if !shared.generation.is_current(self.generation) {
            debug!(
                storage_id = shared.id,
                start = self.start,
                dropped = buffer.pending,
                "stale flush dropped"
            );
            buffer.chunks.clear();
            buffer.pending = 0;
            return Ok(());
        }

        if buffer.chunks.is_empty() {
            return Ok(());
        }

        let data = if buffer.chunks.len() == 1 {
            buffer.chunks[0].clone()
        } else {
            let mut joined = BytesMut::with_capacity(buffer.pending as usize);
            for chunk in &buffer.chunks {
                joined.extend_from_slice(chunk);
            }
            joined.freeze()
        };

        // On failure the buffer is kept so a later flush can store it.
        let position = self.start + buffer.flushed;
        shared.store.put_segment(shared.id, position, data)?;

        buffer.flushed += buffer.pending;
        buffer.pending = 0;
        buffer.chunks.clear();
        debug!(storage_id = shared.id, start = self.start, position, "segment stored");
        Ok(())
    }

    fn written_size(&self) -> u64 {
        self.buffer.lock().written
    }
}
