//! Random-access backend.
//!
//! File bytes and the persistence table share one backing handle. Writers
//! write straight into the handle at `start + written`, so every applied
//! write is already in place; `persist` only has to drop the table after
//! the last byte of the logical file so a later `load` can resume exactly.
//!
//! ## Concurrency
//!
//! - A writer's write, its `written` update and its table slot update happen
//!   under one state lock, so a concurrent persist never sees them apart.
//! - `persist` and `reset` are mutually exclusive. A persist re-checks the
//!   generation after acquiring exclusivity; a reset waits for a persist
//!   that is already writing and only then truncates.
//! - `load` takes the same exclusivity and starts a new generation: writers
//!   created before it lose their table slots and turn into no-ops.
//! - A persist syncs after releasing the state lock, so writers never wait
//!   on the sync itself.
//! - `reset` and a fresh `init` discard the cached snapshot and temp copies.

use crate::config::{Config, MaterializeStrategy};
use crate::error::{CoreError, CoreResult};
use crate::events::{ErrorChannel, ErrorReceiver, ErrorSource, StorageErrorEvent};
use crate::finished::{read_handle, FinishedFile, COPY_BLOCK};
use crate::generation::Generation;
use crate::queue::ChunkSink;
use crate::storage::{ChunkStorage, ResumableStorage, StorageId};
use crate::table::{PersistenceTable, WORD_SIZE};
use crate::writer::Writer;
use async_trait::async_trait;
use bytes::Bytes;
use chunkstore_storage::{HandleStore, StorageBackend, StorageError};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    backend: Option<Arc<dyn StorageBackend>>,
    table: PersistenceTable,
    finalized: Option<u64>,
    snapshot: Option<Bytes>,
    copies: Vec<PathBuf>,
}

#[derive(Debug)]
struct Shared {
    id: StorageId,
    config: Config,
    handles: Arc<dyn HandleStore>,
    errors: ErrorChannel,
    generation: Generation,
    state: Mutex<State>,
    exclusive: tokio::sync::Mutex<()>,
}

impl Shared {
    fn backend(&self, state: &State) -> CoreResult<Arc<dyn StorageBackend>> {
        state
            .backend
            .clone()
            .ok_or(CoreError::NotInitialized { storage_id: self.id })
    }

    fn report(&self, source: ErrorSource, error: CoreError) {
        self.errors.emit(StorageErrorEvent {
            storage_id: self.id,
            writer_start: None,
            source,
            error: Arc::new(error),
        });
    }
}

/// Storage backed by a single random-access handle plus a persisted table of
/// writer regions.
///
/// # Example
///
/// ```rust
/// use chunkstore_core::{ChunkStorage, Config, RandomAccessStorage};
/// use chunkstore_storage::InMemoryHandleStore;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let storage = RandomAccessStorage::new(7, Arc::new(InMemoryHandleStore::new()), Config::default());
/// storage.init(false).await.unwrap();
///
/// let a = storage.writer(0);
/// let b = storage.writer(4);
/// b.write(&b"BBBB"[..]).await;
/// a.write(&b"AAAA"[..]).await;
///
/// storage.persist(Some(8), true).await.unwrap();
/// let file = storage.get_file().await.unwrap();
/// assert_eq!(file.to_bytes().unwrap().as_ref(), b"AAAABBBB");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RandomAccessStorage {
    shared: Arc<Shared>,
}

impl RandomAccessStorage {
    /// Creates an uninitialized storage for `id` whose handle lives in `handles`.
    pub fn new(id: StorageId, handles: Arc<dyn HandleStore>, config: Config) -> Self {
        let errors = ErrorChannel::new(config.error_channel_capacity);
        Self {
            shared: Arc::new(Shared {
                id,
                config,
                handles,
                errors,
                generation: Generation::default(),
                state: Mutex::new(State::default()),
                exclusive: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// The error channel writers of this storage report to.
    pub fn errors(&self) -> &ErrorChannel {
        &self.shared.errors
    }

    fn make_writer(&self, slot: usize, start: u64, written: u64, generation: u64) -> Writer {
        let sink = RandomAccessSink {
            shared: Arc::downgrade(&self.shared),
            slot,
            start,
            generation,
            written: AtomicU64::new(written),
        };
        Writer::new(
            self.shared.id,
            start,
            Arc::new(sink),
            self.shared.errors.clone(),
        )
    }

    /// Reads and decodes the table trailing `total_size`, if there is one.
    fn read_table(
        &self,
        backend: &dyn StorageBackend,
        total_size: u64,
    ) -> CoreResult<Option<PersistenceTable>> {
        let id = self.shared.id;

        let header = match backend.read_at(total_size, WORD_SIZE) {
            Ok(header) => header,
            Err(StorageError::ReadPastEnd { .. }) => {
                debug!(storage_id = id, total_size, "no persistence table");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let count = match PersistenceTable::decode_count(&header) {
            Some(0) | None => return Ok(None),
            Some(count) => count,
        };

        let Some(len) = PersistenceTable::encoded_len(count) else {
            warn!(storage_id = id, count, "persistence table count out of range");
            return Ok(None);
        };

        let bytes = match backend.read_at(total_size, len) {
            Ok(bytes) => bytes,
            Err(StorageError::ReadPastEnd { size, .. }) => {
                warn!(storage_id = id, count, size, "persistence table truncated");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let table = PersistenceTable::decode(&bytes);
        if table.is_none() {
            warn!(storage_id = id, count, "persistence table malformed");
        }
        Ok(table)
    }

    fn persist_exclusive(&self, total_size: u64, is_final: bool) -> CoreResult<()> {
        let shared = &self.shared;
        let backend = {
            let mut state = shared.state.lock();
            let backend = shared.backend(&state)?;

            if is_final {
                backend.set_len(total_size)?;
                state.finalized = Some(total_size);
                info!(storage_id = shared.id, total_size, "storage finalized");
            } else {
                let encoded = state.table.encode();
                backend.write_at(total_size, &encoded)?;
                backend.set_len(total_size + encoded.len() as u64)?;
                debug!(
                    storage_id = shared.id,
                    total_size,
                    writers = state.table.len(),
                    "persistence table written"
                );
            }
            backend
        };

        // Writers only wait for the table write; the sync runs unlocked.
        if shared.config.sync_on_persist {
            backend.sync()?;
        }
        Ok(())
    }

    fn copy_to_temp(&self, backend: &dyn StorageBackend, len: u64) -> CoreResult<PathBuf> {
        let shared = &self.shared;
        std::fs::create_dir_all(&shared.config.temp_dir)?;
        let name = format!("{}-{}", shared.config.file_name(shared.id), Uuid::new_v4());
        let path = shared.config.temp_dir.join(name);

        let mut file = std::fs::File::create(&path)?;
        let mut offset = 0u64;
        while offset < len {
            let block = (len - offset).min(COPY_BLOCK as u64) as usize;
            file.write_all(&backend.read_at(offset, block)?)?;
            offset += block as u64;
        }
        file.sync_all()?;
        Ok(path)
    }

    fn snapshot(&self, backend: &dyn StorageBackend, len: u64) -> CoreResult<Bytes> {
        let shared = &self.shared;
        if let Some(bytes) = shared.state.lock().snapshot.clone() {
            return Ok(bytes);
        }

        let name = shared.config.snapshot_name(shared.id);
        let bytes = if shared.handles.contains(&name) {
            let cached = shared.handles.open(&name, true)?;
            let size = cached.size()?;
            read_handle(cached.as_ref(), size)?
        } else {
            let bytes = read_handle(backend, len)?;
            let cached = shared.handles.open(&name, false)?;
            cached.write_at(0, &bytes)?;
            cached.sync()?;
            bytes
        };

        shared.state.lock().snapshot = Some(bytes.clone());
        Ok(bytes)
    }

    fn remove_handle(&self, name: &str) {
        if let Err(e) = self.shared.handles.remove(name) {
            warn!(storage_id = self.shared.id, name, error = %e, "failed to remove handle");
            self.shared.report(ErrorSource::Delete, e.into());
        }
    }

    /// Drops the cached snapshot, both in memory and under its handle name,
    /// and every temp copy handed out so far. Best-effort.
    fn discard_materialized(&self) {
        let shared = &self.shared;
        let copies = {
            let mut state = shared.state.lock();
            state.snapshot = None;
            std::mem::take(&mut state.copies)
        };

        self.remove_handle(&shared.config.snapshot_name(shared.id));
        for path in copies {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(storage_id = shared.id, path = %path.display(), error = %e, "failed to remove copy");
                    shared.report(ErrorSource::Delete, e.into());
                }
            }
        }
    }
}

#[async_trait]
impl ChunkStorage for RandomAccessStorage {
    fn id(&self) -> StorageId {
        self.shared.id
    }

    fn need_flush(&self) -> bool {
        false
    }

    fn subscribe_errors(&self) -> ErrorReceiver {
        self.shared.errors.subscribe()
    }

    async fn init(&self, is_loaded: bool) -> CoreResult<()> {
        let shared = &self.shared;
        let name = shared.config.file_name(shared.id);
        let backend = shared.handles.open(&name, is_loaded)?;
        {
            let mut state = shared.state.lock();
            state.backend = Some(backend);
            state.table.clear();
            state.finalized = None;
            state.snapshot = None;
        }
        if !is_loaded {
            // A snapshot left by an earlier run describes other bytes
            self.discard_materialized();
        }

        info!(storage_id = shared.id, name = %name, is_loaded, "storage initialized");
        Ok(())
    }

    fn writer(&self, start_position: u64) -> Writer {
        // Table growth never suspends, so a concurrent persist sees the table
        // either before or after this pair exists.
        let (slot, generation) = {
            let mut state = self.shared.state.lock();
            (state.table.push(start_position), self.shared.generation.current())
        };
        self.make_writer(slot, start_position, 0, generation)
    }

    async fn persist(&self, total_size: Option<u64>, is_final: bool) -> CoreResult<()> {
        let Some(total_size) = total_size else {
            return Ok(());
        };

        let generation = self.shared.generation.current();
        let _exclusive = self.shared.exclusive.lock().await;
        if !self.shared.generation.is_current(generation) {
            debug!(storage_id = self.shared.id, generation, "persist dropped after reset");
            return Ok(());
        }

        self.persist_exclusive(total_size, is_final)
    }

    async fn get_file(&self) -> CoreResult<FinishedFile> {
        let shared = &self.shared;
        let (backend, len) = {
            let state = shared.state.lock();
            let backend = shared.backend(&state)?;
            let len = state
                .finalized
                .ok_or(CoreError::NotFinalized { storage_id: shared.id })?;
            (backend, len)
        };

        match shared.config.materialize {
            MaterializeStrategy::Direct => Ok(FinishedFile::Handle { backend, len }),
            MaterializeStrategy::CopyThroughTemp => {
                let path = self.copy_to_temp(backend.as_ref(), len)?;
                shared.state.lock().copies.push(path.clone());
                Ok(FinishedFile::Copied { path, len })
            }
            MaterializeStrategy::Snapshot => {
                Ok(FinishedFile::Snapshot(self.snapshot(backend.as_ref(), len)?))
            }
        }
    }

    async fn delete(&self) {
        let shared = &self.shared;
        shared.state.lock().finalized = None;

        self.remove_handle(&shared.config.file_name(shared.id));
        self.discard_materialized();
        info!(storage_id = shared.id, "storage deleted");
    }
}

#[async_trait]
impl ResumableStorage for RandomAccessStorage {
    async fn load(&self, total_size: u64) -> CoreResult<Vec<Writer>> {
        let _exclusive = self.shared.exclusive.lock().await;
        let backend = {
            let state = self.shared.state.lock();
            self.shared.backend(&state)?
        };

        let table = self
            .read_table(backend.as_ref(), total_size)?
            .unwrap_or_default();

        let (pairs, generation) = {
            let mut state = self.shared.state.lock();
            state.table = table;
            // Writers handed out before the load no longer own a slot
            (state.table.pairs().to_vec(), self.shared.generation.advance())
        };

        info!(storage_id = self.shared.id, total_size, writers = pairs.len(), "storage loaded");
        Ok(pairs
            .into_iter()
            .enumerate()
            .map(|(slot, (start, written))| self.make_writer(slot, start, written, generation))
            .collect())
    }

    async fn reset(&self) -> CoreResult<()> {
        let shared = &self.shared;
        let _exclusive = shared.exclusive.lock().await;

        let generation = {
            let mut state = shared.state.lock();
            let generation = shared.generation.advance();
            state.table.clear();
            state.finalized = None;
            if let Some(backend) = &state.backend {
                backend.set_len(0)?;
            }
            generation
        };
        self.discard_materialized();
        info!(storage_id = shared.id, generation, "storage reset");
        Ok(())
    }

    async fn read(&self, position: u64, size: usize) -> CoreResult<Bytes> {
        let backend = {
            let state = self.shared.state.lock();
            self.shared.backend(&state)?
        };
        Ok(Bytes::from(backend.read_at(position, size)?))
    }
}

/// Writes straight into the backing handle and keeps the table slot current.
struct RandomAccessSink {
    shared: Weak<Shared>,
    slot: usize,
    start: u64,
    generation: u64,
    written: AtomicU64,
}

#[async_trait]
impl ChunkSink for RandomAccessSink {
    async fn write(&self, data: Bytes) -> CoreResult<()> {
        let Some(shared) = self.shared.upgrade() else {
            return Ok(());
        };

        let mut state = shared.state.lock();
        if !shared.generation.is_current(self.generation) {
            debug!(storage_id = shared.id, start = self.start, "stale write dropped");
            return Ok(());
        }

        let backend = shared.backend(&state)?;
        let written = self.written.load(Ordering::Acquire);
        backend.write_at(self.start + written, &data)?;

        let written = written + data.len() as u64;
        self.written.store(written, Ordering::Release);
        state.table.set_written(self.slot, written);
        Ok(())
    }

    async fn flush(&self) -> CoreResult<()> {
        Ok(())
    }

    fn written_size(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }
}
