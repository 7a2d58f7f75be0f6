//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use chunkstore_storage::{
    HandleStore, InMemoryBackend, StorageBackend, StorageError, StorageResult,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use tracing_subscriber::EnvFilter;

/// Installs a test-friendly subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An in-memory handle whose next `n` writes fail and whose next sync can
/// be held open.
#[derive(Debug, Default)]
pub struct FaultyBackend {
    inner: InMemoryBackend,
    failing_writes: AtomicUsize,
    held_sync: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
}

/// Controls a sync held by [`FaultyBackend::hold_next_sync`].
pub struct SyncGate {
    entered: mpsc::Receiver<()>,
    release: mpsc::Sender<()>,
}

impl SyncGate {
    /// Blocks until the held sync has started.
    pub fn wait_entered(&self) {
        self.entered.recv().unwrap();
    }

    pub fn release(self) {
        let _ = self.release.send(());
    }
}

impl FaultyBackend {
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Makes the next `sync` block until the gate is released or dropped.
    pub fn hold_next_sync(&self) -> SyncGate {
        let (entered_tx, entered) = mpsc::channel();
        let (release, release_rx) = mpsc::channel();
        *self.held_sync.lock() = Some((entered_tx, release_rx));
        SyncGate { entered, release }
    }

    pub fn data(&self) -> Vec<u8> {
        self.inner.data()
    }
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let armed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        self.inner.write_at(offset, data)
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn set_len(&self, new_size: u64) -> StorageResult<()> {
        self.inner.set_len(new_size)
    }

    fn sync(&self) -> StorageResult<()> {
        let held = self.held_sync.lock().take();
        if let Some((entered, release)) = held {
            let _ = entered.send(());
            let _ = release.recv();
        }
        self.inner.sync()
    }
}

/// A handle store handing out [`FaultyBackend`]s.
#[derive(Debug, Default)]
pub struct FaultyHandleStore {
    handles: RwLock<HashMap<String, Arc<FaultyBackend>>>,
}

impl FaultyHandleStore {
    pub fn handle(&self, name: &str) -> Arc<FaultyBackend> {
        Arc::clone(&self.handles.read()[name])
    }
}

impl HandleStore for FaultyHandleStore {
    fn open(&self, name: &str, reuse: bool) -> StorageResult<Arc<dyn StorageBackend>> {
        let mut handles = self.handles.write();
        if reuse {
            if let Some(existing) = handles.get(name) {
                return Ok(Arc::clone(existing) as Arc<dyn StorageBackend>);
            }
        }
        let backend = Arc::new(FaultyBackend::default());
        handles.insert(name.to_string(), Arc::clone(&backend));
        Ok(backend)
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        self.handles.write().remove(name);
        Ok(())
    }

    fn contains(&self, name: &str) -> bool {
        self.handles.read().contains_key(name)
    }
}
