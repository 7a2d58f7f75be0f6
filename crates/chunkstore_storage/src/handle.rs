//! Named handle stores.
//!
//! A handle store hands out [`StorageBackend`] handles by name. It is the
//! "open or create the backing file for this id" capability the engine
//! builds on.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A store of named random-access handles.
pub trait HandleStore: Send + Sync + std::fmt::Debug {
    /// Opens the handle called `name`.
    ///
    /// With `reuse` set, an existing handle keeps its content; otherwise the
    /// returned handle is always empty. A missing handle is created either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle cannot be opened or created.
    fn open(&self, name: &str, reuse: bool) -> StorageResult<Arc<dyn StorageBackend>>;

    /// Removes the handle called `name`. Removing a missing handle succeeds.
    ///
    /// Handles already handed out stay usable.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing handle cannot be removed.
    fn remove(&self, name: &str) -> StorageResult<()>;

    /// Returns true if a handle called `name` exists.
    fn contains(&self, name: &str) -> bool;
}

/// A handle store keeping one file per name under a root directory.
#[derive(Debug)]
pub struct DirectoryHandleStore {
    root: PathBuf,
}

impl DirectoryHandleStore {
    /// Opens a handle store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> StorageResult<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

impl HandleStore for DirectoryHandleStore {
    fn open(&self, name: &str, reuse: bool) -> StorageResult<Arc<dyn StorageBackend>> {
        let path = self.path_for(name)?;
        let backend = if reuse {
            FileBackend::open(&path)?
        } else {
            FileBackend::create(&path)?
        };
        Ok(Arc::new(backend))
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        let path = self.path_for(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.path_for(name).map(|p| p.is_file()).unwrap_or(false)
    }
}

/// An in-memory handle store for testing.
///
/// Opening with `reuse` returns the very same handle that was handed out
/// before, which mirrors looking up an already-open handle by id.
#[derive(Debug, Default)]
pub struct InMemoryHandleStore {
    handles: RwLock<HashMap<String, Arc<InMemoryBackend>>>,
}

impl InMemoryHandleStore {
    /// Creates an empty handle store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of handles in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    /// Returns true if the store holds no handles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }
}

impl HandleStore for InMemoryHandleStore {
    fn open(&self, name: &str, reuse: bool) -> StorageResult<Arc<dyn StorageBackend>> {
        let mut handles = self.handles.write();
        if reuse {
            if let Some(existing) = handles.get(name) {
                return Ok(Arc::clone(existing) as Arc<dyn StorageBackend>);
            }
        }
        let backend = Arc::new(InMemoryBackend::new());
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
