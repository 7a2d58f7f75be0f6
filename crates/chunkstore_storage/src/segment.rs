//! Keyed append-only segment stores.
//!
//! Segments are immutable byte ranges stored under the composite key
//! `(storage_id, start)`. Each store call is one transaction: a put is
//! either fully visible to a later scan or not at all.

use crate::error::{StorageError, StorageResult};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// A stored segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Absolute offset of the first byte in the logical file.
    pub start: u64,
    /// Segment content.
    pub data: Bytes,
}

impl Segment {
    /// Offset one past the last byte of this segment.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }
}

/// A store of immutable segments keyed by `(storage_id, start)`.
pub trait SegmentStore: Send + Sync + std::fmt::Debug {
    /// Stores one segment. An existing segment at the same key is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment cannot be stored.
    fn put_segment(&self, storage_id: u64, start: u64, data: Bytes) -> StorageResult<()>;

    /// Returns every segment of `storage_id`, ordered by start offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the segments cannot be read.
    fn segments(&self, storage_id: u64) -> StorageResult<Vec<Segment>>;

    /// Deletes every segment of `storage_id`, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the segments cannot be deleted.
    fn delete_segments(&self, storage_id: u64) -> StorageResult<usize>;
}

/// An in-memory segment store.
#[derive(Debug, Default)]
pub struct InMemorySegmentStore {
    segments: RwLock<BTreeMap<(u64, u64), Bytes>>,
}

impl InMemorySegmentStore {
    /// Creates an empty segment store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of segments across all storage ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    /// Returns true if no segments are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.read().is_empty()
    }
}

impl SegmentStore for InMemorySegmentStore {
    fn put_segment(&self, storage_id: u64, start: u64, data: Bytes) -> StorageResult<()> {
        self.segments.write().insert((storage_id, start), data);
        Ok(())
    }

    fn segments(&self, storage_id: u64) -> StorageResult<Vec<Segment>> {
        let segments = self.segments.read();
        Ok(segments
            .range((storage_id, 0)..=(storage_id, u64::MAX))
            .map(|(&(_, start), data)| Segment {
                start,
                data: data.clone(),
            })
            .collect())
    }

    fn delete_segments(&self, storage_id: u64) -> StorageResult<usize> {
        let mut segments = self.segments.write();
        let keys: Vec<_> = segments
            .range((storage_id, 0)..=(storage_id, u64::MAX))
            .map(|(key, _)| *key)
            .collect();
        for key in &keys {
            segments.remove(key);
        }
        Ok(keys.len())
    }
}

/// Suffix of segment files that have not been committed yet.
const PENDING_SUFFIX: &str = ".pending";

/// A segment store keeping one directory per storage id and one file per
/// segment.
///
/// Segment files are named by their zero-padded hexadecimal start offset so
/// directory order equals offset order. A put writes to a pending file and
/// renames it into place; pending files are ignored by scans.
#[derive(Debug)]
pub struct DirectorySegmentStore {
    root: PathBuf,
    lock: RwLock<()>,
}

impl DirectorySegmentStore {
    /// Opens a segment store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            lock: RwLock::new(()),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn storage_dir(&self, storage_id: u64) -> PathBuf {
        self.root.join(storage_id.to_string())
    }

    fn segment_name(start: u64) -> String {
        format!("{start:016x}")
    }
}

impl SegmentStore for DirectorySegmentStore {
    fn put_segment(&self, storage_id: u64, start: u64, data: Bytes) -> StorageResult<()> {
        let _guard = self.lock.write();
        let dir = self.storage_dir(storage_id);
        std::fs::create_dir_all(&dir)?;

        let name = Self::segment_name(start);
        let pending = dir.join(format!("{name}{PENDING_SUFFIX}"));
        {
            let mut file = std::fs::File::create(&pending)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        std::fs::rename(&pending, dir.join(name))?;
        Ok(())
    }

    fn segments(&self, storage_id: u64) -> StorageResult<Vec<Segment>> {
        let _guard = self.lock.read();
        let dir = self.storage_dir(storage_id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut segments = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.ends_with(PENDING_SUFFIX) {
                continue;
            }
            let start = u64::from_str_radix(name, 16)
                .map_err(|_| StorageError::Corrupted(format!("unexpected segment file {name}")))?;
            let data = std::fs::read(entry.path())?;
            segments.push(Segment {
                start,
                data: Bytes::from(data),
            });
        }
        segments.sort_by_key(|segment| segment.start);
        Ok(segments)
    }

    fn delete_segments(&self, storage_id: u64) -> StorageResult<usize> {
        let _guard = self.lock.write();
        let dir = self.storage_dir(storage_id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let committed = entry
                .file_name()
                .to_str()
                .is_some_and(|name| !name.ends_with(PENDING_SUFFIX));
            std::fs::remove_file(entry.path())?;
            if committed {
                removed += 1;
            }
        }
        std::fs::remove_dir(&dir)?;
        Ok(removed)
    }
}
