//! Materialized finished files.

use crate::error::CoreResult;
use bytes::{Bytes, BytesMut};
use chunkstore_storage::StorageBackend;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

/// Read granularity when copying or snapshotting a handle.
pub(crate) const COPY_BLOCK: usize = 1 << 20;

/// A finished logical file, as produced by `get_file`.
#[derive(Clone)]
pub enum FinishedFile {
    /// The backing handle itself, truncated to the final size.
    Handle {
        /// The exported handle.
        backend: Arc<dyn StorageBackend>,
        /// Final size in bytes.
        len: u64,
    },
    /// A copy placed in temporary storage.
    Copied {
        /// Location of the copy.
        path: PathBuf,
        /// Final size in bytes.
        len: u64,
    },
    /// The finished bytes held in memory.
    Snapshot(Bytes),
}

impl FinishedFile {
    /// Size of the file in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            FinishedFile::Handle { len, .. } | FinishedFile::Copied { len, .. } => *len,
            FinishedFile::Snapshot(bytes) => bytes.len() as u64,
        }
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads the whole file into memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle or copy cannot be read.
    pub fn to_bytes(&self) -> CoreResult<Bytes> {
        match self {
            FinishedFile::Handle { backend, len } => read_handle(backend.as_ref(), *len),
            FinishedFile::Copied { path, len } => {
                let mut file = std::fs::File::open(path)?;
                let mut bytes = Vec::with_capacity(usize::try_from(*len).unwrap_or(0));
                file.read_to_end(&mut bytes)?;
                Ok(Bytes::from(bytes))
            }
            FinishedFile::Snapshot(bytes) => Ok(bytes.clone()),
        }
    }
}

impl fmt::Debug for FinishedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishedFile::Handle { len, .. } => f.debug_struct("Handle").field("len", len).finish(),
            FinishedFile::Copied { path, len } => f
                .debug_struct("Copied")
                .field("path", path)
                .field("len", len)
                .finish(),
            FinishedFile::Snapshot(bytes) => f.debug_tuple("Snapshot").field(&bytes.len()).finish(),
        }
    }
}

/// Reads the first `len` bytes of `backend` block by block.
pub(crate) fn read_handle(backend: &dyn StorageBackend, len: u64) -> CoreResult<Bytes> {
    let mut bytes = BytesMut::with_capacity(usize::try_from(len).unwrap_or(0));
    let mut offset = 0u64;
    while offset < len {
        let block = (len - offset).min(COPY_BLOCK as u64) as usize;
        bytes.extend_from_slice(&backend.read_at(offset, block)?);
        offset += block as u64;
    }
    Ok(bytes.freeze())
}
