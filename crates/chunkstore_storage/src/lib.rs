//! # chunkstore storage
//!
//! Byte stores underneath the chunkstore engine.
//!
//! Two kinds of store are provided, one per engine backend:
//!
//! - **Random-access handles** ([`StorageBackend`]) handed out by name from a
//!   [`HandleStore`]. The random-access engine backend writes file bytes and
//!   its persistence table into one such handle.
//! - **Segment stores** ([`SegmentStore`]) holding immutable byte ranges under
//!   `(storage_id, start)` keys. The segmented engine backend appends one
//!   segment per flush.
//!
//! Stores are opaque: they do not know about writers, tables or tiling.
//!
//! ## Example
//!
//! ```rust
//! use chunkstore_storage::{HandleStore, InMemoryHandleStore, StorageBackend};
//!
//! let store = InMemoryHandleStore::new();
//! let handle = store.open("7.part", false).unwrap();
//! handle.write_at(0, b"hello world").unwrap();
//! assert_eq!(handle.read_at(6, 5).unwrap(), b"world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod handle;
mod memory;
mod segment;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use handle::{DirectoryHandleStore, HandleStore, InMemoryHandleStore};
pub use memory::InMemoryBackend;
pub use segment::{DirectorySegmentStore, InMemorySegmentStore, Segment, SegmentStore};
