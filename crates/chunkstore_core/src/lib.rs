//! # chunkstore core
//!
//! Assembles one logical file from many concurrently written regions.
//!
//! An orchestrator creates a storage instance per file, hands out a
//! [`Writer`] per region, persists progress and finally materializes the
//! finished file. Two backends implement the same [`ChunkStorage`] contract:
//!
//! - [`RandomAccessStorage`] writes straight into one backing handle and
//!   trails it with a persistence table, so an interrupted assembly can be
//!   resumed exactly ([`ResumableStorage`]).
//! - [`SegmentedStorage`] buffers writes and stores one immutable segment per
//!   flush. It is write-once: no resume, reset or random read.
//!
//! ## Key Invariants
//!
//! - Operations submitted through one writer run in submission order
//! - A writer's start position never changes; its written size never shrinks
//! - Stored segments of one storage tile the file from offset zero
//! - `reset` and `delete` never cancel work, they turn it into no-ops
//! - Writer failures are reported on the error channel, never as a stuck
//!   writer

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod events;
mod finished;
mod generation;
mod queue;
mod random_access;
mod segmented;
mod storage;
mod table;
mod writer;

pub use config::{Config, MaterializeStrategy};
pub use error::{CoreError, CoreResult};
pub use events::{ErrorChannel, ErrorReceiver, ErrorSource, RecvError, StorageErrorEvent};
pub use finished::FinishedFile;
pub use queue::Completion;
pub use random_access::RandomAccessStorage;
pub use segmented::SegmentedStorage;
pub use storage::{ChunkStorage, ResumableStorage, Storage, StorageId};
pub use writer::Writer;
