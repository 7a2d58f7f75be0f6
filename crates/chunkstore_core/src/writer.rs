//! Writer handles.

use crate::events::ErrorChannel;
use crate::queue::{ChunkSink, Completion, Operation, QueueOwner, WriterQueue};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// A handle bound to one contiguous region of the logical file.
///
/// The region starts at a fixed [`start_position`](Writer::start_position);
/// each `write` extends it. Operations submitted through one writer run in
/// call order. Operations of different writers interleave freely.
///
/// On the random-access backend a write is durable once its completion
/// resolves. On the segmented backend writes are buffered until `flush`.
pub struct Writer {
    start_position: u64,
    sink: Arc<dyn ChunkSink>,
    queue: WriterQueue,
}

impl Writer {
    pub(crate) fn new(
        storage_id: u64,
        start_position: u64,
        sink: Arc<dyn ChunkSink>,
        errors: ErrorChannel,
    ) -> Self {
        let queue = WriterQueue::spawn(
            Arc::clone(&sink),
            errors,
            QueueOwner {
                storage_id,
                start: start_position,
            },
        );
        Self {
            start_position,
            sink,
            queue,
        }
    }

    /// Absolute offset of the first byte of this writer's region.
    #[must_use]
    pub fn start_position(&self) -> u64 {
        self.start_position
    }

    /// Bytes applied by this writer so far.
    ///
    /// Only operations that have already run are counted.
    #[must_use]
    pub fn written_size(&self) -> u64 {
        self.sink.written_size()
    }

    /// Queues `data` to be appended to this writer's region.
    pub fn write(&self, data: impl Into<Bytes>) -> Completion {
        self.queue.submit(Operation::Write(data.into()))
    }

    /// Queues a flush of buffered data.
    ///
    /// A no-op on backends that write through.
    pub fn flush(&self) -> Completion {
        self.queue.submit(Operation::Flush)
    }
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("start_position", &self.start_position)
            .field("written_size", &self.written_size())
            .finish()
    }
}
