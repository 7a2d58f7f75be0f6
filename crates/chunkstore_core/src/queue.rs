//! Per-writer task queue.
//!
//! Every `write` and `flush` on a [`crate::Writer`] becomes a task on that
//! writer's private FIFO queue. A single worker task drains the queue, so
//! operations run strictly in submission order no matter when (or whether)
//! their completions are awaited.
//!
//! A failing operation is reported once on the storage's error channel and
//! the worker moves on to the next task. The queue never stays blocked.

use crate::error::CoreResult;
use crate::events::{ErrorChannel, ErrorSource, StorageErrorEvent};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// The backend-specific effect of writer operations.
#[async_trait]
pub(crate) trait ChunkSink: Send + Sync + 'static {
    /// Applies one write.
    async fn write(&self, data: Bytes) -> CoreResult<()>;

    /// Applies one flush.
    async fn flush(&self) -> CoreResult<()>;

    /// Bytes applied so far.
    fn written_size(&self) -> u64;
}

#[derive(Debug)]
pub(crate) enum Operation {
    Write(Bytes),
    Flush,
}

impl Operation {
    fn source(&self) -> ErrorSource {
        match self {
            Operation::Write(_) => ErrorSource::Write,
            Operation::Flush => ErrorSource::Flush,
        }
    }
}

struct Task {
    operation: Operation,
    done: oneshot::Sender<()>,
}

/// Identifies the writer a queue belongs to in error events.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueOwner {
    pub storage_id: u64,
    pub start: u64,
}

/// Sending side of a writer's task queue.
///
/// The worker exits once every `WriterQueue` for it is dropped and the
/// remaining tasks are drained.
#[derive(Debug)]
pub(crate) struct WriterQueue {
    sender: mpsc::UnboundedSender<Task>,
}

impl WriterQueue {
    /// Spawns the worker for `sink` on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub(crate) fn spawn(sink: Arc<dyn ChunkSink>, errors: ErrorChannel, owner: QueueOwner) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();

        tokio::spawn(async move {
            while let Some(Task { operation, done }) = receiver.recv().await {
                let source = operation.source();
                let result = match operation {
                    Operation::Write(data) => sink.write(data).await,
                    Operation::Flush => sink.flush().await,
                };

                if let Err(error) = result {
                    warn!(
                        storage_id = owner.storage_id,
                        start = owner.start,
                        ?source,
                        %error,
                        "writer operation failed"
                    );
                    errors.emit(StorageErrorEvent {
                        storage_id: owner.storage_id,
                        writer_start: Some(owner.start),
                        source,
                        error: Arc::new(error),
                    });
                }

                // The submitter may have dropped its completion
                let _ = done.send(());
            }
        });

        Self { sender }
    }

    /// Appends `operation` to the queue.
    pub(crate) fn submit(&self, operation: Operation) -> Completion {
        let (done, receiver) = oneshot::channel();
        // A send only fails if the worker is gone, in which case the
        // completion resolves immediately.
        let _ = self.sender.send(Task { operation, done });
        Completion { receiver }
    }
}

/// Completion of one submitted writer operation.
///
/// Resolves once the operation has run, whether it succeeded or not.
/// Failures are reported on the storage's error channel, never here.
/// Dropping a completion does not cancel the operation.
#[derive(Debug)]
pub struct Completion {
    receiver: oneshot::Receiver<()>,
}

impl Future for Completion {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        Pin::new(&mut self.receiver).poll(cx).map(|_| ())
    }
}
