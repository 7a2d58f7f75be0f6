//! Out-of-band error events.
//!
//! Writers and best-effort teardown report failures here instead of through
//! the completion of the operation that failed. Delivery is fan-out and
//! fire-and-forget: every subscriber sees every event emitted after it
//! subscribed, and emitting with no subscribers is not an error.

use crate::error::CoreError;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// The operation that produced an error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// A writer's `write`.
    Write,
    /// A writer's `flush`.
    Flush,
    /// Removal of backing resources during `delete`.
    Delete,
}

/// An error reported out-of-band by a storage instance.
#[derive(Debug, Clone)]
pub struct StorageErrorEvent {
    /// The storage the failure belongs to.
    pub storage_id: u64,
    /// Start position of the writer involved, if any.
    pub writer_start: Option<u64>,
    /// The failing operation.
    pub source: ErrorSource,
    /// The failure.
    pub error: Arc<CoreError>,
}

/// Errors returned when receiving events.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecvError {
    /// The receiver fell behind and missed events.
    #[error("lagged {0} events")]
    Lagged(u64),
    /// Every sender is gone.
    #[error("error channel closed")]
    Closed,
    /// No event is currently queued.
    #[error("no event queued")]
    Empty,
}

/// Fan-out channel for [`StorageErrorEvent`]s.
#[derive(Debug, Clone)]
pub struct ErrorChannel {
    sender: broadcast::Sender<StorageErrorEvent>,
}

impl ErrorChannel {
    /// Creates a channel buffering up to `capacity` events per slow receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Creates a new subscriber. Earlier events are not replayed.
    pub fn subscribe(&self) -> ErrorReceiver {
        ErrorReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Emits an event to all current subscribers.
    pub fn emit(&self, event: StorageErrorEvent) {
        // No receivers is not an error
        let _ = self.sender.send(event);
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiving side of an [`ErrorChannel`].
#[derive(Debug)]
pub struct ErrorReceiver {
    receiver: broadcast::Receiver<StorageErrorEvent>,
}

impl ErrorReceiver {
    /// Waits for the next event.
    pub async fn recv(&mut self) -> Result<StorageErrorEvent, RecvError> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(n)) => Err(RecvError::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => Err(RecvError::Closed),
        }
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Result<StorageErrorEvent, RecvError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(event),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(RecvError::Lagged(n)),
            Err(broadcast::error::TryRecvError::Closed) => Err(RecvError::Closed),
            Err(broadcast::error::TryRecvError::Empty) => Err(RecvError::Empty),
        }
    }
}
