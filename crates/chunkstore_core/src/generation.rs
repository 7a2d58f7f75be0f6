//! Generation counter used to invalidate in-flight work.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic generation number of a storage instance.
///
/// Writers and persists capture the generation they were started in and
/// turn into no-ops once it has moved on.
#[derive(Debug, Default)]
pub(crate) struct Generation(AtomicU64);

impl Generation {
    pub(crate) fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Moves to the next generation and returns it.
    pub(crate) fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}
