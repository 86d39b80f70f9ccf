use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Fixed-capacity admission gate for job bodies.
///
/// Cloning shares the same slots. A slot is released when the returned
/// permit is dropped.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Wait for a free slot.
    ///
    /// Returns `None` without taking a slot if `cancel` is already cancelled
    /// or becomes cancelled while waiting.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        if cancel.is_cancelled() {
            tracing::debug!("Cancelled before waiting for a limiter slot");
            return None;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Cancelled while waiting for a limiter slot");
                None
            }
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
        }
    }
}
