//! Global admission control.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting semaphore capping concurrent part transfers across all
/// sessions.
///
/// Every part transfer holds exactly one [`AdmissionSlot`] for its
/// duration. The slot releases on drop, so a failed or cancelled transfer
/// cannot leak capacity.
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionController {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits until a slot is free and claims it.
    pub async fn acquire(&self) -> AdmissionSlot {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("admission semaphore never closes");
        AdmissionSlot { _permit: permit }
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Transfers currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

/// One unit of the global concurrency budget. Released on drop.
pub struct AdmissionSlot {
    _permit: OwnedSemaphorePermit,
}
