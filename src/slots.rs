use std::{future::Future, sync::Arc};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    #[error("{0} slot pool has been closed")]
    Closed(&'static str),
}

/// A held slot. Dropping it hands the slot back to its pool.
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

/// Named counting pool bounding how many guarded operations run at once.
#[derive(Clone)]
pub struct SlotPool {
    name: &'static str,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl SlotPool {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        SlotPool {
            name,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub async fn acquire(&self) -> Result<Slot, SlotError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| SlotError::Closed(self.name))?;
        Ok(Slot { _permit: permit })
    }

    /// Runs `operation` while holding one slot. The slot is released when the
    /// operation finishes, whatever its outcome.
    pub async fn run<T, E, Fut>(&self, operation: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: From<SlotError>,
    {
        let _slot = self.acquire().await?;
        operation.await
    }
}

/// The two independent bounds of an ingest cycle: outbound pool API calls and
/// database statements.
#[derive(Clone)]
pub struct SlotPools {
    pub api: SlotPool,
    pub db: SlotPool,
}

impl SlotPools {
    pub fn new(api_capacity: usize, db_capacity: usize) -> Self {
        SlotPools {
            api: SlotPool::new("api", api_capacity),
            db: SlotPool::new("db", db_capacity),
        }
    }
}
