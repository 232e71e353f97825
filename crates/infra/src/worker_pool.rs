//! Fixed-size pool of worker tokens gating concurrent Collector runs.
//!
//! Acquisition never waits: when every token is out the caller is told so
//! immediately and the tick is simply skipped. Tokens carry no job affinity
//! and are recreated at process start.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default number of concurrent Collector runs.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 5;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

/// Permission to run one Collector pass. Returned to the pool on drop.
#[derive(Debug)]
pub struct WorkerToken {
    _permit: OwnedSemaphorePermit,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Claim a free token, or `None` right away if all are taken.
    pub fn try_acquire(&self) -> Option<WorkerToken> {
        self.permits
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| WorkerToken { _permit: permit })
    }

    pub fn release(&self, token: WorkerToken) {
        drop(token);
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKER_POOL_SIZE)
    }
}
