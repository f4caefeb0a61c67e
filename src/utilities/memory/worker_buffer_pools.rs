use super::buffer_pool::BufferPool;
use crossbeam_utils::CachePadded;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One `BufferPool` per worker so that transient per-frame allocations never contend.
///
/// Each pool sits behind its own padded lock. A worker only ever locks its own pool during a
/// dispatch, so the locks are uncontended; they exist so the pools can be reached through a
/// shared reference to the dispatcher.
pub struct WorkerBufferPools {
    pools: Vec<CachePadded<Mutex<BufferPool>>>,
}

impl WorkerBufferPools {
    /// Creates a pool for each of `worker_count` workers.
    pub fn new(worker_count: usize) -> Self {
        Self {
            pools: (0..worker_count)
                .map(|_| CachePadded::new(Mutex::new(BufferPool::new())))
                .collect(),
        }
    }

    /// Number of worker pools.
    pub fn worker_count(&self) -> usize {
        self.pools.len()
    }

    /// Locks the pool owned by `worker_index`.
    pub fn pool(&self, worker_index: usize) -> MutexGuard<'_, BufferPool> {
        self.pools[worker_index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops every buffer held by every worker pool.
    pub fn clear(&self) {
        for worker_index in 0..self.pools.len() {
            self.pool(worker_index).clear();
        }
    }
}
