use crate::error::ConfigError;
use crate::utilities::memory::worker_buffer_pools::WorkerBufferPools;
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Provides multithreading dispatch primitives, a thread count, and per thread resource pools for the
/// collision pipeline to use.
///
/// The pipeline does not require a load balancing parallel for. All that's needed is a way to
/// jumpstart some threads; every stage does its own domain specific load balancing and keeps the
/// number of dispatches low.
pub trait IThreadDispatcher: Send + Sync {
    /// Gets the number of workers available in the thread dispatcher.
    fn thread_count(&self) -> usize;

    /// Runs `worker_body` once on each of `min(thread_count, maximum_worker_count)` workers and
    /// returns once every worker has finished. Workers receive their index.
    fn dispatch_workers(&self, worker_body: &(dyn Fn(usize) + Sync), maximum_worker_count: usize);

    /// Gets the set of memory pools associated with thread workers.
    ///
    /// Memory a worker takes from its pool for a frame is returned to the same pool by the end of
    /// that frame.
    fn worker_pools(&self) -> &WorkerBufferPools;
}

/// Dispatcher that spawns scoped threads for every dispatch. Worker 0 runs on the calling thread.
pub struct SimpleThreadDispatcher {
    thread_count: usize,
    worker_pools: WorkerBufferPools,
}

impl SimpleThreadDispatcher {
    /// Creates a dispatcher with `thread_count` workers.
    pub fn new(thread_count: usize) -> Result<Self, ConfigError> {
        if thread_count == 0 {
            return Err(ConfigError::ZeroThreadCount);
        }
        Ok(Self {
            thread_count,
            worker_pools: WorkerBufferPools::new(thread_count),
        })
    }
}

impl IThreadDispatcher for SimpleThreadDispatcher {
    fn thread_count(&self) -> usize {
        self.thread_count
    }

    fn dispatch_workers(&self, worker_body: &(dyn Fn(usize) + Sync), maximum_worker_count: usize) {
        let worker_count = self.thread_count.min(maximum_worker_count);
        if worker_count <= 1 {
            if worker_count == 1 {
                worker_body(0);
            }
            return;
        }
        let result = crossbeam_utils::thread::scope(|scope| {
            for worker_index in 1..worker_count {
                scope.spawn(move |_| worker_body(worker_index));
            }
            worker_body(0);
        });
        if let Err(payload) = result {
            std::panic::resume_unwind(payload);
        }
    }

    fn worker_pools(&self) -> &WorkerBufferPools {
        &self.worker_pools
    }
}

/// Dispatcher with a single worker that runs inline on the calling thread.
pub struct SingleThreadDispatcher {
    worker_pools: WorkerBufferPools,
}

impl Default for SingleThreadDispatcher {
    fn default() -> Self {
        Self {
            worker_pools: WorkerBufferPools::new(1),
        }
    }
}

impl IThreadDispatcher for SingleThreadDispatcher {
    fn thread_count(&self) -> usize {
        1
    }

    fn dispatch_workers(&self, worker_body: &(dyn Fn(usize) + Sync), maximum_worker_count: usize) {
        if maximum_worker_count > 0 {
            worker_body(0);
        }
    }

    fn worker_pools(&self) -> &WorkerBufferPools {
        &self.worker_pools
    }
}

/// Dispatches one worker per element of `states`; each worker gets exclusive access to its own
/// state. Used to hand every worker its own cache shard.
pub fn dispatch_with_states<S: Send>(
    dispatcher: &dyn IThreadDispatcher,
    states: &mut [S],
    worker_body: &(dyn Fn(usize, &mut S) + Sync),
) {
    let slots: Vec<Mutex<&mut S>> = states.iter_mut().map(Mutex::new).collect();
    dispatcher.dispatch_workers(
        &|worker_index| {
            if let Some(slot) = slots.get(worker_index) {
                let mut state = slot.lock().unwrap_or_else(PoisonError::into_inner);
                worker_body(worker_index, &mut state);
            }
        },
        slots.len(),
    );
}

/// Runs every job exactly once across the dispatcher's workers.
///
/// Workers claim jobs from a shared counter in order, so earlier jobs start first. With no
/// dispatcher the jobs run in order on the calling thread as worker 0.
pub fn dispatch_jobs<J: Send>(
    dispatcher: Option<&dyn IThreadDispatcher>,
    jobs: &mut [J],
    job_body: &(dyn Fn(usize, &mut J) + Sync),
) {
    match dispatcher {
        Some(dispatcher) if dispatcher.thread_count() > 1 && jobs.len() > 1 => {
            let slots: Vec<Mutex<&mut J>> = jobs.iter_mut().map(Mutex::new).collect();
            let next_job = CachePadded::new(AtomicUsize::new(0));
            dispatcher.dispatch_workers(
                &|worker_index| loop {
                    let job_index = next_job.fetch_add(1, Ordering::Relaxed);
                    let Some(slot) = slots.get(job_index) else {
                        break;
                    };
                    let mut job = slot.lock().unwrap_or_else(PoisonError::into_inner);
                    job_body(worker_index, &mut job);
                },
                slots.len(),
            );
        }
        _ => {
            for job in jobs.iter_mut() {
                job_body(0, job);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn zero_threads_is_rejected() {
        assert!(matches!(
            SimpleThreadDispatcher::new(0),
            Err(ConfigError::ZeroThreadCount)
        ));
    }

    #[test]
    fn every_worker_runs_once() {
        let dispatcher = SimpleThreadDispatcher::new(4).unwrap();
        let hits: Vec<AtomicU32> = (0..4).map(|_| AtomicU32::new(0)).collect();
        dispatcher.dispatch_workers(&|i| {
            hits[i].fetch_add(1, Ordering::Relaxed);
        }, 3);
        let counts: Vec<u32> = hits.iter().map(|h| h.load(Ordering::Relaxed)).collect();
        assert_eq!(counts, vec![1, 1, 1, 0]);
    }

    #[test]
    fn jobs_and_states_are_exclusive() {
        let dispatcher = SimpleThreadDispatcher::new(3).unwrap();
        let mut jobs: Vec<u64> = (0..100).collect();
        dispatch_jobs(Some(&dispatcher), &mut jobs, &|_, job| *job *= 2);
        assert_eq!(jobs.iter().sum::<u64>(), 9900);

        let mut states = vec![Vec::new(); 3];
        dispatch_with_states(&dispatcher, &mut states, &|worker_index, state: &mut Vec<usize>| {
            state.push(worker_index);
        });
        assert_eq!(states, vec![vec![0], vec![1], vec![2]]);
    }
}
