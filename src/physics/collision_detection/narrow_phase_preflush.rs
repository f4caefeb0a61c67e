use super::constraint_remover::{NarrowPhaseFlushJob, RemovalCache};
use super::contact_constraint_accessor::{ContactConstraintTypeId, CONTACT_CONSTRAINT_TYPE_COUNT};
use super::freshness_checker::FreshnessChecker;
use super::narrow_phase::{NarrowPhase, OverlapWorker};
use super::narrow_phase_callbacks::{INarrowPhaseCallbacks, IPairTester};
use super::narrow_phase_pending_constraint_adds::{speculative_constraint_batch_search, PendingConstraint};
use super::pair_cache::PairCacheIndex;
use super::worker_pair_cache::WorkerPairCache;
use crate::physics::constraint_batch::ConstraintBatch;
use crate::physics::handles::ConstraintHandle;
use crate::physics::solver::ConstraintAdder;
use crate::utilities::thread_dispatcher::{dispatch_jobs, dispatch_with_states, IThreadDispatcher};
use tracing::{debug, trace};

/// Number of pending constraints one speculative batch search job covers.
const SPECULATIVE_SEARCH_JOB_SIZE: usize = 64;

/// Locates a pending constraint across the workers' caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SortConstraintTarget {
    pub worker_index: usize,
    pub index: usize,
    pub sort_key: u64,
}

/// Work of the first, fully parallel preflush phase.
enum PreflushJob<'a> {
    /// Orders every worker's pending constraints of one type by sort key.
    SortContactConstraintType {
        type_id: ContactConstraintTypeId,
        targets: Vec<SortConstraintTarget>,
    },
    /// Finds a starting batch for a range of one worker's pending constraints of one type.
    SpeculativeConstraintBatchSearch {
        batches: &'a [ConstraintBatch],
        pending: &'a [PendingConstraint],
        results: &'a mut [u16],
    },
}

impl PreflushJob<'_> {
    fn execute(&mut self) {
        match self {
            PreflushJob::SortContactConstraintType { targets, .. } => {
                // Sort keys are unique per pair, so the order never depends on where a target came from.
                targets.sort_unstable_by_key(|target| target.sort_key);
            }
            PreflushJob::SpeculativeConstraintBatchSearch {
                batches,
                pending,
                results,
            } => speculative_constraint_batch_search(batches, pending, results),
        }
    }
}

/// Constraint additions and updates, run by a single worker.
struct ConstraintAddWork<'a> {
    adder: ConstraintAdder<'a>,
    overlap_workers: &'a [OverlapWorker],
    /// Globally sorted targets per type; `None` adds in generation order.
    sorted_targets: Option<&'a [Vec<SortConstraintTarget>; CONTACT_CONSTRAINT_TYPE_COUNT]>,
    completed: Vec<(PairCacheIndex, ConstraintHandle)>,
}

impl ConstraintAddWork<'_> {
    fn execute(&mut self) {
        for worker in self.overlap_workers {
            for update in &worker.pending_updates {
                self.adder.apply_description(update.handle, &update.description);
                self.adder.set_accumulated_impulses(update.handle, update.impulses);
            }
        }
        match self.sorted_targets {
            Some(sorted_targets) => {
                for (type_index, targets) in sorted_targets.iter().enumerate() {
                    let type_id = ContactConstraintTypeId::from_index(type_index);
                    for target in targets {
                        let cache = &self.overlap_workers[target.worker_index].pending_constraints;
                        let pending = &cache.pending(type_id)[target.index];
                        let handle = self.adder.add(
                            cache.speculative_batch_index(type_id, target.index),
                            type_id,
                            pending.bodies,
                            &pending.description,
                            pending.impulses,
                        );
                        self.completed.push((pending.constraint_cache, handle));
                    }
                }
            }
            None => {
                for worker in self.overlap_workers {
                    worker
                        .pending_constraints
                        .flush_sequentially(&mut self.adder, &mut self.completed);
                }
            }
        }
    }
}

/// Per-worker state of the second preflush phase. Worker 0 also carries the constraint adds.
struct PreflushWorker<'a> {
    add_work: Option<ConstraintAddWork<'a>>,
    pair_cache: &'a mut WorkerPairCache,
    removals: &'a mut RemovalCache,
}

fn dispatch_states<S: Send>(
    thread_dispatcher: Option<&dyn IThreadDispatcher>,
    states: &mut [S],
    worker_body: &(dyn Fn(usize, &mut S) + Sync),
) {
    match thread_dispatcher {
        Some(dispatcher) if dispatcher.thread_count() > 1 && states.len() > 1 => {
            dispatch_with_states(dispatcher, states, worker_body)
        }
        _ => {
            for (worker_index, state) in states.iter_mut().enumerate() {
                worker_body(worker_index, state);
            }
        }
    }
}

impl<C: INarrowPhaseCallbacks, T: IPairTester> NarrowPhase<C, T> {
    /// Applies the frame's queued changes to the solver and the pair cache.
    ///
    /// Phase one sorts pending constraints (deterministic mode only) and searches speculative
    /// start batches in parallel. Phase two adds constraints on one worker while the others
    /// check freshness. The remaining removal and mapping work is then split into independent
    /// jobs, followed by a sequential postflush.
    pub(crate) fn preflush(&mut self, thread_dispatcher: Option<&dyn IThreadDispatcher>) {
        let deterministic = self.config().deterministic;
        let thread_count = self.overlap_workers.len();
        let NarrowPhase {
            solver,
            pair_cache,
            constraint_remover,
            overlap_workers,
            ..
        } = self;

        let mut counts_by_type = [0usize; CONTACT_CONSTRAINT_TYPE_COUNT];
        for worker in overlap_workers.iter() {
            for (count, worker_count) in counts_by_type.iter_mut().zip(worker.pending_constraints.counts_by_type()) {
                *count += worker_count;
            }
        }
        let add_count: usize = counts_by_type.iter().sum();
        let update_count: usize = overlap_workers.iter().map(|worker| worker.pending_updates.len()).sum();

        let mut sorted_targets: [Vec<SortConstraintTarget>; CONTACT_CONSTRAINT_TYPE_COUNT] = Default::default();
        if add_count > 0 {
            let mut jobs = Vec::new();
            if deterministic {
                for (type_index, &count) in counts_by_type.iter().enumerate() {
                    if count == 0 {
                        continue;
                    }
                    let type_id = ContactConstraintTypeId::from_index(type_index);
                    let mut targets = Vec::with_capacity(count);
                    for (worker_index, worker) in overlap_workers.iter().enumerate() {
                        for (index, pending) in worker.pending_constraints.pending(type_id).iter().enumerate() {
                            targets.push(SortConstraintTarget {
                                worker_index,
                                index,
                                sort_key: pending.sort_key,
                            });
                        }
                    }
                    jobs.push(PreflushJob::SortContactConstraintType { type_id, targets });
                }
            }
            let batches: &[ConstraintBatch] = &solver.batches;
            for worker in overlap_workers.iter_mut() {
                let (pending_by_type, results_by_type) = worker.pending_constraints.split_for_speculative_search();
                for (pending, results) in pending_by_type.iter().zip(results_by_type.iter_mut()) {
                    for (pending, results) in pending
                        .chunks(SPECULATIVE_SEARCH_JOB_SIZE)
                        .zip(results.chunks_mut(SPECULATIVE_SEARCH_JOB_SIZE))
                    {
                        jobs.push(PreflushJob::SpeculativeConstraintBatchSearch {
                            batches,
                            pending,
                            results,
                        });
                    }
                }
            }
            dispatch_jobs(thread_dispatcher, &mut jobs, &|_, job| job.execute());
            for job in jobs {
                if let PreflushJob::SortContactConstraintType { type_id, targets } = job {
                    sorted_targets[type_id.index()] = targets;
                }
            }
        }

        let (staged, completed) = {
            let overlap_workers: &[OverlapWorker] = overlap_workers;
            let adder = solver.begin_adds();
            let handle_to_constraint = adder.handle_to_constraint();
            let (previous, next_caches) = pair_cache.split_for_workers();
            let checker = FreshnessChecker::new(previous, handle_to_constraint, thread_count);
            let mut add_work = Some(ConstraintAddWork {
                adder,
                overlap_workers,
                sorted_targets: deterministic.then_some(&sorted_targets),
                completed: Vec::with_capacity(add_count),
            });
            let mut states: Vec<PreflushWorker> = next_caches
                .iter_mut()
                .zip(constraint_remover.worker_caches_mut().iter_mut())
                .map(|(pair_cache, removals)| PreflushWorker {
                    add_work: add_work.take(),
                    pair_cache,
                    removals,
                })
                .collect();
            dispatch_states(thread_dispatcher, &mut states, &|_, state| {
                if let Some(work) = state.add_work.as_mut() {
                    work.execute();
                }
                checker.check_freshness(state.removals, &mut state.pair_cache.pending_removes);
            });
            match states.first_mut().and_then(|state| state.add_work.take()) {
                Some(work) => {
                    let staged = work.adder.finish();
                    (staged, work.completed)
                }
                None => (Vec::new(), Vec::new()),
            }
        };
        solver.apply_staged_locations(staged);
        for &(constraint_cache, handle) in &completed {
            pair_cache.complete_constraint_add(constraint_cache, handle);
        }
        if add_count > 0 || update_count > 0 {
            debug!(added = add_count, updated = update_count, deterministic, "flushed constraint changes");
            for (type_index, &count) in counts_by_type.iter().enumerate() {
                if count > 0 {
                    trace!(constraint_type = %ContactConstraintTypeId::from_index(type_index), count, "added constraints");
                }
            }
        }

        let moved: Vec<_> = {
            let mut jobs = constraint_remover.create_flush_jobs(solver);
            jobs.push(NarrowPhaseFlushJob::FlushPairCacheChanges(pair_cache));
            dispatch_jobs(thread_dispatcher, &mut jobs, &|_, job| job.execute());
            jobs.iter_mut().flat_map(NarrowPhaseFlushJob::take_moved).collect()
        };
        constraint_remover.postflush(solver, &moved);
        pair_cache.postflush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_jobs_order_by_key() {
        let mut job = PreflushJob::SortContactConstraintType {
            type_id: ContactConstraintTypeId::from_index(9),
            targets: [5u64, 1, 9, 3]
                .iter()
                .enumerate()
                .map(|(index, &sort_key)| SortConstraintTarget {
                    worker_index: index % 2,
                    index,
                    sort_key,
                })
                .collect(),
        };
        job.execute();
        let PreflushJob::SortContactConstraintType { targets, .. } = job else {
            unreachable!();
        };
        let keys: Vec<u64> = targets.iter().map(|target| target.sort_key).collect();
        assert_eq!(keys, vec![1, 3, 5, 9]);
        assert_eq!(targets[0].index, 1);
    }
}
