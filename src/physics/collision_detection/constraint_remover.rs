use super::pair_cache::PairCache;
use crate::error::{require_capacity, require_multiplier, ConfigError};
use crate::physics::bodies::Bodies;
use crate::physics::constraint_batch::{ConstraintBatch, ConstraintBodies, TypeBatch};
use crate::physics::constraint_location::ConstraintLocation;
use crate::physics::handles::ConstraintHandle;
use crate::physics::solver::Solver;
use crate::utilities::collections::index_set::IndexSet;
use crate::utilities::memory::buffer_pool::BufferPool;
use crate::utilities::memory::id_pool::IdPool;
use std::ops::Range;
use tracing::debug;

/// Identifies a type batch by the batch it lives in and its constraint type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct TypeBatchIndex {
    pub batch: i32,
    pub type_id: i32,
}

/// Sizing policy of the constraint remover's per worker caches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstraintRemoverConfig {
    /// Minimum capacity of each worker's removal list for a single type batch.
    pub initial_capacity_per_type_batch: usize,
    /// Minimum number of type batches each worker cache has room for.
    pub initial_type_batch_count: usize,
    /// Multiplier applied to last frame's observed sizes when sizing the next frame's caches.
    pub previous_capacity_multiplier: f32,
}

impl Default for ConstraintRemoverConfig {
    fn default() -> Self {
        Self {
            initial_capacity_per_type_batch: 128,
            initial_type_batch_count: 4,
            previous_capacity_multiplier: 1.25,
        }
    }
}

impl ConstraintRemoverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_capacity("initial_capacity_per_type_batch", self.initial_capacity_per_type_batch)?;
        require_capacity("initial_type_batch_count", self.initial_type_batch_count)?;
        require_multiplier("previous_capacity_multiplier", self.previous_capacity_multiplier)
    }
}

/// One worker's removal requests, grouped by the type batch holding each constraint.
///
/// A worker rarely touches more than a handful of type batches, so lookups are a linear scan.
#[derive(Debug, Default)]
pub struct RemovalCache {
    type_batches: Vec<TypeBatchIndex>,
    handles_per_type_batch: Vec<Vec<ConstraintHandle>>,
    minimum_capacity_per_type_batch: usize,
}

impl RemovalCache {
    fn new(type_batch_capacity: usize, minimum_capacity_per_type_batch: usize, pool: &mut BufferPool) -> Self {
        Self {
            type_batches: pool.take_at_least(type_batch_capacity),
            handles_per_type_batch: pool.take_at_least(type_batch_capacity),
            minimum_capacity_per_type_batch,
        }
    }

    fn slot_for(&mut self, type_batch: TypeBatchIndex, pool: Option<&mut BufferPool>) -> usize {
        if let Some(index) = self.type_batches.iter().position(|&existing| existing == type_batch) {
            return index;
        }
        self.type_batches.push(type_batch);
        let handles = match pool {
            Some(pool) => pool.take_at_least(self.minimum_capacity_per_type_batch),
            None => Vec::with_capacity(self.minimum_capacity_per_type_batch),
        };
        self.handles_per_type_batch.push(handles);
        self.type_batches.len() - 1
    }

    /// Queues the removal of a live constraint. Only reads the constraint's location.
    pub fn enqueue(&mut self, handle: ConstraintHandle, handle_to_constraint: &[ConstraintLocation]) {
        let location = handle_to_constraint[handle.0 as usize];
        debug_assert!(location.is_used(), "{} does not refer to an existing constraint.", handle);
        let slot = self.slot_for(
            TypeBatchIndex {
                batch: location.batch_index,
                type_id: location.type_id,
            },
            None,
        );
        self.handles_per_type_batch[slot].push(handle);
    }

    /// Number of queued removals.
    pub fn count(&self) -> usize {
        self.handles_per_type_batch.iter().map(Vec::len).sum()
    }

    /// Queued handles in the order they were enqueued within each type batch.
    pub fn handles(&self) -> impl Iterator<Item = ConstraintHandle> + '_ {
        self.handles_per_type_batch.iter().flatten().copied()
    }

    fn dispose(&mut self, pool: &mut BufferPool) {
        for handles in self.handles_per_type_batch.drain(..) {
            pool.return_buffer(handles);
        }
        pool.return_buffer(std::mem::take(&mut self.handles_per_type_batch));
        pool.return_buffer(std::mem::take(&mut self.type_batches));
    }
}

/// A removed constraint's body links, captured before its type batch slot is reused.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BodyDetachment {
    pub handle: ConstraintHandle,
    pub bodies: ConstraintBodies,
    pub batch_index: usize,
}

/// Compacts the removed slots of a single type batch.
pub(crate) struct TypeBatchRemovalJob<'a> {
    type_batch: &'a mut TypeBatch,
    /// Slots to remove in descending order, so no pending slot is ever moved.
    removals: &'a [(usize, ConstraintHandle)],
    /// Constraints that were moved into removed slots, with their new index, in move order.
    moved: Vec<(ConstraintHandle, i32)>,
}

impl TypeBatchRemovalJob<'_> {
    fn execute(&mut self) {
        for &(index, handle) in self.removals {
            debug_assert_eq!(
                self.type_batch.index_to_handle[index], handle,
                "Removal slot no longer holds the constraint queued for removal."
            );
            if let Some(moved) = self.type_batch.remove_at(index) {
                self.moved.push(moved);
            }
        }
    }
}

/// A unit of work of the narrow phase's flush. Every job touches storage no other job in the
/// same dispatch touches.
pub(crate) enum NarrowPhaseFlushJob<'a> {
    RemoveConstraintsFromBodyLists {
        bodies: &'a mut Bodies,
        detachments: &'a [BodyDetachment],
    },
    RemoveConstraintsFromBatchReferencedHandles {
        referenced_handles: Vec<&'a mut IndexSet>,
        detachments: &'a [BodyDetachment],
    },
    ReturnConstraintHandles {
        handle_pool: &'a mut IdPool,
        handles: &'a [ConstraintHandle],
    },
    RemoveConstraintsFromTypeBatch(TypeBatchRemovalJob<'a>),
    FlushPairCacheChanges(&'a mut PairCache),
}

impl NarrowPhaseFlushJob<'_> {
    pub fn execute(&mut self) {
        match self {
            NarrowPhaseFlushJob::RemoveConstraintsFromBodyLists { bodies, detachments } => {
                for detachment in detachments.iter() {
                    for body in detachment.bodies.handles() {
                        bodies.remove_constraint_reference(body, detachment.handle);
                    }
                }
            }
            NarrowPhaseFlushJob::RemoveConstraintsFromBatchReferencedHandles {
                referenced_handles,
                detachments,
            } => {
                for detachment in detachments.iter() {
                    let handles = &mut referenced_handles[detachment.batch_index];
                    for body in detachment.bodies.dynamic_handles() {
                        handles.remove(body.0 as usize);
                    }
                }
            }
            NarrowPhaseFlushJob::ReturnConstraintHandles { handle_pool, handles } => {
                for handle in handles.iter() {
                    handle_pool.return_id(handle.0);
                }
            }
            NarrowPhaseFlushJob::RemoveConstraintsFromTypeBatch(job) => job.execute(),
            NarrowPhaseFlushJob::FlushPairCacheChanges(pair_cache) => pair_cache.flush_mapping_changes(),
        }
    }

    /// Moves reported by a type batch job. Empty for every other job.
    pub fn take_moved(&mut self) -> Vec<(ConstraintHandle, i32)> {
        match self {
            NarrowPhaseFlushJob::RemoveConstraintsFromTypeBatch(job) => std::mem::take(&mut job.moved),
            _ => Vec::new(),
        }
    }
}

/// Accumulates constraint removals from every worker during a frame and applies them in a few
/// independent passes: detaching bodies, clearing batch body references, returning handles and
/// compacting each affected type batch.
pub struct ConstraintRemover {
    config: ConstraintRemoverConfig,
    worker_caches: Vec<RemovalCache>,
    removed_handles: Vec<ConstraintHandle>,
    detachments: Vec<BodyDetachment>,
    // Removal slots of all type batches, grouped by type batch in key order.
    removals: Vec<(usize, ConstraintHandle)>,
    type_batch_ranges: Vec<(TypeBatchIndex, Range<usize>)>,
    previous_type_batch_count: usize,
    previous_capacity_per_type_batch: usize,
    pool: BufferPool,
}

impl ConstraintRemover {
    pub fn new(config: ConstraintRemoverConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            worker_caches: Vec::new(),
            removed_handles: Vec::new(),
            detachments: Vec::new(),
            removals: Vec::new(),
            type_batch_ranges: Vec::new(),
            previous_type_batch_count: 0,
            previous_capacity_per_type_batch: 0,
            pool: BufferPool::new(),
        })
    }

    fn scaled(&self, previous: usize, minimum: usize) -> usize {
        ((previous as f32 * self.config.previous_capacity_multiplier).ceil() as usize).max(minimum)
    }

    /// Allocates one removal cache per worker, sized from last frame's usage.
    pub fn prepare(&mut self, thread_count: usize) {
        for mut cache in std::mem::take(&mut self.worker_caches) {
            cache.dispose(&mut self.pool);
        }
        let type_batch_capacity = self.scaled(self.previous_type_batch_count, self.config.initial_type_batch_count);
        let capacity_per_type_batch = self.scaled(
            self.previous_capacity_per_type_batch,
            self.config.initial_capacity_per_type_batch,
        );
        for _ in 0..thread_count.max(1) {
            let cache = RemovalCache::new(type_batch_capacity, capacity_per_type_batch, &mut self.pool);
            self.worker_caches.push(cache);
        }
    }

    pub fn worker_caches(&self) -> &[RemovalCache] {
        &self.worker_caches
    }

    pub(crate) fn worker_caches_mut(&mut self) -> &mut [RemovalCache] {
        &mut self.worker_caches
    }

    /// Queues a removal from the calling thread. Workers use their own [`RemovalCache`].
    pub fn enqueue_removal(&mut self, worker_index: usize, handle: ConstraintHandle, solver: &Solver) {
        let location = solver.location(handle);
        let cache = &mut self.worker_caches[worker_index];
        let slot = cache.slot_for(
            TypeBatchIndex {
                batch: location.batch_index,
                type_id: location.type_id,
            },
            Some(&mut self.pool),
        );
        cache.handles_per_type_batch[slot].push(handle);
    }

    /// Number of removals queued across all workers.
    pub fn pending_removal_count(&self) -> usize {
        self.worker_caches.iter().map(RemovalCache::count).sum()
    }

    /// Merges every worker's requests into one removal plan. The plan is ordered by type batch
    /// and then by descending slot, which depends only on solver state and not on which worker
    /// found the removal.
    fn build_plan(&mut self, solver: &Solver) {
        self.removed_handles.clear();
        self.detachments.clear();
        self.removals.clear();
        self.type_batch_ranges.clear();

        let mut entries: Vec<(TypeBatchIndex, usize, ConstraintHandle)> =
            self.pool.take_at_least(self.pending_removal_count());
        for cache in &self.worker_caches {
            for (&key, handles) in cache.type_batches.iter().zip(&cache.handles_per_type_batch) {
                for &handle in handles {
                    let location = solver.location(handle);
                    debug_assert_eq!((location.batch_index, location.type_id), (key.batch, key.type_id));
                    entries.push((key, location.index_in_type_batch as usize, handle));
                }
            }
        }
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
        debug_assert!(
            entries.windows(2).all(|pair| pair[0].2 != pair[1].2 || pair[0].0 != pair[1].0),
            "A constraint was queued for removal more than once."
        );

        for &(key, index, handle) in &entries {
            match self.type_batch_ranges.last_mut() {
                Some((last_key, range)) if *last_key == key => range.end += 1,
                _ => {
                    let start = self.removals.len();
                    self.type_batch_ranges.push((key, start..start + 1));
                }
            }
            self.removals.push((index, handle));
            let batch = &solver.batches[key.batch as usize];
            self.detachments.push(BodyDetachment {
                handle,
                bodies: batch.get_type_batch(key.type_id).body_references[index],
                batch_index: key.batch as usize,
            });
            self.removed_handles.push(handle);
        }
        self.pool.return_buffer(entries);
    }

    /// Plans the queued removals and splits the solver into independent jobs that apply them.
    /// Run every job, then pass the moves they report to `postflush`.
    pub(crate) fn create_flush_jobs<'a>(&'a mut self, solver: &'a mut Solver) -> Vec<NarrowPhaseFlushJob<'a>> {
        self.build_plan(solver);
        let this: &'a ConstraintRemover = self;
        let mut jobs = Vec::new();
        if this.removed_handles.is_empty() {
            return jobs;
        }
        let Solver {
            batches,
            bodies,
            handle_pool,
            ..
        } = solver;
        let mut referenced_handles = Vec::with_capacity(batches.len());
        for (batch_index, batch) in batches.iter_mut().enumerate() {
            let ConstraintBatch {
                type_batches,
                referenced_handles: batch_handles,
                ..
            } = batch;
            referenced_handles.push(batch_handles);
            for type_batch in type_batches.iter_mut() {
                let key = TypeBatchIndex {
                    batch: batch_index as i32,
                    type_id: type_batch.type_id,
                };
                if let Ok(found) = this.type_batch_ranges.binary_search_by_key(&key, |(key, _)| *key) {
                    let range = this.type_batch_ranges[found].1.clone();
                    jobs.push(NarrowPhaseFlushJob::RemoveConstraintsFromTypeBatch(TypeBatchRemovalJob {
                        type_batch,
                        removals: &this.removals[range],
                        moved: Vec::new(),
                    }));
                }
            }
        }
        jobs.push(NarrowPhaseFlushJob::RemoveConstraintsFromBodyLists {
            bodies,
            detachments: &this.detachments,
        });
        jobs.push(NarrowPhaseFlushJob::RemoveConstraintsFromBatchReferencedHandles {
            referenced_handles,
            detachments: &this.detachments,
        });
        jobs.push(NarrowPhaseFlushJob::ReturnConstraintHandles {
            handle_pool,
            handles: &this.removed_handles,
        });
        jobs
    }

    /// Finishes a flush: retires removed handles, relocates moved constraints, drops type batches
    /// and trailing batches that became empty, and records sizes for the next frame.
    pub(crate) fn postflush(&mut self, solver: &mut Solver, moved: &[(ConstraintHandle, i32)]) {
        for &handle in &self.removed_handles {
            solver.handle_to_constraint[handle.0 as usize] = ConstraintLocation::UNUSED;
        }
        for &(handle, new_index) in moved {
            solver.handle_to_constraint[handle.0 as usize].index_in_type_batch = new_index;
        }
        // Highest batch first; only trailing batches can be removed.
        for (key, _) in self.type_batch_ranges.iter().rev() {
            let batch = &mut solver.batches[key.batch as usize];
            if let Some(type_batch_index) = batch.type_batch_index(key.type_id) {
                batch.remove_type_batch_if_empty(type_batch_index, &mut solver.pool);
            }
            solver.remove_batch_if_empty(key.batch as usize);
        }

        if !self.removed_handles.is_empty() {
            debug!(
                removed = self.removed_handles.len(),
                type_batches = self.type_batch_ranges.len(),
                moved = moved.len(),
                "removed constraints"
            );
        }
        for cache in &self.worker_caches {
            self.previous_type_batch_count = self.previous_type_batch_count.max(cache.type_batches.len());
            for handles in &cache.handles_per_type_batch {
                self.previous_capacity_per_type_batch = self.previous_capacity_per_type_batch.max(handles.len());
            }
        }
        for mut cache in std::mem::take(&mut self.worker_caches) {
            cache.dispose(&mut self.pool);
        }
        self.removed_handles.clear();
        self.detachments.clear();
        self.removals.clear();
        self.type_batch_ranges.clear();
    }

    /// Applies every queued removal on the calling thread.
    pub fn flush(&mut self, solver: &mut Solver) {
        let mut moved = Vec::new();
        for mut job in self.create_flush_jobs(solver) {
            job.execute();
            moved.extend(job.take_moved());
        }
        self.postflush(solver, &moved);
    }

    pub fn dispose(&mut self) {
        for mut cache in std::mem::take(&mut self.worker_caches) {
            cache.dispose(&mut self.pool);
        }
        self.pool.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collidables::collidable_reference::CollidableReference;
    use crate::physics::collision_detection::contact_constraint_accessor::{
        ContactConstraintDescription, ContactConstraintTypeId,
    };
    use crate::physics::handles::{BodyHandle, StaticHandle};

    fn add(solver: &mut Solver, a: i32, b: Option<i32>, contact_count: usize) -> ConstraintHandle {
        let bodies = ConstraintBodies::from_references(
            CollidableReference::dynamic(BodyHandle(a)),
            match b {
                Some(b) => CollidableReference::dynamic(BodyHandle(b)),
                None => CollidableReference::from_static(StaticHandle(0)),
            },
        );
        let type_id = ContactConstraintTypeId::new(contact_count, true, b.is_some());
        solver.add(type_id, bodies, &ContactConstraintDescription::default(), [0.0; 4])
    }

    #[test]
    fn config_validation() {
        assert!(ConstraintRemoverConfig::default().validate().is_ok());
        let config = ConstraintRemoverConfig {
            initial_type_batch_count: 0,
            ..Default::default()
        };
        assert!(ConstraintRemover::new(config).is_err());
    }

    #[test]
    fn workers_group_removals_by_type_batch() {
        let mut solver = Solver::new(16, 4, 16);
        let a = add(&mut solver, 0, Some(1), 1);
        let b = add(&mut solver, 2, Some(3), 1);
        let c = add(&mut solver, 4, None, 2);
        let mut cache = RemovalCache::default();
        cache.enqueue(a, solver.handle_to_constraint());
        cache.enqueue(c, solver.handle_to_constraint());
        cache.enqueue(b, solver.handle_to_constraint());
        assert_eq!(cache.type_batches.len(), 2);
        assert_eq!(cache.count(), 3);
        assert_eq!(cache.handles().collect::<Vec<_>>(), vec![a, b, c]);
    }

    #[test]
    fn flush_removes_constraints_from_every_structure() {
        let mut solver = Solver::new(16, 4, 16);
        let mut handles = Vec::new();
        for i in 0..6 {
            handles.push(add(&mut solver, i, Some(i + 1), 1));
        }
        let lone = add(&mut solver, 20, None, 3);
        assert!(solver.batches().len() >= 2);

        let mut remover = ConstraintRemover::new(ConstraintRemoverConfig::default()).unwrap();
        remover.prepare(2);
        remover.enqueue_removal(0, handles[0], &solver);
        remover.enqueue_removal(1, handles[2], &solver);
        remover.enqueue_removal(1, handles[3], &solver);
        remover.enqueue_removal(0, lone, &solver);
        assert_eq!(remover.pending_removal_count(), 4);
        remover.flush(&mut solver);

        for &removed in &[handles[0], handles[2], handles[3], lone] {
            assert!(!solver.constraint_exists(removed));
        }
        for &kept in &[handles[1], handles[4], handles[5]] {
            assert!(solver.constraint_exists(kept));
        }
        assert!(solver.validate_constraint_locations());
        assert_eq!(solver.count_constraints(), 3);
        assert!(solver.bodies().constraints_of(BodyHandle(0)).is_empty());
        assert!(solver.bodies().constraints_of(BodyHandle(20)).is_empty());
        assert_eq!(solver.bodies().constraints_of(BodyHandle(1)).len(), 1);
        assert_eq!(solver.bodies().constraint_reference_count(), 6);
        for batch in solver.batches() {
            assert!(!batch.referenced_handles.contains(0));
            assert!(!batch.referenced_handles.contains(20));
        }
        assert_eq!(solver.handle_pool().available_id_count(), 4);
        assert_eq!(remover.pending_removal_count(), 0);
    }

    #[test]
    fn removing_everything_drops_empty_batches() {
        let mut solver = Solver::new(16, 4, 16);
        let first = add(&mut solver, 0, Some(1), 1);
        let second = add(&mut solver, 1, Some(2), 1);
        assert_eq!(solver.batches().len(), 2);
        let mut remover = ConstraintRemover::new(ConstraintRemoverConfig::default()).unwrap();
        remover.prepare(1);
        remover.enqueue_removal(0, second, &solver);
        remover.enqueue_removal(0, first, &solver);
        remover.flush(&mut solver);
        assert!(solver.batches().is_empty());
        assert_eq!(solver.count_constraints(), 0);
    }
}
