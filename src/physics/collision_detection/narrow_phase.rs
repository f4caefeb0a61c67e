use super::constraint_remover::{ConstraintRemover, ConstraintRemoverConfig, RemovalCache};
use super::contact_constraint_accessor::{
    redistribute_impulses, ContactConstraintDescription, ContactConstraintTypeId,
};
use super::contact_manifold::ContactManifold;
use super::narrow_phase_callbacks::{INarrowPhaseCallbacks, IPairTester, PairMaterialProperties};
use super::narrow_phase_pending_constraint_adds::{PendingConstraintAddCache, PendingConstraintUpdate};
use super::pair_cache::{CollidablePair, ConstraintCache, PairCache, PairCacheConfig, PairCacheReader};
use super::worker_pair_cache::WorkerPairCache;
use crate::error::{require_capacity, ConfigError};
use crate::physics::collidables::collidable_reference::{CollidableMobility, CollidableReference};
use crate::physics::constraint_batch::ConstraintBodies;
use crate::physics::handles::ConstraintHandle;
use crate::physics::solver::Solver;
use crate::utilities::memory::buffer_pool::BufferPool;
use crate::utilities::thread_dispatcher::IThreadDispatcher;

/// Settings of the narrow phase and the caches it owns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NarrowPhaseConfig {
    /// Whether constraint additions are ordered so that the constraint graph does not depend on
    /// thread scheduling. Costs a sort per frame.
    pub deterministic: bool,
    pub pair_cache: PairCacheConfig,
    pub constraint_remover: ConstraintRemoverConfig,
    /// Capacity each worker reserves for a constraint type the first time it sees it.
    pub minimum_pending_constraint_capacity: usize,
}

impl Default for NarrowPhaseConfig {
    fn default() -> Self {
        Self {
            deterministic: false,
            pair_cache: PairCacheConfig::default(),
            constraint_remover: ConstraintRemoverConfig::default(),
            minimum_pending_constraint_capacity: 128,
        }
    }
}

impl NarrowPhaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pair_cache.validate()?;
        self.constraint_remover.validate()?;
        require_capacity(
            "minimum_pending_constraint_capacity",
            self.minimum_pending_constraint_capacity,
        )
    }
}

const COLLISION_CACHE_SCRATCH_CAPACITY: usize = 64;

/// Per-thread state the narrow phase accumulates while overlaps are handled.
#[derive(Debug)]
pub(crate) struct OverlapWorker {
    pub pending_constraints: PendingConstraintAddCache,
    pub pending_updates: Vec<PendingConstraintUpdate>,
    // Scratch space handed to the pair tester for the next collision cache.
    collision_cache: Vec<u8>,
}

impl OverlapWorker {
    fn new(minimum_pending_constraint_capacity: usize) -> Self {
        Self {
            pending_constraints: PendingConstraintAddCache::new(minimum_pending_constraint_capacity),
            pending_updates: Vec::new(),
            collision_cache: Vec::new(),
        }
    }

    fn clear(&mut self) {
        self.pending_constraints.clear();
        self.pending_updates.clear();
        self.collision_cache.clear();
    }

    /// Swaps the frame's transient buffers for ones taken from the worker's own pool.
    fn take_frame_buffers(&mut self, pool: &mut BufferPool, minimum_update_capacity: usize) {
        let pending_updates = pool.take_at_least(minimum_update_capacity);
        pool.return_buffer(std::mem::replace(&mut self.pending_updates, pending_updates));
        let collision_cache = pool.take_at_least(COLLISION_CACHE_SCRATCH_CAPACITY);
        pool.return_buffer(std::mem::replace(&mut self.collision_cache, collision_cache));
    }

    fn return_frame_buffers(&mut self, pool: &mut BufferPool) {
        pool.return_buffer(std::mem::take(&mut self.pending_updates));
        pool.return_buffer(std::mem::take(&mut self.collision_cache));
    }
}

/// Turns broad phase overlaps into contact manifolds and uses them to manage constraints in the solver.
///
/// A frame runs `prepare`, then hands overlaps to the per-thread [`NarrowPhaseWorker`]s, then
/// calls `flush`. Workers only write into their own shards; every change to the solver and to
/// the pair mapping happens inside `flush`.
pub struct NarrowPhase<C: INarrowPhaseCallbacks, T: IPairTester> {
    pub callbacks: C,
    pub pair_tester: T,
    pub(crate) solver: Solver,
    pub(crate) pair_cache: PairCache,
    pub(crate) constraint_remover: ConstraintRemover,
    pub(crate) overlap_workers: Vec<OverlapWorker>,
    config: NarrowPhaseConfig,
}

impl<C: INarrowPhaseCallbacks, T: IPairTester> NarrowPhase<C, T> {
    pub fn new(callbacks: C, pair_tester: T, solver: Solver, config: NarrowPhaseConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            callbacks,
            pair_tester,
            solver,
            pair_cache: PairCache::new(config.pair_cache)?,
            constraint_remover: ConstraintRemover::new(config.constraint_remover)?,
            overlap_workers: Vec::new(),
            config,
        })
    }

    pub fn config(&self) -> &NarrowPhaseConfig {
        &self.config
    }

    pub fn solver(&self) -> &Solver {
        &self.solver
    }

    /// Mutable solver access. Must not be used between `prepare` and `flush`.
    pub fn solver_mut(&mut self) -> &mut Solver {
        &mut self.solver
    }

    pub fn pair_cache(&self) -> &PairCache {
        &self.pair_cache
    }

    /// Number of workers the current frame was prepared for.
    pub fn worker_count(&self) -> usize {
        self.overlap_workers.len()
    }

    /// Sizes the per-worker state for a frame run on `thread_dispatcher`'s threads, or on the
    /// calling thread alone if there is no dispatcher. With a dispatcher, each worker's
    /// transient buffers come from that worker's pool and go back to it in `flush`.
    pub fn prepare(&mut self, thread_dispatcher: Option<&dyn IThreadDispatcher>) {
        let thread_count = thread_dispatcher.map_or(1, |dispatcher| dispatcher.thread_count()).max(1);
        self.pair_cache.prepare(thread_count);
        self.constraint_remover.prepare(thread_count);
        let minimum_capacity = self.config.minimum_pending_constraint_capacity;
        self.overlap_workers
            .resize_with(thread_count, || OverlapWorker::new(minimum_capacity));
        for worker in &mut self.overlap_workers {
            worker.clear();
        }
        if let Some(dispatcher) = thread_dispatcher {
            let pools = dispatcher.worker_pools();
            let worker_count = pools.worker_count();
            for (worker_index, worker) in self.overlap_workers.iter_mut().enumerate().take(worker_count) {
                worker.take_frame_buffers(&mut pools.pool(worker_index), minimum_capacity);
            }
        }
    }

    /// Gets the view a single worker uses to handle overlaps. Only valid after `prepare`.
    pub fn worker(&mut self, worker_index: usize) -> NarrowPhaseWorker<'_, C, T> {
        let NarrowPhase {
            callbacks,
            pair_tester,
            solver,
            pair_cache,
            constraint_remover,
            overlap_workers,
            ..
        } = self;
        let (previous, next_caches) = pair_cache.split_for_workers();
        NarrowPhaseWorker {
            worker_index,
            callbacks,
            pair_tester,
            solver,
            previous,
            pair_cache: &mut next_caches[worker_index],
            removals: &mut constraint_remover.worker_caches_mut()[worker_index],
            overlap_worker: &mut overlap_workers[worker_index],
        }
    }

    /// Gets one view per prepared worker; each can be moved to its own thread.
    pub fn workers(&mut self) -> Vec<NarrowPhaseWorker<'_, C, T>> {
        let NarrowPhase {
            callbacks,
            pair_tester,
            solver,
            pair_cache,
            constraint_remover,
            overlap_workers,
            ..
        } = self;
        let callbacks: &C = callbacks;
        let pair_tester: &T = pair_tester;
        let solver: &Solver = solver;
        let (previous, next_caches) = pair_cache.split_for_workers();
        next_caches
            .iter_mut()
            .zip(constraint_remover.worker_caches_mut().iter_mut())
            .zip(overlap_workers.iter_mut())
            .enumerate()
            .map(|(worker_index, ((pair_cache, removals), overlap_worker))| NarrowPhaseWorker {
                worker_index,
                callbacks,
                pair_tester,
                solver,
                previous,
                pair_cache,
                removals,
                overlap_worker,
            })
            .collect()
    }

    /// Handles an overlap on the given worker. See [`NarrowPhaseWorker::handle_overlap`].
    pub fn handle_overlap(&mut self, worker_index: usize, a: CollidableReference, b: CollidableReference) {
        self.worker(worker_index).handle_overlap(a, b);
    }

    /// See [`NarrowPhaseWorker::update_constraints_for_pair`].
    pub fn update_constraints_for_pair(
        &mut self,
        worker_index: usize,
        pair: CollidablePair,
        manifold: ContactManifold,
        material: PairMaterialProperties,
        collision_cache: &[u8],
    ) {
        self.worker(worker_index)
            .update_constraints_for_pair(pair, manifold, material, collision_cache);
    }

    /// Ends the frame: lets the callbacks flush, then applies every constraint addition, update
    /// and removal the workers queued, removes pairs nobody touched and swaps the pair caches.
    pub fn flush(&mut self, thread_dispatcher: Option<&dyn IThreadDispatcher>) {
        if self.pair_cache.next_worker_caches().is_empty() {
            self.prepare(None);
        }
        self.callbacks.flush(thread_dispatcher);
        self.preflush(thread_dispatcher);
        let pools = thread_dispatcher.map(|dispatcher| dispatcher.worker_pools());
        for (worker_index, worker) in self.overlap_workers.iter_mut().enumerate() {
            worker.clear();
            if let Some(pools) = pools.filter(|pools| worker_index < pools.worker_count()) {
                worker.return_frame_buffers(&mut pools.pool(worker_index));
            }
        }
    }

    /// Drops every cached pair. Constraints already in the solver are left alone.
    pub fn clear(&mut self) {
        self.pair_cache.clear();
        for worker in &mut self.overlap_workers {
            worker.clear();
        }
    }

    pub fn dispose(&mut self) {
        self.pair_cache.dispose();
        self.constraint_remover.dispose();
        for worker in &mut self.overlap_workers {
            worker.pending_constraints.dispose();
        }
        self.overlap_workers.clear();
        self.callbacks.dispose();
    }
}

/// One worker's view of the narrow phase during a frame.
///
/// Reads the previous frame's pair cache and the solver; writes only to the worker's own pair
/// cache shard, removal cache and pending constraint lists.
pub struct NarrowPhaseWorker<'a, C, T> {
    worker_index: usize,
    callbacks: &'a C,
    pair_tester: &'a T,
    solver: &'a Solver,
    previous: PairCacheReader<'a>,
    pair_cache: &'a mut WorkerPairCache,
    removals: &'a mut RemovalCache,
    overlap_worker: &'a mut OverlapWorker,
}

impl<'a, C: INarrowPhaseCallbacks, T: IPairTester> NarrowPhaseWorker<'a, C, T> {
    #[inline(always)]
    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    /// Tests a pair of overlapping collidables and queues whatever constraint changes the
    /// resulting manifold calls for.
    pub fn handle_overlap(&mut self, a: CollidableReference, b: CollidableReference) {
        debug_assert!(
            a.is_body() || b.is_body(),
            "Static-static pairs should never be reported by the broad phase."
        );
        if !(a.is_body() || b.is_body()) {
            return;
        }
        if !self.callbacks.allow_contact_generation(self.worker_index, a, b) {
            return;
        }
        let pair = CollidablePair::new(a, b).normalized();
        let mapping_index = self.previous.index_of(&pair);
        let previous_collision_cache = mapping_index.and_then(|index| {
            self.previous
                .get_collision_cache(self.previous.get_pointers(index).collision_detection_cache)
        });
        let mut collision_cache = std::mem::take(&mut self.overlap_worker.collision_cache);
        collision_cache.clear();
        let mut manifold = self
            .pair_tester
            .test(self.worker_index, pair, previous_collision_cache, &mut collision_cache);
        let mut material = PairMaterialProperties::default();
        if self
            .callbacks
            .configure_contact_manifold(self.worker_index, pair, &mut manifold, &mut material)
        {
            self.update_constraints(pair, mapping_index, manifold, material, &collision_cache);
        }
        self.overlap_worker.collision_cache = collision_cache;
    }

    /// Queues the constraint changes for a pair whose manifold was computed elsewhere.
    ///
    /// Empty manifolds and pairs without a dynamic body produce nothing, which leaves the pair
    /// unmarked so the flush removes it.
    pub fn update_constraints_for_pair(
        &mut self,
        pair: CollidablePair,
        manifold: ContactManifold,
        material: PairMaterialProperties,
        collision_cache: &[u8],
    ) {
        let pair = pair.normalized();
        let mapping_index = self.previous.index_of(&pair);
        self.update_constraints(pair, mapping_index, manifold, material, collision_cache);
    }

    fn update_constraints(
        &mut self,
        pair: CollidablePair,
        mapping_index: Option<usize>,
        manifold: ContactManifold,
        material: PairMaterialProperties,
        collision_cache: &[u8],
    ) {
        if manifold.count() == 0
            || (pair.a.mobility() != CollidableMobility::Dynamic
                && pair.b.mobility() != CollidableMobility::Dynamic)
        {
            return;
        }
        let type_id = ContactConstraintTypeId::for_manifold(&manifold, pair.b.is_body());
        let description = ContactConstraintDescription { manifold, material };
        match mapping_index {
            Some(mapping_index) => {
                let old_pointers = self.previous.get_pointers(mapping_index);
                let old_cache = self.previous.get_constraint_cache(old_pointers.constraint_cache);
                let old_handle = old_cache.constraint_handle;
                let impulses = redistribute_impulses(
                    old_cache.feature_ids(),
                    &self.solver.get_accumulated_impulses(old_handle),
                    &manifold,
                );
                if old_pointers.constraint_cache.type_index() == type_id.index() {
                    self.pair_cache.update(
                        &self.previous,
                        mapping_index,
                        type_id,
                        ConstraintCache::from_manifold(old_handle, &manifold),
                        collision_cache,
                    );
                    self.overlap_worker.pending_updates.push(PendingConstraintUpdate {
                        handle: old_handle,
                        description,
                        impulses,
                    });
                } else {
                    // The constraint changes type; it is replaced by a new one.
                    let constraint_cache = self.pair_cache.update(
                        &self.previous,
                        mapping_index,
                        type_id,
                        ConstraintCache::from_manifold(ConstraintHandle::PENDING, &manifold),
                        collision_cache,
                    );
                    self.overlap_worker.pending_constraints.add_constraint(
                        type_id,
                        constraint_cache,
                        pair.sort_key(),
                        ConstraintBodies::from_references(pair.a, pair.b),
                        description,
                        impulses,
                    );
                    self.removals.enqueue(old_handle, self.solver.handle_to_constraint());
                }
            }
            None => {
                let constraint_cache = self.pair_cache.add(
                    pair,
                    type_id,
                    ConstraintCache::from_manifold(ConstraintHandle::PENDING, &manifold),
                    collision_cache,
                );
                self.overlap_worker.pending_constraints.add_constraint(
                    type_id,
                    constraint_cache,
                    pair.sort_key(),
                    ConstraintBodies::from_references(pair.a, pair.b),
                    description,
                    [0.0; 4],
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collision_detection::contact_manifold::Contact;
    use crate::physics::handles::{BodyHandle, StaticHandle};
    use crate::utilities::thread_dispatcher::SimpleThreadDispatcher;
    use glam::Vec3;

    /// Produces one contact per pair; the feature id is the sum of the raw handles.
    struct OneContactTester;

    impl IPairTester for OneContactTester {
        fn test(
            &self,
            _worker_index: usize,
            pair: CollidablePair,
            previous_collision_cache: Option<&[u8]>,
            next_collision_cache: &mut Vec<u8>,
        ) -> ContactManifold {
            let frames = previous_collision_cache.map_or(0, |cache| cache[0]);
            next_collision_cache.push(frames.wrapping_add(1));
            let mut manifold = ContactManifold::new(Vec3::X, true);
            manifold.add(Contact {
                offset: Vec3::ZERO,
                normal: Vec3::X,
                depth: 0.1,
                feature_id: pair.a.raw_handle_value() + pair.b.raw_handle_value(),
            });
            manifold
        }
    }

    struct AcceptAll;

    impl INarrowPhaseCallbacks for AcceptAll {
        fn allow_contact_generation(&self, _: usize, _: CollidableReference, _: CollidableReference) -> bool {
            true
        }

        fn configure_contact_manifold(
            &self,
            _: usize,
            _: CollidablePair,
            _: &mut ContactManifold,
            _: &mut PairMaterialProperties,
        ) -> bool {
            true
        }
    }

    fn narrow_phase() -> NarrowPhase<AcceptAll, OneContactTester> {
        NarrowPhase::new(AcceptAll, OneContactTester, Solver::new(16, 4, 64), NarrowPhaseConfig::default()).unwrap()
    }

    fn body(handle: i32) -> CollidableReference {
        CollidableReference::dynamic(BodyHandle(handle))
    }

    #[test]
    fn frame_buffers_cycle_through_worker_pools() {
        let dispatcher = SimpleThreadDispatcher::new(2).unwrap();
        let mut narrow_phase = narrow_phase();
        narrow_phase.prepare(Some(&dispatcher));
        narrow_phase.handle_overlap(1, body(0), body(1));
        narrow_phase.flush(Some(&dispatcher));
        for worker_index in 0..2 {
            assert_eq!(dispatcher.worker_pools().pool(worker_index).pooled_buffer_count(), 2);
        }

        narrow_phase.prepare(Some(&dispatcher));
        for worker_index in 0..2 {
            assert_eq!(dispatcher.worker_pools().pool(worker_index).pooled_buffer_count(), 0);
        }
        narrow_phase.handle_overlap(0, body(1), body(0));
        narrow_phase.flush(Some(&dispatcher));
        assert_eq!(narrow_phase.solver().count_constraints(), 1);
        assert_eq!(dispatcher.worker_pools().pool(0).pooled_buffer_count(), 2);
    }

    #[test]
    fn config_validation() {
        assert!(NarrowPhaseConfig::default().validate().is_ok());
        let config = NarrowPhaseConfig {
            minimum_pending_constraint_capacity: 0,
            ..Default::default()
        };
        assert!(NarrowPhase::new(AcceptAll, OneContactTester, Solver::new(4, 4, 4), config).is_err());
    }

    #[test]
    fn persistent_pairs_keep_their_constraint_and_cache() {
        let mut narrow_phase = narrow_phase();
        let pair = CollidablePair::new(body(1), body(0));
        narrow_phase.prepare(None);
        narrow_phase.handle_overlap(0, body(1), body(0));
        narrow_phase.flush(None);
        let handle = narrow_phase.pair_cache().constraint_handle_of(&pair).unwrap();
        assert!(narrow_phase.solver().constraint_exists(handle));
        assert_eq!(narrow_phase.solver().get_accumulated_impulses(handle), [0.0; 4]);

        narrow_phase.solver_mut().set_accumulated_impulses(handle, [0.5, 0.0, 0.0, 0.0]);
        narrow_phase.prepare(None);
        narrow_phase.handle_overlap(0, body(0), body(1));
        narrow_phase.flush(None);
        assert_eq!(narrow_phase.pair_cache().constraint_handle_of(&pair), Some(handle));
        assert_eq!(narrow_phase.solver().get_accumulated_impulses(handle)[0], 0.5);
        let pointers = narrow_phase
            .pair_cache()
            .get_pointers(narrow_phase.pair_cache().index_of(&pair).unwrap());
        assert_eq!(
            narrow_phase.pair_cache().get_collision_cache(pointers.collision_detection_cache),
            Some(&[2u8][..])
        );

        narrow_phase.prepare(None);
        narrow_phase.flush(None);
        assert_eq!(narrow_phase.pair_cache().index_of(&pair), None);
        assert!(!narrow_phase.solver().constraint_exists(handle));
        assert_eq!(narrow_phase.solver().count_constraints(), 0);
    }

    #[test]
    fn pairs_without_dynamic_bodies_make_no_constraints() {
        let mut narrow_phase = narrow_phase();
        let kinematic = CollidableReference::kinematic(BodyHandle(3));
        let statik = CollidableReference::from_static(StaticHandle(0));
        narrow_phase.prepare(None);
        narrow_phase.handle_overlap(0, kinematic, statik);
        narrow_phase.handle_overlap(0, statik, body(4));
        narrow_phase.flush(None);
        assert_eq!(narrow_phase.solver().count_constraints(), 1);
        assert_eq!(narrow_phase.pair_cache().mapping().count(), 1);
        let handle = narrow_phase
            .pair_cache()
            .constraint_handle_of(&CollidablePair::new(body(4), statik))
            .unwrap();
        assert!(!narrow_phase.solver().constraint_type(handle).is_two_body());
    }

    #[test]
    fn type_changes_replace_the_constraint() {
        let mut narrow_phase = narrow_phase();
        let pair = CollidablePair::new(body(0), body(1));
        narrow_phase.prepare(None);
        narrow_phase.handle_overlap(0, pair.a, pair.b);
        narrow_phase.flush(None);
        let old_handle = narrow_phase.pair_cache().constraint_handle_of(&pair).unwrap();
        narrow_phase.solver_mut().set_accumulated_impulses(old_handle, [0.25, 0.0, 0.0, 0.0]);

        let mut manifold = ContactManifold::new(Vec3::X, true);
        for feature_id in [1, 9] {
            manifold.add(Contact {
                feature_id,
                depth: 0.1,
                ..Default::default()
            });
        }
        narrow_phase.prepare(None);
        narrow_phase.update_constraints_for_pair(0, pair, manifold, PairMaterialProperties::default(), &[]);
        narrow_phase.flush(None);

        let new_handle = narrow_phase.pair_cache().constraint_handle_of(&pair).unwrap();
        let solver = narrow_phase.solver();
        assert_eq!(solver.count_constraints(), 1);
        assert_eq!(solver.constraint_type(new_handle).contact_count(), 2);
        assert_eq!(solver.get_accumulated_impulses(new_handle), [0.25, 0.0, 0.0, 0.0]);
        assert!(solver.validate_constraint_locations());
    }
}
