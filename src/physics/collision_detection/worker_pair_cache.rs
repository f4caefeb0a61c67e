use super::contact_constraint_accessor::ContactConstraintTypeId;
use super::pair_cache::{
    CollidablePair, CollidablePairPointers, ConstraintCache, PairCacheConfig, PairCacheIndex, PairCacheReader,
};
use super::untyped_list::UntypedList;
use crate::physics::handles::ConstraintHandle;
use crate::utilities::memory::buffer_pool::BufferPool;

/// Number of constraint cache lists; constraint caches are grouped by contact count.
pub const CONSTRAINT_CACHE_TYPE_COUNT: usize = 4;

/// Cache type index used for collision detection cache entries.
pub const COLLISION_CACHE_TYPE: usize = 0;

/// A pair that showed up for the first time this frame.
#[derive(Debug, Clone, Copy)]
pub struct PendingAdd {
    pub pair: CollidablePair,
    pub pointers: CollidablePairPointers,
}

/// New cache locations for a pair that was already in the mapping.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingPointerUpdate {
    pub mapping_index: usize,
    pub pointers: CollidablePairPointers,
}

/// Capacities to allocate for a frame's worker caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkerCacheSizes {
    pub constraint_caches: [usize; CONSTRAINT_CACHE_TYPE_COUNT],
    pub collision_cache_count: usize,
    pub collision_cache_bytes: usize,
    pub pending: usize,
}

impl WorkerCacheSizes {
    pub fn minimum(config: &PairCacheConfig) -> Self {
        Self {
            constraint_caches: [config.minimum_per_type_capacity; CONSTRAINT_CACHE_TYPE_COUNT],
            collision_cache_count: config.minimum_per_type_capacity,
            collision_cache_bytes: config.minimum_per_type_capacity,
            pending: config.minimum_pending_size,
        }
    }

    /// Sizes for the next frame: the largest list any worker needed this frame, scaled up.
    /// Must run before the pending lists are drained.
    pub fn observe(caches: &[WorkerPairCache], config: &PairCacheConfig) -> Self {
        let scale = |observed: usize, multiplier: f32, minimum: usize| {
            ((observed as f32 * multiplier).ceil() as usize).max(minimum)
        };
        let mut sizes = Self::minimum(config);
        for cache in caches {
            for (size, list) in sizes.constraint_caches.iter_mut().zip(&cache.constraint_caches) {
                *size = (*size).max(scale(
                    list.len(),
                    config.previous_per_type_size_multiplier,
                    config.minimum_per_type_capacity,
                ));
            }
            sizes.collision_cache_count = sizes.collision_cache_count.max(scale(
                cache.collision_caches.count(),
                config.previous_per_type_size_multiplier,
                config.minimum_per_type_capacity,
            ));
            sizes.collision_cache_bytes = sizes.collision_cache_bytes.max(scale(
                cache.collision_caches.byte_count(),
                config.previous_per_type_size_multiplier,
                config.minimum_per_type_capacity,
            ));
            let pending = cache
                .pending_adds
                .len()
                .max(cache.pending_removes.len())
                .max(cache.pending_pointer_updates.len());
            sizes.pending = sizes.pending.max(scale(
                pending,
                config.previous_pending_size_multiplier,
                config.minimum_pending_size,
            ));
        }
        sizes
    }
}

/// One worker's shard of the pair cache for a single frame.
///
/// Only the owning worker writes to it while the narrow phase runs. Indices it hands out stay
/// valid until the frame after next, when the shard is disposed.
pub struct WorkerPairCache {
    worker_index: usize,
    constraint_caches: [Vec<ConstraintCache>; CONSTRAINT_CACHE_TYPE_COUNT],
    collision_caches: UntypedList,
    pub(crate) pending_adds: Vec<PendingAdd>,
    pub(crate) pending_pointer_updates: Vec<PendingPointerUpdate>,
    /// Stale pairs found by the freshness checker on this worker.
    pub(crate) pending_removes: Vec<CollidablePair>,
}

impl WorkerPairCache {
    pub(crate) fn new(worker_index: usize, sizes: &WorkerCacheSizes, pool: &mut BufferPool) -> Self {
        Self {
            worker_index,
            constraint_caches: sizes
                .constraint_caches
                .map(|capacity| pool.take_at_least(capacity)),
            collision_caches: UntypedList::new(sizes.collision_cache_count, sizes.collision_cache_bytes, pool),
            pending_adds: pool.take_at_least(sizes.pending),
            pending_pointer_updates: pool.take_at_least(sizes.pending),
            pending_removes: pool.take_at_least(sizes.pending),
        }
    }

    #[inline(always)]
    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    fn store(
        &mut self,
        type_id: ContactConstraintTypeId,
        constraint_cache: ConstraintCache,
        collision_cache: &[u8],
    ) -> CollidablePairPointers {
        debug_assert_eq!(
            constraint_cache.feature_ids().len(),
            type_id.contact_count(),
            "Constraint cache must match the constraint type's contact count."
        );
        let list = &mut self.constraint_caches[type_id.cache_type_index()];
        let constraint_index = PairCacheIndex::new(self.worker_index, type_id.index(), list.len());
        list.push(constraint_cache);
        let collision_detection_cache = if collision_cache.is_empty() {
            PairCacheIndex::default()
        } else {
            let index = self.collision_caches.add(collision_cache);
            PairCacheIndex::new(self.worker_index, COLLISION_CACHE_TYPE, index)
        };
        CollidablePairPointers {
            constraint_cache: constraint_index,
            collision_detection_cache,
        }
    }

    /// Stores the caches of a pair that is not yet in the mapping and queues its addition.
    /// Returns the location of the constraint cache.
    pub fn add(
        &mut self,
        pair: CollidablePair,
        type_id: ContactConstraintTypeId,
        constraint_cache: ConstraintCache,
        collision_cache: &[u8],
    ) -> PairCacheIndex {
        let pointers = self.store(type_id, constraint_cache, collision_cache);
        self.pending_adds.push(PendingAdd { pair, pointers });
        pointers.constraint_cache
    }

    /// Stores new caches for a pair already in the mapping and marks it fresh.
    /// Returns the location of the constraint cache.
    pub fn update(
        &mut self,
        previous: &PairCacheReader,
        mapping_index: usize,
        type_id: ContactConstraintTypeId,
        constraint_cache: ConstraintCache,
        collision_cache: &[u8],
    ) -> PairCacheIndex {
        previous.mark_fresh(mapping_index);
        let pointers = self.store(type_id, constraint_cache, collision_cache);
        self.pending_pointer_updates.push(PendingPointerUpdate {
            mapping_index,
            pointers,
        });
        pointers.constraint_cache
    }

    #[inline(always)]
    pub fn get_constraint_cache(&self, index: PairCacheIndex) -> &ConstraintCache {
        debug_assert_eq!(index.worker_index(), self.worker_index);
        &self.constraint_caches[index.type_index() & 3][index.index()]
    }

    #[inline(always)]
    pub fn get_collision_cache(&self, index: PairCacheIndex) -> &[u8] {
        debug_assert_eq!(index.worker_index(), self.worker_index);
        debug_assert_eq!(index.type_index(), COLLISION_CACHE_TYPE);
        self.collision_caches.get(index.index())
    }

    pub(crate) fn complete_constraint_add(&mut self, index: PairCacheIndex, handle: ConstraintHandle) {
        let cache = &mut self.constraint_caches[index.type_index() & 3][index.index()];
        debug_assert!(
            cache.constraint_handle.is_pending(),
            "A constraint cache can only be completed once."
        );
        cache.constraint_handle = handle;
    }

    /// Number of constraint caches stored per contact count.
    pub fn constraint_cache_counts(&self) -> [usize; CONSTRAINT_CACHE_TYPE_COUNT] {
        [0, 1, 2, 3].map(|i| self.constraint_caches[i].len())
    }

    pub fn pending_add_count(&self) -> usize {
        self.pending_adds.len()
    }

    pub fn pending_remove_count(&self) -> usize {
        self.pending_removes.len()
    }

    pub(crate) fn dispose(&mut self, pool: &mut BufferPool) {
        for list in &mut self.constraint_caches {
            pool.return_buffer(std::mem::take(list));
        }
        self.collision_caches.dispose(pool);
        pool.return_buffer(std::mem::take(&mut self.pending_adds));
        pool.return_buffer(std::mem::take(&mut self.pending_pointer_updates));
        pool.return_buffer(std::mem::take(&mut self.pending_removes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collidables::collidable_reference::CollidableReference;
    use crate::physics::collision_detection::contact_manifold::{Contact, ContactManifold};
    use crate::physics::handles::BodyHandle;

    fn cache(contact_count: usize) -> ConstraintCache {
        let mut manifold = ContactManifold::new(glam::Vec3::ZERO, true);
        for feature_id in 0..contact_count as i32 {
            manifold.add(Contact {
                feature_id,
                ..Default::default()
            });
        }
        ConstraintCache::from_manifold(ConstraintHandle::PENDING, &manifold)
    }

    fn pair(a: i32, b: i32) -> CollidablePair {
        CollidablePair::new(
            CollidableReference::dynamic(BodyHandle(a)),
            CollidableReference::dynamic(BodyHandle(b)),
        )
    }

    #[test]
    fn entries_are_grouped_by_contact_count() {
        let mut pool = BufferPool::new();
        let config = PairCacheConfig::default();
        let mut worker = WorkerPairCache::new(3, &WorkerCacheSizes::minimum(&config), &mut pool);
        let three = ContactConstraintTypeId::new(3, false, true);
        let one = ContactConstraintTypeId::new(1, true, false);
        let first = worker.add(pair(0, 1), three, cache(3), &[5]);
        let second = worker.add(pair(2, 3), one, cache(1), &[]);
        let third = worker.add(pair(4, 5), three, cache(3), &[6, 7]);

        assert_eq!((first.worker_index(), first.type_index(), first.index()), (3, three.index(), 0));
        assert_eq!((second.type_index(), second.index()), (one.index(), 0));
        assert_eq!(third.index(), 1);
        assert_eq!(worker.constraint_cache_counts(), [1, 0, 2, 0]);
        assert!(!worker.pending_adds[1].pointers.collision_detection_cache.exists());
        let collision = worker.pending_adds[2].pointers.collision_detection_cache;
        assert_eq!(worker.get_collision_cache(collision), &[6, 7]);

        worker.complete_constraint_add(third, ConstraintHandle(12));
        assert_eq!(worker.get_constraint_cache(third).constraint_handle, ConstraintHandle(12));
        assert!(worker.get_constraint_cache(first).constraint_handle.is_pending());
        worker.dispose(&mut pool);
    }

    #[test]
    fn sizes_grow_from_observed_counts() {
        let mut pool = BufferPool::new();
        let config = PairCacheConfig {
            minimum_per_type_capacity: 4,
            minimum_pending_size: 4,
            ..Default::default()
        };
        let mut worker = WorkerPairCache::new(0, &WorkerCacheSizes::minimum(&config), &mut pool);
        let two = ContactConstraintTypeId::new(2, true, true);
        for i in 0..10 {
            worker.add(pair(2 * i, 2 * i + 1), two, cache(2), &[]);
        }
        let sizes = WorkerCacheSizes::observe(std::slice::from_ref(&worker), &config);
        assert_eq!(sizes.constraint_caches, [4, 13, 4, 4]);
        assert_eq!(sizes.pending, 13);
        worker.dispose(&mut pool);
    }
}
