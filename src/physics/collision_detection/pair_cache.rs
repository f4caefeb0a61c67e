use super::contact_manifold::{ContactManifold, MAXIMUM_CONTACT_COUNT};
use super::worker_pair_cache::{WorkerCacheSizes, WorkerPairCache};
use crate::error::{require_capacity, require_multiplier, ConfigError};
use crate::physics::collidables::collidable_reference::CollidableReference;
use crate::physics::handles::ConstraintHandle;
use crate::utilities::collections::quick_dictionary::QuickDictionary;
use crate::utilities::memory::buffer_pool::BufferPool;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Pair of collidable references.
///
/// Equality and hashing ignore slot order; the trees report overlaps in whatever order they
/// find them.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CollidablePair {
    pub a: CollidableReference,
    pub b: CollidableReference,
}

const _: () = {
    assert!(std::mem::size_of::<CollidablePair>() == 8);
};

impl CollidablePair {
    #[inline(always)]
    pub fn new(a: CollidableReference, b: CollidableReference) -> Self {
        Self { a, b }
    }

    /// Puts the pair in the slot order constraints use: a static always goes in B, and between
    /// two bodies the lower handle goes in A.
    #[inline]
    pub fn normalized(self) -> Self {
        let swap = match (self.a.is_body(), self.b.is_body()) {
            (false, true) => true,
            (true, true) => self.a.raw_handle_value() > self.b.raw_handle_value(),
            _ => false,
        };
        if swap {
            Self::new(self.b, self.a)
        } else {
            self
        }
    }

    /// Key used to order pending constraint additions in deterministic mode. Unique per pair
    /// once the pair is normalized.
    #[inline(always)]
    pub fn sort_key(&self) -> u64 {
        (self.a.packed as u64) << 32 | self.b.packed as u64
    }
}

impl PartialEq for CollidablePair {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        (self.a == other.a && self.b == other.b) || (self.a == other.b && self.b == other.a)
    }
}

impl Eq for CollidablePair {}

impl Hash for CollidablePair {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let (low, high) = if self.a.packed <= self.b.packed {
            (self.a.packed, self.b.packed)
        } else {
            (self.b.packed, self.a.packed)
        };
        ((high as u64) << 32 | low as u64).hash(state);
    }
}

impl fmt::Display for CollidablePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}>", self.a, self.b)
    }
}

/// Packed location of a cached entry in one worker's pair cache.
///
/// Bit 31 marks existence, bits 21-30 hold the worker index, bits 16-20 the cache type and
/// bits 0-15 the index within that worker's list for the type. The default value refers to
/// nothing.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PairCacheIndex(u32);

impl PairCacheIndex {
    const EXISTS: u32 = 1 << 31;

    #[inline(always)]
    pub fn new(worker_index: usize, type_index: usize, index: usize) -> Self {
        debug_assert!(worker_index < 1 << 10, "Worker index must fit in 10 bits.");
        debug_assert!(type_index < 1 << 5, "Cache type must fit in 5 bits.");
        debug_assert!(index < 1 << 16, "Cache index must fit in 16 bits.");
        Self(Self::EXISTS | (worker_index as u32) << 21 | (type_index as u32) << 16 | index as u32)
    }

    /// Whether this refers to a cache entry at all.
    #[inline(always)]
    pub fn exists(self) -> bool {
        self.0 & Self::EXISTS != 0
    }

    #[inline(always)]
    pub fn worker_index(self) -> usize {
        (self.0 >> 21 & 0x3FF) as usize
    }

    #[inline(always)]
    pub fn type_index(self) -> usize {
        (self.0 >> 16 & 0x1F) as usize
    }

    #[inline(always)]
    pub fn index(self) -> usize {
        (self.0 & 0xFFFF) as usize
    }
}

impl fmt::Debug for PairCacheIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exists() {
            write!(
                f,
                "PairCacheIndex(worker {}, type {}, index {})",
                self.worker_index(),
                self.type_index(),
                self.index()
            )
        } else {
            f.write_str("PairCacheIndex(none)")
        }
    }
}

/// Where a mapped pair's cached data lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollidablePairPointers {
    /// Constraint cache of the pair. Its type index is the contact constraint type id.
    pub constraint_cache: PairCacheIndex,
    /// Collision detection bytes the pair tester stored for the pair, if any.
    pub collision_detection_cache: PairCacheIndex,
}

/// Stores information about a contact constraint from the previous timestep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintCache {
    /// Handle of the contact constraint associated with this cache.
    pub constraint_handle: ConstraintHandle,
    feature_ids: [i32; MAXIMUM_CONTACT_COUNT],
    contact_count: u8,
}

impl ConstraintCache {
    /// Records the feature ids of a manifold's contacts.
    pub fn from_manifold(constraint_handle: ConstraintHandle, manifold: &ContactManifold) -> Self {
        let mut feature_ids = [0; MAXIMUM_CONTACT_COUNT];
        for (slot, contact) in feature_ids.iter_mut().zip(manifold.contacts()) {
            *slot = contact.feature_id;
        }
        Self {
            constraint_handle,
            feature_ids,
            contact_count: manifold.count() as u8,
        }
    }

    /// Feature ids of the contacts, in contact order.
    #[inline(always)]
    pub fn feature_ids(&self) -> &[i32] {
        &self.feature_ids[..self.contact_count as usize]
    }
}

/// Sizing policy of the pair cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairCacheConfig {
    /// Initial capacity of the pair mapping.
    pub minimum_mapping_size: usize,
    /// Minimum capacity of each worker's pending change lists.
    pub minimum_pending_size: usize,
    /// Minimum capacity of each worker's cache list per cache type.
    pub minimum_per_type_capacity: usize,
    /// Multiplier applied to last frame's largest pending list when sizing the next frame's.
    pub previous_pending_size_multiplier: f32,
    /// Multiplier applied to last frame's largest per type cache list when sizing the next frame's.
    pub previous_per_type_size_multiplier: f32,
}

impl Default for PairCacheConfig {
    fn default() -> Self {
        Self {
            minimum_mapping_size: 2048,
            minimum_pending_size: 128,
            minimum_per_type_capacity: 128,
            previous_pending_size_multiplier: 1.25,
            previous_per_type_size_multiplier: 1.25,
        }
    }
}

impl PairCacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_capacity("minimum_mapping_size", self.minimum_mapping_size)?;
        require_capacity("minimum_pending_size", self.minimum_pending_size)?;
        require_capacity("minimum_per_type_capacity", self.minimum_per_type_capacity)?;
        require_multiplier("previous_pending_size_multiplier", self.previous_pending_size_multiplier)?;
        require_multiplier("previous_per_type_size_multiplier", self.previous_per_type_size_multiplier)
    }
}

/// Authoritative mapping from collidable pair to its cached data.
pub type OverlapMapping = QuickDictionary<CollidablePair, CollidablePairPointers>;

/// Read access to the previous frame's pair cache state.
///
/// This is all the narrow phase workers see of the authoritative cache while they run; the
/// mapping and the current worker caches cannot change until the frame is flushed.
#[derive(Clone, Copy)]
pub struct PairCacheReader<'a> {
    mapping: &'a OverlapMapping,
    worker_caches: &'a [WorkerPairCache],
    freshness: &'a [AtomicU64],
}

impl<'a> PairCacheReader<'a> {
    #[inline(always)]
    pub fn mapping_count(&self) -> usize {
        self.mapping.count()
    }

    /// Gets the index of a pair in the mapping.
    #[inline(always)]
    pub fn index_of(&self, pair: &CollidablePair) -> Option<usize> {
        let index = self.mapping.index_of(pair);
        (index >= 0).then_some(index as usize)
    }

    #[inline(always)]
    pub fn pair(&self, mapping_index: usize) -> CollidablePair {
        self.mapping.keys[mapping_index]
    }

    #[inline(always)]
    pub fn get_pointers(&self, mapping_index: usize) -> CollidablePairPointers {
        self.mapping.values[mapping_index]
    }

    /// Gets a constraint cache stored by last frame's workers.
    #[inline(always)]
    pub fn get_constraint_cache(&self, index: PairCacheIndex) -> &'a ConstraintCache {
        self.worker_caches[index.worker_index()].get_constraint_cache(index)
    }

    /// Gets the collision detection bytes stored by last frame's workers, if the pair had any.
    #[inline]
    pub fn get_collision_cache(&self, index: PairCacheIndex) -> Option<&'a [u8]> {
        index
            .exists()
            .then(|| self.worker_caches[index.worker_index()].get_collision_cache(index))
    }

    /// Handle of the constraint that the pair at `mapping_index` had at the end of last frame.
    #[inline(always)]
    pub fn old_constraint_handle(&self, mapping_index: usize) -> ConstraintHandle {
        let pointers = self.get_pointers(mapping_index);
        self.get_constraint_cache(pointers.constraint_cache).constraint_handle
    }

    /// Flags a mapped pair as touched this frame.
    #[inline(always)]
    pub fn mark_fresh(&self, mapping_index: usize) {
        self.freshness[mapping_index >> 3].fetch_or(0xFF << ((mapping_index & 7) * 8), Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn is_fresh(&self, mapping_index: usize) -> bool {
        self.freshness[mapping_index >> 3].load(Ordering::Relaxed) >> ((mapping_index & 7) * 8) & 0xFF != 0
    }

    /// Freshness flags packed eight pairs to a word; byte `i & 7` of word `i >> 3` belongs to pair `i`.
    #[inline(always)]
    pub(crate) fn freshness(&self) -> &'a [AtomicU64] {
        self.freshness
    }
}

/// Cross-frame cache of collidable pairs and the data the narrow phase keeps about them.
///
/// The worker caches are double buffered. During a frame, workers read the current caches
/// through a [`PairCacheReader`] and write only into their own next cache; `postflush` hands
/// ownership of the next caches over to the current slot.
pub struct PairCache {
    mapping: OverlapMapping,
    // Only meaningful between prepare and postflush.
    freshness: Vec<AtomicU64>,
    worker_caches: Vec<WorkerPairCache>,
    next_worker_caches: Vec<WorkerPairCache>,
    next_sizes: WorkerCacheSizes,
    config: PairCacheConfig,
    pool: BufferPool,
}

impl PairCache {
    pub fn new(config: PairCacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            mapping: OverlapMapping::with_capacity(config.minimum_mapping_size),
            freshness: Vec::new(),
            worker_caches: Vec::new(),
            next_worker_caches: Vec::new(),
            next_sizes: WorkerCacheSizes::minimum(&config),
            config,
            pool: BufferPool::new(),
        })
    }

    pub fn config(&self) -> &PairCacheConfig {
        &self.config
    }

    /// The authoritative mapping as of the last flush.
    pub fn mapping(&self) -> &OverlapMapping {
        &self.mapping
    }

    #[inline(always)]
    pub fn reader(&self) -> PairCacheReader<'_> {
        PairCacheReader {
            mapping: &self.mapping,
            worker_caches: &self.worker_caches,
            freshness: &self.freshness,
        }
    }

    /// Splits the cache into the read-only previous frame state and the per worker next caches.
    pub(crate) fn split_for_workers(&mut self) -> (PairCacheReader<'_>, &mut [WorkerPairCache]) {
        (
            PairCacheReader {
                mapping: &self.mapping,
                worker_caches: &self.worker_caches,
                freshness: &self.freshness,
            },
            &mut self.next_worker_caches,
        )
    }

    /// Next frame's worker caches. Empty outside of a frame.
    pub fn next_worker_caches(&self) -> &[WorkerPairCache] {
        &self.next_worker_caches
    }

    #[cfg(test)]
    pub(crate) fn next_worker_cache_mut(&mut self, worker_index: usize) -> &mut WorkerPairCache {
        &mut self.next_worker_caches[worker_index]
    }

    #[inline(always)]
    pub fn index_of(&self, pair: &CollidablePair) -> Option<usize> {
        self.reader().index_of(pair)
    }

    #[inline(always)]
    pub fn get_pointers(&self, mapping_index: usize) -> CollidablePairPointers {
        self.reader().get_pointers(mapping_index)
    }

    #[inline(always)]
    pub fn get_constraint_cache(&self, index: PairCacheIndex) -> &ConstraintCache {
        self.reader().get_constraint_cache(index)
    }

    #[inline(always)]
    pub fn get_collision_cache(&self, index: PairCacheIndex) -> Option<&[u8]> {
        self.reader().get_collision_cache(index)
    }

    #[inline(always)]
    pub fn old_constraint_handle(&self, mapping_index: usize) -> ConstraintHandle {
        self.reader().old_constraint_handle(mapping_index)
    }

    /// Handle of the constraint currently associated with a mapped pair, if the pair is mapped.
    pub fn constraint_handle_of(&self, pair: &CollidablePair) -> Option<ConstraintHandle> {
        self.index_of(pair)
            .map(|mapping_index| self.old_constraint_handle(mapping_index))
    }

    /// Prepares the pair cache for a narrow phase execution with `thread_count` workers.
    pub fn prepare(&mut self, thread_count: usize) {
        let thread_count = thread_count.max(1);
        for mut cache in self.next_worker_caches.drain(..) {
            cache.dispose(&mut self.pool);
        }
        for worker_index in 0..thread_count {
            let cache = WorkerPairCache::new(worker_index, &self.next_sizes, &mut self.pool);
            self.next_worker_caches.push(cache);
        }
        let word_count = self.mapping.count().div_ceil(8);
        self.freshness.clear();
        self.freshness.reserve(word_count);
        self.freshness.extend((0..word_count).map(|_| AtomicU64::new(0)));
    }

    /// Fills in the handle of a constraint that was created for a pending pair cache entry.
    pub(crate) fn complete_constraint_add(&mut self, index: PairCacheIndex, handle: ConstraintHandle) {
        self.next_worker_caches[index.worker_index()].complete_constraint_add(index, handle);
    }

    /// Applies every worker's pending mapping changes and records worker cache sizes for the
    /// next `prepare`. Pointer updates go first since they use mapping indices, then removals,
    /// then additions.
    pub fn flush_mapping_changes(&mut self) {
        self.next_sizes = WorkerCacheSizes::observe(&self.next_worker_caches, &self.config);
        let mut updated = 0;
        let mut removed = 0;
        let mut added = 0;
        for cache in &mut self.next_worker_caches {
            for update in cache.pending_pointer_updates.drain(..) {
                self.mapping.values[update.mapping_index] = update.pointers;
                updated += 1;
            }
        }
        for cache in &mut self.next_worker_caches {
            for pair in cache.pending_removes.drain(..) {
                let removed_pointers = self.mapping.fast_remove(&pair);
                debug_assert!(removed_pointers.is_some(), "Stale pair {} was not in the mapping.", pair);
                removed += 1;
            }
        }
        let add_count: usize = self.next_worker_caches.iter().map(|cache| cache.pending_adds.len()).sum();
        self.mapping.ensure_capacity(self.mapping.count() + add_count);
        for cache in &mut self.next_worker_caches {
            for pending in cache.pending_adds.drain(..) {
                let was_added = self.mapping.try_add(pending.pair, pending.pointers);
                debug_assert!(was_added, "Pair {} was added by more than one worker.", pending.pair);
                added += 1;
            }
        }
        debug!(updated, removed, added, mapped = self.mapping.count(), "flushed pair mapping changes");
    }

    /// Disposes last frame's worker caches and promotes the next caches.
    pub fn postflush(&mut self) {
        if self.next_worker_caches.is_empty() {
            return;
        }
        for mut cache in self.worker_caches.drain(..) {
            cache.dispose(&mut self.pool);
        }
        self.worker_caches = std::mem::take(&mut self.next_worker_caches);
        self.freshness.clear();
    }

    /// Drops every mapped pair and cached entry.
    pub fn clear(&mut self) {
        for mut cache in self.worker_caches.drain(..).chain(self.next_worker_caches.drain(..)) {
            cache.dispose(&mut self.pool);
        }
        self.mapping.clear();
        self.freshness.clear();
    }

    /// Releases all storage held by the cache.
    pub fn dispose(&mut self) {
        self.clear();
        self.freshness = Vec::new();
        self.pool.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collision_detection::contact_constraint_accessor::ContactConstraintTypeId;
    use crate::physics::collision_detection::contact_manifold::Contact;
    use crate::physics::handles::{BodyHandle, StaticHandle};
    use rustc_hash::FxHasher;

    fn body(handle: i32) -> CollidableReference {
        CollidableReference::dynamic(BodyHandle(handle))
    }

    fn hash_of(pair: &CollidablePair) -> u64 {
        let mut hasher = FxHasher::default();
        pair.hash(&mut hasher);
        hasher.finish()
    }

    fn manifold(feature_ids: &[i32]) -> ContactManifold {
        let mut manifold = ContactManifold::new(glam::Vec3::X, true);
        for &feature_id in feature_ids {
            manifold.add(Contact {
                feature_id,
                depth: 0.1,
                ..Default::default()
            });
        }
        manifold
    }

    #[test]
    fn pair_identity_ignores_order() {
        let forward = CollidablePair::new(body(3), body(9));
        let backward = CollidablePair::new(body(9), body(3));
        assert_eq!(forward, backward);
        assert_eq!(hash_of(&forward), hash_of(&backward));
        assert_ne!(forward, CollidablePair::new(body(3), body(8)));
    }

    #[test]
    fn normalization_puts_statics_last_and_low_handles_first() {
        let statik = CollidableReference::from_static(StaticHandle(0));
        let pair = CollidablePair::new(statik, body(4)).normalized();
        assert_eq!((pair.a, pair.b), (body(4), statik));
        let pair = CollidablePair::new(body(7), body(2)).normalized();
        assert_eq!((pair.a, pair.b), (body(2), body(7)));
        assert_eq!(pair.sort_key(), (body(2).packed as u64) << 32 | body(7).packed as u64);
        let kinematic = CollidableReference::kinematic(BodyHandle(1));
        let pair = CollidablePair::new(body(5), kinematic).normalized();
        assert_eq!((pair.a, pair.b), (kinematic, body(5)));
    }

    #[test]
    fn cache_index_packs_fields() {
        let index = PairCacheIndex::new(1023, 15, 65535);
        assert!(index.exists());
        assert_eq!((index.worker_index(), index.type_index(), index.index()), (1023, 15, 65535));
        let zero = PairCacheIndex::new(0, 0, 0);
        assert!(zero.exists());
        assert!(!PairCacheIndex::default().exists());
        assert_ne!(zero, PairCacheIndex::default());
    }

    #[test]
    fn constraint_cache_keeps_feature_ids() {
        let cache = ConstraintCache::from_manifold(ConstraintHandle(4), &manifold(&[11, 12, 13]));
        assert_eq!(cache.feature_ids(), &[11, 12, 13]);
        assert_eq!(cache.constraint_handle, ConstraintHandle(4));
    }

    #[test]
    fn config_validation() {
        assert!(PairCacheConfig::default().validate().is_ok());
        let config = PairCacheConfig {
            minimum_pending_size: 0,
            ..Default::default()
        };
        assert!(PairCache::new(config).is_err());
        let config = PairCacheConfig {
            previous_per_type_size_multiplier: 0.9,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMultiplier { .. })));
    }

    #[test]
    fn added_pairs_become_readable_after_flush() {
        let mut cache = PairCache::new(PairCacheConfig::default()).unwrap();
        let pair = CollidablePair::new(body(0), body(1));
        let type_id = ContactConstraintTypeId::new(2, true, true);
        cache.prepare(2);
        let constraint_index = cache.next_worker_cache_mut(1).add(
            pair,
            type_id,
            ConstraintCache::from_manifold(ConstraintHandle::PENDING, &manifold(&[1, 2])),
            &[42, 43],
        );
        cache.complete_constraint_add(constraint_index, ConstraintHandle(7));
        assert_eq!(cache.index_of(&pair), None);
        cache.flush_mapping_changes();
        cache.postflush();

        let mapping_index = cache.index_of(&pair).unwrap();
        let pointers = cache.get_pointers(mapping_index);
        assert_eq!(pointers.constraint_cache.worker_index(), 1);
        assert_eq!(pointers.constraint_cache.type_index(), type_id.index());
        assert_eq!(cache.old_constraint_handle(mapping_index), ConstraintHandle(7));
        assert_eq!(cache.get_constraint_cache(pointers.constraint_cache).feature_ids(), &[1, 2]);
        assert_eq!(cache.get_collision_cache(pointers.collision_detection_cache), Some(&[42u8, 43][..]));
    }

    #[test]
    fn freshness_tracks_touched_pairs() {
        let mut cache = PairCache::new(PairCacheConfig::default()).unwrap();
        let type_id = ContactConstraintTypeId::new(1, true, true);
        cache.prepare(1);
        for i in 0..10 {
            let pair = CollidablePair::new(body(2 * i), body(2 * i + 1));
            cache.next_worker_cache_mut(0).add(
                pair,
                type_id,
                ConstraintCache::from_manifold(ConstraintHandle(i), &manifold(&[0])),
                &[],
            );
        }
        cache.flush_mapping_changes();
        cache.postflush();

        cache.prepare(1);
        let (reader, next) = cache.split_for_workers();
        assert_eq!(reader.freshness().len(), 2);
        next[0].update(
            &reader,
            3,
            type_id,
            ConstraintCache::from_manifold(ConstraintHandle(3), &manifold(&[0])),
            &[],
        );
        reader.mark_fresh(9);
        assert!(reader.is_fresh(3));
        assert!(reader.is_fresh(9));
        assert!(!reader.is_fresh(8));
        assert!(!reader.is_fresh(0));
        cache.flush_mapping_changes();
        cache.postflush();
        let pointers = cache.get_pointers(3);
        assert!(!pointers.collision_detection_cache.exists());
        assert_eq!(cache.old_constraint_handle(3), ConstraintHandle(3));
    }
}
