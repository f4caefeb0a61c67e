use super::constraint_remover::RemovalCache;
use super::pair_cache::{CollidablePair, PairCacheReader};
use crate::physics::constraint_location::ConstraintLocation;
use crossbeam_utils::CachePadded;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

const JOBS_PER_THREAD: usize = 2;

/// Finds mapped pairs that no worker touched this frame and queues their removal.
///
/// Freshness flags are read eight pairs at a time; job boundaries fall on multiples of eight so
/// every job reads whole words.
pub(crate) struct FreshnessChecker<'a> {
    pair_cache: PairCacheReader<'a>,
    handle_to_constraint: &'a [ConstraintLocation],
    jobs: Vec<Range<usize>>,
    next_job: CachePadded<AtomicUsize>,
}

impl<'a> FreshnessChecker<'a> {
    pub fn new(
        pair_cache: PairCacheReader<'a>,
        handle_to_constraint: &'a [ConstraintLocation],
        thread_count: usize,
    ) -> Self {
        let jobs = Self::create_jobs(thread_count, pair_cache.mapping_count());
        Self {
            pair_cache,
            handle_to_constraint,
            jobs,
            next_job: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Splits `mapping_count` pairs into ranges that start on multiples of eight.
    pub fn create_jobs(thread_count: usize, mapping_count: usize) -> Vec<Range<usize>> {
        if mapping_count == 0 {
            return Vec::new();
        }
        if thread_count <= 1 {
            return vec![0..mapping_count];
        }
        let job_count = (thread_count * JOBS_PER_THREAD).min(mapping_count);
        let pairs_per_job = mapping_count / job_count;
        let remainder = mapping_count - pairs_per_job * job_count;
        let mut jobs = Vec::with_capacity(job_count);
        let mut previous_end = 0;
        while previous_end < mapping_count {
            let pairs_in_job = pairs_per_job + (jobs.len() < remainder) as usize;
            let end = ((previous_end + pairs_in_job + 7) & !7).min(mapping_count);
            jobs.push(previous_end..end);
            previous_end = end;
        }
        jobs
    }

    #[cfg(test)]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Claims and runs jobs until none are left. Any number of workers can call this at once.
    pub fn check_freshness(&self, removals: &mut RemovalCache, pending_removes: &mut Vec<CollidablePair>) {
        loop {
            let job_index = self.next_job.fetch_add(1, Ordering::Relaxed);
            let Some(job) = self.jobs.get(job_index) else {
                break;
            };
            self.check_freshness_in_region(job.clone(), removals, pending_removes);
        }
    }

    pub fn check_freshness_in_region(
        &self,
        region: Range<usize>,
        removals: &mut RemovalCache,
        pending_removes: &mut Vec<CollidablePair>,
    ) {
        debug_assert!(
            region.start & 7 == 0 || region.is_empty(),
            "Either this job is empty or the start should be 8 byte aligned for quick reading."
        );
        let freshness = self.pair_cache.freshness();
        let wide_count = region.len() >> 3;
        let first_word = region.start >> 3;
        for word_index in first_word..first_word + wide_count {
            let word = freshness[word_index].load(Ordering::Relaxed);
            if word == u64::MAX {
                continue;
            }
            let base = word_index << 3;
            // Narrow down to the stale bytes through halves and quarters of the word.
            for half in 0..2 {
                let half_mask = 0xFFFF_FFFFu64 << (half * 32);
                if word & half_mask == half_mask {
                    continue;
                }
                for quarter in 2 * half..2 * half + 2 {
                    let quarter_mask = 0xFFFFu64 << (quarter * 16);
                    if word & quarter_mask == quarter_mask {
                        continue;
                    }
                    for byte in 2 * quarter..2 * quarter + 2 {
                        if word & (0xFFu64 << (byte * 8)) == 0 {
                            self.enqueue_stale_removal(base + byte, removals, pending_removes);
                        }
                    }
                }
            }
        }
        for mapping_index in region.start + (wide_count << 3)..region.end {
            if !self.pair_cache.is_fresh(mapping_index) {
                self.enqueue_stale_removal(mapping_index, removals, pending_removes);
            }
        }
    }

    #[inline]
    fn enqueue_stale_removal(
        &self,
        mapping_index: usize,
        removals: &mut RemovalCache,
        pending_removes: &mut Vec<CollidablePair>,
    ) {
        // A stale pair has nothing in this frame's caches; its last known constraint is in the
        // previous frame's.
        let handle = self.pair_cache.old_constraint_handle(mapping_index);
        removals.enqueue(handle, self.handle_to_constraint);
        pending_removes.push(self.pair_cache.pair(mapping_index));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collidables::collidable_reference::CollidableReference;
    use crate::physics::collision_detection::contact_constraint_accessor::{
        ContactConstraintDescription, ContactConstraintTypeId,
    };
    use crate::physics::collision_detection::contact_manifold::{Contact, ContactManifold};
    use crate::physics::collision_detection::pair_cache::{ConstraintCache, PairCache, PairCacheConfig};
    use crate::physics::constraint_batch::ConstraintBodies;
    use crate::physics::handles::BodyHandle;
    use crate::physics::solver::Solver;

    #[test]
    fn jobs_are_aligned_and_cover_everything() {
        for (threads, count) in [(1, 5), (4, 5), (4, 100), (3, 17), (8, 1000), (2, 8)] {
            let jobs = FreshnessChecker::create_jobs(threads, count);
            assert_eq!(jobs.first().map(|job| job.start), Some(0));
            assert_eq!(jobs.last().map(|job| job.end), Some(count));
            for pair in jobs.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
                assert_eq!(pair[1].start % 8, 0);
            }
            assert!(jobs.len() <= (threads * JOBS_PER_THREAD).max(1));
        }
        assert!(FreshnessChecker::create_jobs(4, 0).is_empty());
    }

    #[test]
    fn untouched_pairs_are_queued_for_removal() {
        const PAIR_COUNT: i32 = 21;
        let mut solver = Solver::new(32, 4, 64);
        let mut cache = PairCache::new(PairCacheConfig::default()).unwrap();
        let type_id = ContactConstraintTypeId::new(1, true, true);
        let mut manifold = ContactManifold::new(glam::Vec3::X, true);
        manifold.add(Contact::default());
        cache.prepare(1);
        for i in 0..PAIR_COUNT {
            let pair = CollidablePair::new(
                CollidableReference::dynamic(BodyHandle(2 * i)),
                CollidableReference::dynamic(BodyHandle(2 * i + 1)),
            );
            let handle = solver.add(
                type_id,
                ConstraintBodies::from_references(pair.a, pair.b),
                &ContactConstraintDescription::default(),
                [0.0; 4],
            );
            cache
                .next_worker_cache_mut(0)
                .add(pair, type_id, ConstraintCache::from_manifold(handle, &manifold), &[]);
        }
        cache.flush_mapping_changes();
        cache.postflush();
        cache.prepare(2);

        let fresh = [0usize, 1, 2, 3, 4, 5, 6, 7, 9, 15, 16, 20];
        let reader = cache.reader();
        for &index in &fresh {
            reader.mark_fresh(index);
        }
        let checker = FreshnessChecker::new(reader, solver.handle_to_constraint(), 2);
        assert!(checker.job_count() > 1);
        let mut removals = RemovalCache::default();
        let mut pending_removes = Vec::new();
        checker.check_freshness(&mut removals, &mut pending_removes);

        let mut stale: Vec<usize> = pending_removes
            .iter()
            .map(|pair| cache.index_of(pair).unwrap())
            .collect();
        stale.sort_unstable();
        let expected: Vec<usize> = (0..PAIR_COUNT as usize).filter(|i| !fresh.contains(i)).collect();
        assert_eq!(stale, expected);
        assert_eq!(removals.count(), expected.len());
        let mut removed: Vec<i32> = removals.handles().map(|handle| handle.0).collect();
        removed.sort_unstable();
        let expected_handles: Vec<i32> = expected
            .iter()
            .map(|&index| cache.old_constraint_handle(index).0)
            .collect();
        assert_eq!(removed, expected_handles);
    }
}
