use super::tree::Tree;
use tracing::debug;

/// Refit and refinement tuning derived from the tree's leaf count.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RefitAndMarkTuning {
    pub maximum_subtrees: i32,
    pub estimated_refinement_candidate_count: usize,
    pub leaf_count_threshold: i32,
}

/// Which refinement candidates get refined this frame.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RefineTuning {
    pub target_refinement_count: usize,
    pub refinement_period: usize,
    pub refinement_offset: usize,
}

impl Tree {
    pub(crate) fn get_refit_and_mark_tuning(&self) -> RefitAndMarkTuning {
        let leaf_count = self.leaf_count();
        let maximum_subtrees = ((leaf_count as f32).sqrt() * 3.0) as i32;
        RefitAndMarkTuning {
            maximum_subtrees,
            estimated_refinement_candidate_count: ((leaf_count * 2) / maximum_subtrees.max(1))
                as usize,
            leaf_count_threshold: leaf_count.min(maximum_subtrees),
        }
    }

    pub(crate) fn get_refine_tuning(
        &self,
        frame_index: i32,
        refinement_candidate_count: usize,
        refine_aggressiveness_scale: f32,
        cost_change: f32,
    ) -> RefineTuning {
        if cost_change.is_nan() || cost_change.is_infinite() {
            panic!(
                "The change in tree cost is an invalid value, strongly implying the tree bounds \
                 have been corrupted by infinites or NaNs."
            );
        }
        let candidate_count = refinement_candidate_count as f32;
        let refine_aggressiveness = (cost_change * refine_aggressiveness_scale).max(0.0);
        let refine_portion = (refine_aggressiveness * 0.25).min(1.0);
        let target_refinement_scale = (self.node_count() as f32).min(
            (candidate_count * refine_aggressiveness_scale * 0.03)
                .ceil()
                .max(2.0)
                + candidate_count * refine_portion,
        );
        let refinement_period = ((candidate_count / target_refinement_scale) as usize).max(1);
        let refinement_offset = ((frame_index as i64 * 236887691 + 104395303)
            .rem_euclid((refinement_candidate_count as i64).max(1))) as usize;
        RefineTuning {
            target_refinement_count: refinement_candidate_count
                .min(target_refinement_scale as usize),
            refinement_period,
            refinement_offset,
        }
    }

    /// Number of nodes to incrementally cache optimize this frame.
    pub(crate) fn get_cache_optimize_tuning(
        &self,
        maximum_subtrees: i32,
        cost_change: f32,
        cache_optimize_aggressiveness_scale: f32,
    ) -> usize {
        let cache_optimize_aggressiveness =
            (cost_change * cache_optimize_aggressiveness_scale).max(0.0);
        let cache_optimize_portion = (0.03
            + 85.0 * (maximum_subtrees as f32 / self.leaf_count() as f32)
                * cache_optimize_aggressiveness)
            .min(1.0);
        (cache_optimize_portion * self.node_count() as f32).ceil() as usize
    }

    /// Picks refinement targets from the candidate wavefront and flags them. The root is always
    /// included.
    pub(crate) fn select_refinement_targets(
        &mut self,
        refinement_candidates: &[i32],
        tuning: RefineTuning,
    ) -> Vec<i32> {
        let mut refinement_targets = Vec::with_capacity(tuning.target_refinement_count + 1);
        let mut index = tuning.refinement_offset;
        for _ in 0..tuning.target_refinement_count.saturating_sub(1) {
            index += tuning.refinement_period;
            if index >= refinement_candidates.len() {
                index -= refinement_candidates.len();
            }
            let candidate = refinement_candidates[index];
            debug_assert_eq!(
                self.metanodes[candidate as usize].refine_flag, 0,
                "Refinement target search shouldn't run into the same node twice!"
            );
            refinement_targets.push(candidate);
            self.metanodes[candidate as usize].refine_flag = 1;
        }
        if self.metanodes[0].refine_flag == 0 {
            refinement_targets.push(0);
            self.metanodes[0].refine_flag = 1;
        }
        refinement_targets
    }

    pub(crate) fn clear_refine_flags(&mut self, refinement_targets: &[i32]) {
        for &target in refinement_targets {
            self.metanodes[target as usize].refine_flag = 0;
        }
    }

    /// Cache optimizes a contiguous run of nodes starting at a frame dependent offset.
    pub(crate) fn incremental_cache_optimize_region(&mut self, frame_index: i32, count: usize) {
        let node_count = self.nodes.len();
        let start = ((frame_index as i64 * count as i64).rem_euclid(node_count as i64)) as usize;
        // No wrap around; the next frame's offset covers the rest.
        let end = node_count.min(start + count);
        for node_index in start..end {
            self.incremental_cache_optimize(node_index as i32);
        }
    }

    /// Refits every node and refines a frame dependent subset of the tree, then incrementally
    /// moves nodes toward cache friendly positions.
    ///
    /// Refinement targets are chosen from the wavefront of nodes whose leaf count first drops
    /// below a threshold; the larger the change in tree cost since the last refit, the more
    /// targets get refined. The root is always refined. Returns the number of refinement
    /// targets.
    pub fn refit_and_refine(
        &mut self,
        frame_index: i32,
        refine_aggressiveness_scale: f32,
        cache_optimize_aggressiveness_scale: f32,
    ) -> usize {
        // With two or fewer leaves there is nothing to refit, refine, or reorder.
        if self.leaf_count() <= 2 {
            return 0;
        }
        let tuning = self.get_refit_and_mark_tuning();
        let mut refinement_candidates = Vec::with_capacity(tuning.estimated_refinement_candidate_count);
        let cost_change =
            self.refit_and_mark_root(tuning.leaf_count_threshold, &mut refinement_candidates);

        let refine_tuning = self.get_refine_tuning(
            frame_index,
            refinement_candidates.len(),
            refine_aggressiveness_scale,
            cost_change,
        );
        let refinement_targets = self.select_refinement_targets(&refinement_candidates, refine_tuning);

        // Flags stay set until every target is done so that no treelet expands into another
        // target's region, whichever order the targets are processed in.
        let mut refined_count = 0;
        for &target in &refinement_targets {
            if self.refine_treelet(target, tuning.maximum_subtrees) {
                refined_count += 1;
            }
        }
        self.clear_refine_flags(&refinement_targets);

        let cache_optimize_count = self.get_cache_optimize_tuning(
            tuning.maximum_subtrees,
            cost_change,
            cache_optimize_aggressiveness_scale,
        );
        self.incremental_cache_optimize_region(frame_index, cache_optimize_count);

        debug!(
            leaf_count = self.leaf_count(),
            candidates = refinement_candidates.len(),
            targets = refinement_targets.len(),
            rebuilt = refined_count,
            cost_change,
            cache_optimize_count,
            "refit and refine"
        );
        refinement_targets.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::physics::trees::tree::Tree;
    use crate::utilities::bounding_box::BoundingBox;
    use crate::utilities::memory::buffer_pool::BufferPool;
    use glam::Vec3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_tree(count: usize, seed: u64, pool: &mut BufferPool) -> Tree {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut tree = Tree::new(pool, count);
        for _ in 0..count {
            let min = Vec3::new(
                rng.gen_range(0.0..100.0),
                rng.gen_range(0.0..100.0),
                rng.gen_range(0.0..100.0),
            );
            tree.add(BoundingBox::new(min, min + Vec3::splat(rng.gen_range(0.5..3.0))), pool);
        }
        tree
    }

    #[test]
    fn tuning_follows_leaf_count() {
        let mut pool = BufferPool::new();
        let tree = random_tree(100, 1, &mut pool);
        let tuning = tree.get_refit_and_mark_tuning();
        assert_eq!(tuning.maximum_subtrees, 30);
        assert_eq!(tuning.leaf_count_threshold, 30);

        let refine = tree.get_refine_tuning(0, 10, 1.0, 0.0);
        // Zero cost change still refines the minimum of two targets.
        assert_eq!(refine.target_refinement_count, 2);
        assert_eq!(refine.refinement_period, 5);
        assert_eq!(refine.refinement_offset, (104395303 % 10) as usize);
    }

    #[test]
    #[should_panic(expected = "corrupted by infinites or NaNs")]
    fn corrupted_cost_change_panics() {
        let mut pool = BufferPool::new();
        let tree = random_tree(10, 2, &mut pool);
        tree.get_refine_tuning(0, 4, 1.0, f32::NAN);
    }

    #[test]
    fn refit_and_refine_keeps_tree_valid_across_frames() {
        let mut pool = BufferPool::new();
        let mut tree = random_tree(300, 3, &mut pool);
        let mut rng = StdRng::seed_from_u64(4);
        for frame in 0..20 {
            for _ in 0..30 {
                let leaf = rng.gen_range(0..tree.leaf_count());
                let bounds = tree.get_bounds(leaf);
                let offset = Vec3::new(rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0), 0.0);
                let leaf_child = tree.leaves[leaf as usize];
                let child = tree.child_mut(leaf_child.node_index(), leaf_child.child_index());
                child.min = bounds.min + offset;
                child.max = bounds.max + offset;
            }
            let targets = tree.refit_and_refine(frame, 1.0, 1.0);
            assert!(targets >= 1);
            assert!(tree.validate().is_ok(), "invalid tree after frame {frame}");
            assert!(tree.metanodes.iter().all(|m| m.refine_flag == 0));
        }
    }

    #[test]
    fn refinement_improves_a_degenerate_tree() {
        let mut pool = BufferPool::new();
        let mut tree = Tree::new(&mut pool, 256);
        // Sorted insertion along a diagonal builds a poor tree.
        for i in 0..256 {
            let min = Vec3::splat(i as f32);
            tree.add(BoundingBox::new(min, min + Vec3::splat(0.5)), &mut pool);
        }
        let before = tree.measure_cost_metric();
        for frame in 0..10 {
            tree.refit_and_refine(frame, 1.0, 1.0);
        }
        assert!(tree.validate().is_ok());
        assert!(tree.measure_cost_metric() <= before);
    }

    #[test]
    fn tiny_trees_are_left_alone() {
        let mut pool = BufferPool::new();
        let mut tree = random_tree(2, 5, &mut pool);
        assert_eq!(tree.refit_and_refine(0, 1.0, 1.0), 0);
        assert!(tree.validate().is_ok());
    }
}
