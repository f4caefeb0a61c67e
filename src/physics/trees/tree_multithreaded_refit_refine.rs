use super::node::{Node, NodeChild};
use super::tree::Tree;
use super::tree_refine_common::TreeletRefinement;
use crate::utilities::bounding_box::BoundingBox;
use crate::utilities::thread_dispatcher::{dispatch_jobs, IThreadDispatcher};
use tracing::debug;

/// Refit of one refinement candidate's subtree, measured off-tree by a worker.
struct RefitJob {
    parent: i32,
    child_index: i32,
    slot: NodeChild,
    refitted_nodes: Vec<(i32, Node)>,
    bounds: BoundingBox,
    change: f32,
}

/// Node above the refinement candidate wavefront. These are refit after the jobs complete.
struct UpperNode {
    node_index: i32,
    parent: i32,
    child_index: i32,
    slot: NodeChild,
}

struct RefinePlanJob {
    target: i32,
    refinement: Option<TreeletRefinement>,
}

impl Tree {
    /// Walks the nodes above the candidate wavefront in depth first order, in the same order
    /// [`Tree::refit_and_mark_root`] visits them.
    fn collect_refit_jobs(
        &self,
        node_index: i32,
        leaf_count_threshold: i32,
        refinement_candidates: &mut Vec<i32>,
        jobs: &mut Vec<RefitJob>,
        upper_nodes: &mut Vec<UpperNode>,
    ) {
        for child_index in 0..2 {
            let child = *self.child(node_index, child_index);
            if child.index < 0 {
                continue;
            }
            if child.leaf_count <= leaf_count_threshold {
                refinement_candidates.push(child.index);
                jobs.push(RefitJob {
                    parent: node_index,
                    child_index,
                    slot: child,
                    refitted_nodes: Vec::new(),
                    bounds: BoundingBox::empty(),
                    change: 0.0,
                });
            } else {
                upper_nodes.push(UpperNode {
                    node_index: child.index,
                    parent: node_index,
                    child_index,
                    slot: child,
                });
                self.collect_refit_jobs(
                    child.index,
                    leaf_count_threshold,
                    refinement_candidates,
                    jobs,
                    upper_nodes,
                );
            }
        }
    }

    /// Multithreaded version of [`Tree::refit_and_mark_root`]. Produces the same bounds,
    /// candidates, and cost change.
    fn refit_and_mark_mt(
        &mut self,
        dispatcher: &dyn IThreadDispatcher,
        leaf_count_threshold: i32,
        refinement_candidates: &mut Vec<i32>,
    ) -> f32 {
        let mut jobs = Vec::new();
        let mut upper_nodes = Vec::new();
        self.collect_refit_jobs(
            0,
            leaf_count_threshold,
            refinement_candidates,
            &mut jobs,
            &mut upper_nodes,
        );

        let tree: &Tree = self;
        dispatch_jobs(Some(dispatcher), &mut jobs, &|_, job: &mut RefitJob| {
            let (bounds, change) = tree.measure_refit(&job.slot, &mut job.refitted_nodes);
            job.bounds = bounds;
            job.change = change;
        });

        // Bounds metric change of each refit subtree, indexed by the subtree's root node.
        let mut changes = vec![0.0f32; self.nodes.len()];
        for job in &jobs {
            for &(node_index, node) in &job.refitted_nodes {
                self.nodes[node_index as usize] = node;
            }
            self.child_mut(job.parent, job.child_index)
                .set_bounds(job.bounds);
            changes[job.slot.index as usize] = job.change;
        }
        // Children come after their parents in depth first order.
        for upper in upper_nodes.iter().rev() {
            let node = self.nodes[upper.node_index as usize];
            let mut child_change = 0.0f32;
            for child in [node.a, node.b] {
                if child.index >= 0 {
                    child_change += changes[child.index as usize];
                }
            }
            let merged = node.merged_bounds();
            self.child_mut(upper.parent, upper.child_index)
                .set_bounds(merged);
            changes[upper.node_index as usize] = merged.metric() - upper.slot.metric() + child_change;
        }

        let root = self.nodes[0];
        let mut child_change = 0.0f32;
        for child in [root.a, root.b] {
            if child.index >= 0 {
                child_change += changes[child.index as usize];
            }
        }
        let postmetric = root.merged_bounds().metric();
        if postmetric >= 1e-10 {
            child_change / postmetric
        } else {
            0.0
        }
    }

    /// Multithreaded version of [`Tree::refit_and_refine`].
    ///
    /// Candidate subtrees are refit in parallel and every refinement target is planned in
    /// parallel. Plans are committed in target order, so the resulting tree is identical to the
    /// single threaded version's. Cache optimization runs on the calling thread.
    pub fn refit_and_refine_mt(
        &mut self,
        dispatcher: &dyn IThreadDispatcher,
        frame_index: i32,
        refine_aggressiveness_scale: f32,
        cache_optimize_aggressiveness_scale: f32,
    ) -> usize {
        if self.leaf_count() <= 2 {
            return 0;
        }
        let tuning = self.get_refit_and_mark_tuning();
        let mut refinement_candidates =
            Vec::with_capacity(tuning.estimated_refinement_candidate_count);
        let cost_change = self.refit_and_mark_mt(
            dispatcher,
            tuning.leaf_count_threshold,
            &mut refinement_candidates,
        );

        let refine_tuning = self.get_refine_tuning(
            frame_index,
            refinement_candidates.len(),
            refine_aggressiveness_scale,
            cost_change,
        );
        let refinement_targets =
            self.select_refinement_targets(&refinement_candidates, refine_tuning);

        let mut plans: Vec<RefinePlanJob> = refinement_targets
            .iter()
            .map(|&target| RefinePlanJob {
                target,
                refinement: None,
            })
            .collect();
        let tree: &Tree = self;
        let maximum_subtrees = tuning.maximum_subtrees;
        dispatch_jobs(Some(dispatcher), &mut plans, &|_, job: &mut RefinePlanJob| {
            job.refinement = tree.plan_refinement(job.target, maximum_subtrees);
        });
        let mut refined_count = 0;
        for plan in &plans {
            if let Some(refinement) = &plan.refinement {
                self.commit_refinement(refinement);
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
            workers = dispatcher.thread_count(),
            "multithreaded refit and refine"
        );
        refinement_targets.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::physics::trees::tree::Tree;
    use crate::utilities::bounding_box::BoundingBox;
    use crate::utilities::memory::buffer_pool::BufferPool;
    use crate::utilities::thread_dispatcher::SimpleThreadDispatcher;
    use glam::Vec3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_tree(count: usize, pool: &mut BufferPool) -> Tree {
        let mut rng = StdRng::seed_from_u64(41);
        let mut tree = Tree::new(pool, count);
        for _ in 0..count {
            let min = Vec3::new(
                rng.gen_range(0.0..60.0),
                rng.gen_range(0.0..60.0),
                rng.gen_range(0.0..60.0),
            );
            tree.add(BoundingBox::new(min, min + Vec3::splat(rng.gen_range(0.5..2.0))), pool);
        }
        tree
    }

    fn jitter(tree: &mut Tree, rng: &mut StdRng) {
        for leaf in 0..tree.leaf_count() {
            let offset = Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), 0.0);
            let bounds = tree.get_bounds(leaf);
            let leaf_child = tree.leaves[leaf as usize];
            let child = tree.child_mut(leaf_child.node_index(), leaf_child.child_index());
            child.min = bounds.min + offset;
            child.max = bounds.max + offset;
        }
    }

    #[test]
    fn multithreaded_refit_matches_single_threaded() {
        let mut pool = BufferPool::new();
        let dispatcher = SimpleThreadDispatcher::new(4).unwrap();
        let mut single = random_tree(700, &mut pool);
        let mut multi = random_tree(700, &mut pool);
        let mut rng_single = StdRng::seed_from_u64(5);
        let mut rng_multi = StdRng::seed_from_u64(5);
        jitter(&mut single, &mut rng_single);
        jitter(&mut multi, &mut rng_multi);

        let threshold = single.get_refit_and_mark_tuning().leaf_count_threshold;
        let mut single_candidates = Vec::new();
        let mut multi_candidates = Vec::new();
        let single_change = single.refit_and_mark_root(threshold, &mut single_candidates);
        let multi_change = multi.refit_and_mark_mt(&dispatcher, threshold, &mut multi_candidates);
        assert_eq!(single_change, multi_change);
        assert_eq!(single_candidates, multi_candidates);
        assert!(single.nodes == multi.nodes);
    }

    #[test]
    fn multithreaded_refine_matches_single_threaded() {
        let mut pool = BufferPool::new();
        let dispatcher = SimpleThreadDispatcher::new(4).unwrap();
        let mut single = random_tree(600, &mut pool);
        let mut multi = random_tree(600, &mut pool);
        let mut rng_single = StdRng::seed_from_u64(6);
        let mut rng_multi = StdRng::seed_from_u64(6);
        for frame in 0..8 {
            jitter(&mut single, &mut rng_single);
            jitter(&mut multi, &mut rng_multi);
            let single_targets = single.refit_and_refine(frame, 1.0, 1.0);
            let multi_targets = multi.refit_and_refine_mt(&dispatcher, frame, 1.0, 1.0);
            assert_eq!(single_targets, multi_targets);
            assert!(multi.validate().is_ok());
            assert!(single.nodes == multi.nodes, "trees diverged on frame {frame}");
            assert_eq!(single.leaves, multi.leaves);
        }
    }
}
