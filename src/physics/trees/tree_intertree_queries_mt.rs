use super::node::{Node, NodeChild};
use super::tree::Tree;
use super::tree_self_queries::IOverlapHandler;
use crate::utilities::thread_dispatcher::{dispatch_with_states, IThreadDispatcher};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Independent chunk of an intertree overlap test. Node and leaf indices refer to the tree
/// named by their field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IntertreeJob {
    NodePair { node_a: i32, node_b: i32 },
    LeafANodeB { leaf_a: i32, node_b: i32 },
    NodeALeafB { node_a: i32, leaf_b: i32 },
}

const JOBS_PER_WORKER: i32 = 8;

struct IntertreeJobCollector<'a, H> {
    tree_a: &'a Tree,
    tree_b: &'a Tree,
    leaf_threshold: i32,
    jobs: Vec<IntertreeJob>,
    results: &'a mut H,
}

impl<H: IOverlapHandler> IntertreeJobCollector<'_, H> {
    fn dispatch_test_for_nodes(&mut self, a: &NodeChild, b: &NodeChild) {
        let (tree_a, tree_b) = (self.tree_a, self.tree_b);
        if a.index >= 0 {
            if b.index >= 0 {
                if a.leaf_count + b.leaf_count <= self.leaf_threshold {
                    self.jobs.push(IntertreeJob::NodePair {
                        node_a: a.index,
                        node_b: b.index,
                    });
                } else {
                    self.collect_jobs_between_different_nodes(
                        &tree_a.nodes[a.index as usize],
                        &tree_b.nodes[b.index as usize],
                    );
                }
            } else if a.leaf_count <= self.leaf_threshold {
                self.jobs.push(IntertreeJob::NodeALeafB {
                    node_a: a.index,
                    leaf_b: Tree::encode(b.index),
                });
            } else {
                tree_a.test_node_against_leaf(a.index, Tree::encode(b.index), b, &mut *self.results);
            }
        } else if b.index >= 0 {
            if b.leaf_count <= self.leaf_threshold {
                self.jobs.push(IntertreeJob::LeafANodeB {
                    leaf_a: Tree::encode(a.index),
                    node_b: b.index,
                });
            } else {
                tree_b.test_leaf_against_node_intertree(
                    Tree::encode(a.index),
                    a,
                    b.index,
                    &mut *self.results,
                );
            }
        } else {
            self.results
                .handle(Tree::encode(a.index), Tree::encode(b.index));
        }
    }

    fn collect_jobs_between_different_nodes(&mut self, a: &Node, b: &Node) {
        let aa_intersects = a.a.intersects(&b.a);
        let ab_intersects = a.a.intersects(&b.b);
        let ba_intersects = a.b.intersects(&b.a);
        let bb_intersects = a.b.intersects(&b.b);

        if aa_intersects {
            self.dispatch_test_for_nodes(&a.a, &b.a);
        }
        if ab_intersects {
            self.dispatch_test_for_nodes(&a.a, &b.b);
        }
        if ba_intersects {
            self.dispatch_test_for_nodes(&a.b, &b.a);
        }
        if bb_intersects {
            self.dispatch_test_for_nodes(&a.b, &b.b);
        }
    }
}

impl Tree {
    fn execute_intertree_job<H: IOverlapHandler>(&self, tree_b: &Tree, job: IntertreeJob, results: &mut H) {
        match job {
            IntertreeJob::NodePair { node_a, node_b } => self
                .get_overlaps_between_different_nodes_intertree(
                    &self.nodes[node_a as usize],
                    &tree_b.nodes[node_b as usize],
                    tree_b,
                    results,
                ),
            IntertreeJob::LeafANodeB { leaf_a, node_b } => {
                let leaf_child = *self.leaf_child(leaf_a);
                tree_b.test_leaf_against_node_intertree(leaf_a, &leaf_child, node_b, results);
            }
            IntertreeJob::NodeALeafB { node_a, leaf_b } => {
                let leaf_child = *tree_b.leaf_child(leaf_b);
                self.test_node_against_leaf(node_a, leaf_b, &leaf_child, results);
            }
        }
    }

    /// Multithreaded version of [`Tree::get_overlaps_with_tree`]. Worker `i` reports into
    /// `handlers[i]`; overlaps found while splitting up the work go to `handlers[0]`. Pairs are
    /// always reported as (leaf in this tree, leaf in `tree_b`).
    pub fn get_overlaps_with_tree_mt<H: IOverlapHandler + Send>(
        &self,
        tree_b: &Tree,
        dispatcher: &dyn IThreadDispatcher,
        handlers: &mut [H],
    ) {
        if self.leaf_count() == 0 || tree_b.leaf_count() == 0 || handlers.is_empty() {
            return;
        }
        let worker_count = dispatcher.thread_count().min(handlers.len()).max(1);
        let target_job_count = JOBS_PER_WORKER * worker_count as i32;
        let largest_leaf_count = self.leaf_count().max(tree_b.leaf_count());
        let mut collector = IntertreeJobCollector {
            tree_a: self,
            tree_b,
            leaf_threshold: (largest_leaf_count / target_job_count).max(1),
            jobs: Vec::with_capacity(target_job_count as usize * 2),
            results: &mut handlers[0],
        };
        let (root_a, root_b) = (&self.nodes[0], &tree_b.nodes[0]);
        for i in 0..self.root_child_count() {
            let a = root_a.child(i);
            for j in 0..tree_b.root_child_count() {
                let b = root_b.child(j);
                if a.intersects(b) {
                    collector.dispatch_test_for_nodes(a, b);
                }
            }
        }
        let jobs = collector.jobs;
        if jobs.is_empty() {
            return;
        }

        let next_job = CachePadded::new(AtomicUsize::new(0));
        dispatch_with_states(dispatcher, &mut handlers[..worker_count], &|_, results| loop {
            let job_index = next_job.fetch_add(1, Ordering::Relaxed);
            let Some(&job) = jobs.get(job_index) else {
                break;
            };
            self.execute_intertree_job(tree_b, job, results);
        });
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

    fn random_tree(count: usize, seed: u64, pool: &mut BufferPool) -> Tree {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut tree = Tree::new(pool, count.max(1));
        for _ in 0..count {
            let min = Vec3::new(
                rng.gen_range(0.0..30.0),
                rng.gen_range(0.0..30.0),
                rng.gen_range(0.0..30.0),
            );
            tree.add(BoundingBox::new(min, min + Vec3::splat(rng.gen_range(0.5..3.0))), pool);
        }
        tree
    }

    #[test]
    fn multithreaded_matches_single_threaded() {
        let mut pool = BufferPool::new();
        let dispatcher = SimpleThreadDispatcher::new(3).unwrap();
        for (count_a, count_b) in [(400, 250), (1, 300), (300, 1), (2, 2)] {
            let a = random_tree(count_a, 31, &mut pool);
            let b = random_tree(count_b, 32, &mut pool);
            let mut expected = Vec::new();
            a.get_overlaps_with_tree(&b, &mut |i: i32, j: i32| expected.push((i, j)));
            expected.sort_unstable();

            let mut outputs: Vec<Vec<(i32, i32)>> = vec![Vec::new(); 3];
            let mut handlers: Vec<_> = outputs
                .iter_mut()
                .map(|pairs| move |i: i32, j: i32| pairs.push((i, j)))
                .collect();
            a.get_overlaps_with_tree_mt(&b, &dispatcher, &mut handlers);
            drop(handlers);
            let mut actual: Vec<(i32, i32)> = outputs.into_iter().flatten().collect();
            actual.sort_unstable();
            assert_eq!(actual, expected, "{count_a} vs {count_b}");
        }
    }
}
