use super::node::{Node, NodeChild};
use super::tree::Tree;
use super::tree_self_queries::IOverlapHandler;
use crate::utilities::thread_dispatcher::{dispatch_with_states, IThreadDispatcher};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Independent chunk of a self overlap test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SelfTestJob {
    /// All overlaps within one subtree.
    Node(i32),
    /// All overlaps between two disjoint subtrees.
    NodePair(i32, i32),
    /// All overlaps between a leaf and a subtree that doesn't contain it.
    LeafNode { leaf: i32, node: i32 },
}

/// Number of jobs to aim for per worker; more jobs balance better but cost more to collect.
const JOBS_PER_WORKER: i32 = 8;

/// Walks the top of the tree, splitting the self test into jobs whose subtrees hold at most
/// `leaf_threshold` leaves. Overlaps found along the way go straight to `results`.
struct SelfTestJobCollector<'a, H> {
    tree: &'a Tree,
    leaf_threshold: i32,
    jobs: Vec<SelfTestJob>,
    results: &'a mut H,
}

impl<H: IOverlapHandler> SelfTestJobCollector<'_, H> {
    fn dispatch_test_for_leaf(&mut self, leaf_index: i32, leaf_child: &NodeChild, node: &NodeChild) {
        if node.index < 0 {
            self.results.handle(leaf_index, Tree::encode(node.index));
        } else if node.leaf_count <= self.leaf_threshold {
            self.jobs.push(SelfTestJob::LeafNode {
                leaf: leaf_index,
                node: node.index,
            });
        } else {
            self.tree
                .test_leaf_against_node(leaf_index, leaf_child, node.index, &mut *self.results);
        }
    }

    fn dispatch_test_for_nodes(&mut self, a: &NodeChild, b: &NodeChild) {
        if a.index >= 0 {
            if b.index >= 0 {
                if a.leaf_count + b.leaf_count <= self.leaf_threshold {
                    self.jobs.push(SelfTestJob::NodePair(a.index, b.index));
                } else {
                    let tree = self.tree;
                    self.collect_jobs_between_different_nodes(
                        &tree.nodes[a.index as usize],
                        &tree.nodes[b.index as usize],
                    );
                }
            } else {
                self.dispatch_test_for_leaf(Tree::encode(b.index), b, a);
            }
        } else if b.index >= 0 {
            self.dispatch_test_for_leaf(Tree::encode(a.index), a, b);
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

    fn collect_jobs_in_node(&mut self, node_index: i32, leaf_count: i32) {
        if leaf_count <= self.leaf_threshold {
            self.jobs.push(SelfTestJob::Node(node_index));
            return;
        }
        let tree = self.tree;
        let node = &tree.nodes[node_index as usize];
        let ab = node.a.intersects(&node.b);
        if node.a.index >= 0 {
            self.collect_jobs_in_node(node.a.index, node.a.leaf_count);
        }
        if node.b.index >= 0 {
            self.collect_jobs_in_node(node.b.index, node.b.leaf_count);
        }
        if ab {
            self.dispatch_test_for_nodes(&node.a, &node.b);
        }
    }
}

impl Tree {
    fn execute_self_test_job<H: IOverlapHandler>(&self, job: SelfTestJob, results: &mut H) {
        match job {
            SelfTestJob::Node(node_index) => {
                self.get_overlaps_in_node(&self.nodes[node_index as usize], results)
            }
            SelfTestJob::NodePair(a, b) => self.get_overlaps_between_different_nodes(
                &self.nodes[a as usize],
                &self.nodes[b as usize],
                results,
            ),
            SelfTestJob::LeafNode { leaf, node } => {
                let leaf_child = *self.leaf_child(leaf);
                self.test_leaf_against_node(leaf, &leaf_child, node, results);
            }
        }
    }

    /// Reports every pair of leaves in this tree with overlapping bounds, spreading the work
    /// over the dispatcher's workers.
    ///
    /// Worker `i` reports into `handlers[i]`; overlaps found while splitting up the work are
    /// reported into `handlers[0]`. Across all handlers, the reported pairs are the same as
    /// [`Tree::get_self_overlaps`] would report, though their distribution and order vary.
    pub fn get_self_overlaps_mt<H: IOverlapHandler + Send>(
        &self,
        dispatcher: &dyn IThreadDispatcher,
        handlers: &mut [H],
    ) {
        if self.leaf_count() < 2 || handlers.is_empty() {
            return;
        }
        let worker_count = dispatcher.thread_count().min(handlers.len()).max(1);
        let target_job_count = JOBS_PER_WORKER * worker_count as i32;
        let mut collector = SelfTestJobCollector {
            tree: self,
            leaf_threshold: (self.leaf_count() / target_job_count).max(1),
            jobs: Vec::with_capacity(target_job_count as usize * 2),
            results: &mut handlers[0],
        };
        collector.collect_jobs_in_node(0, self.leaf_count());
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
            self.execute_self_test_job(job, results);
        });
    }
}

#[cfg(test)]
mod tests {
    use crate::physics::trees::tree::Tree;
    use crate::utilities::bounding_box::BoundingBox;
    use crate::utilities::memory::buffer_pool::BufferPool;
    use crate::utilities::thread_dispatcher::{SimpleThreadDispatcher, SingleThreadDispatcher};
    use glam::Vec3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_tree(count: usize, pool: &mut BufferPool) -> Tree {
        let mut rng = StdRng::seed_from_u64(21);
        let mut tree = Tree::new(pool, count);
        for _ in 0..count {
            let min = Vec3::new(
                rng.gen_range(0.0..40.0),
                rng.gen_range(0.0..40.0),
                rng.gen_range(0.0..40.0),
            );
            tree.add(BoundingBox::new(min, min + Vec3::splat(rng.gen_range(0.5..4.0))), pool);
        }
        tree
    }

    fn normalized(mut pairs: Vec<(i32, i32)>) -> Vec<(i32, i32)> {
        for pair in pairs.iter_mut() {
            *pair = (pair.0.min(pair.1), pair.0.max(pair.1));
        }
        pairs.sort_unstable();
        pairs
    }

    #[test]
    fn multithreaded_matches_single_threaded() {
        let mut pool = BufferPool::new();
        let tree = random_tree(500, &mut pool);
        let mut expected = Vec::new();
        tree.get_self_overlaps(&mut |a: i32, b: i32| expected.push((a, b)));
        let expected = normalized(expected);
        assert!(!expected.is_empty());

        let dispatcher = SimpleThreadDispatcher::new(4).unwrap();
        let mut handlers: Vec<Vec<(i32, i32)>> = vec![Vec::new(); 4];
        let mut callbacks: Vec<_> = handlers
            .iter_mut()
            .map(|pairs| move |a: i32, b: i32| pairs.push((a, b)))
            .collect();
        tree.get_self_overlaps_mt(&dispatcher, &mut callbacks);
        drop(callbacks);
        let actual = normalized(handlers.into_iter().flatten().collect());
        assert_eq!(actual, expected);
    }

    #[test]
    fn single_worker_collects_everything_into_the_first_handler() {
        let mut pool = BufferPool::new();
        let tree = random_tree(64, &mut pool);
        let mut expected = 0;
        tree.get_self_overlaps(&mut |_: i32, _: i32| expected += 1);
        let mut count = 0;
        let mut handlers = [|_: i32, _: i32| count += 1];
        tree.get_self_overlaps_mt(&SingleThreadDispatcher::default(), &mut handlers);
        assert_eq!(count, expected);
    }
}
