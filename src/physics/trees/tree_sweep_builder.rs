use super::node::{Node, NodeChild};
use super::tree::Tree;
use crate::utilities::bounding_box::BoundingBox;
use glam::Vec3;

/// Result of partitioning a set of subtrees along one axis.
struct Partition {
    cost: f32,
    split_index: usize,
    a: BoundingBox,
    b: BoundingBox,
}

struct SweepResources<'a> {
    subtrees: &'a [NodeChild],
    centroids: Vec<Vec3>,
    /// Scratch for the prefix bounds of the sweep.
    merged: Vec<BoundingBox>,
    staging: Vec<Node>,
}

impl SweepResources<'_> {
    /// Sorts `index_map` along `axis` and finds the cheapest split by sweeping across it.
    fn find_partition_for_axis(&mut self, index_map: &mut [usize], axis: usize) -> Partition {
        debug_assert!(index_map.len() > 1);
        let centroids = &self.centroids;
        // Ties fall back to the subtree position so the result never depends on sort stability.
        index_map.sort_unstable_by(|&a, &b| {
            centroids[a][axis]
                .total_cmp(&centroids[b][axis])
                .then(a.cmp(&b))
        });

        let count = index_map.len();
        let last_index = count - 1;
        self.merged.clear();
        self.merged.push(self.subtrees[index_map[0]].bounds());
        for i in 1..last_index {
            let merged = BoundingBox::merge(&self.merged[i - 1], &self.subtrees[index_map[i]].bounds());
            self.merged.push(merged);
        }

        // Flat boxes still cost something.
        const NORMAL_EPSILON: f32 = f32::MIN_POSITIVE;
        let mut b_merged = BoundingBox::empty();
        let mut best = Partition {
            cost: f32::MAX,
            split_index: 0,
            a: BoundingBox::empty(),
            b: BoundingBox::empty(),
        };
        for i in (1..=last_index).rev() {
            b_merged = BoundingBox::merge(&b_merged, &self.subtrees[index_map[i]].bounds());
            let a_merged = self.merged[i - 1];
            let a_count = i as f32;
            let b_count = (count - i) as f32;
            let cost = a_count * (1.0 + a_count * 0.001) * (NORMAL_EPSILON + a_merged.metric())
                + b_count * (1.0 + b_count * 0.001) * (NORMAL_EPSILON + b_merged.metric());
            if cost < best.cost || best.split_index == 0 {
                best = Partition {
                    cost,
                    split_index: i,
                    a: a_merged,
                    b: b_merged,
                };
            }
        }
        best
    }

    /// Picks the cheapest split over all three axes and leaves `index_map` ordered for it.
    fn find_partition(&mut self, index_map: &mut [usize]) -> Partition {
        let mut best_map = index_map.to_vec();
        let mut best = self.find_partition_for_axis(&mut best_map, 0);
        let mut candidate_map = index_map.to_vec();
        for axis in 1..3 {
            candidate_map.copy_from_slice(index_map);
            let candidate = self.find_partition_for_axis(&mut candidate_map, axis);
            // Earlier axes win ties.
            if candidate.cost < best.cost {
                best = candidate;
                std::mem::swap(&mut best_map, &mut candidate_map);
            }
        }
        index_map.copy_from_slice(&best_map);
        best
    }

    fn create_child(&mut self, index_map: &mut [usize], bounds: BoundingBox) -> NodeChild {
        if index_map.len() == 1 {
            let subtree_index = index_map[0];
            NodeChild {
                index: Tree::encode(subtree_index as i32),
                ..self.subtrees[subtree_index]
            }
        } else {
            let leaf_count = index_map
                .iter()
                .map(|&i| self.subtrees[i].leaf_count)
                .sum();
            let index = self.create_staging_node(index_map);
            NodeChild {
                min: bounds.min,
                max: bounds.max,
                index,
                leaf_count,
            }
        }
    }

    fn split_into_children(&mut self, index_map: &mut [usize], node_index: usize) {
        debug_assert!(index_map.len() >= 2);
        let node = if index_map.len() == 2 {
            let (a, b) = (self.subtrees[index_map[0]], self.subtrees[index_map[1]]);
            let a = self.create_child(&mut index_map[..1], a.bounds());
            let b = self.create_child(&mut index_map[1..], b.bounds());
            Node { a, b }
        } else {
            let partition = self.find_partition(index_map);
            let (left, right) = index_map.split_at_mut(partition.split_index);
            let a = self.create_child(left, partition.a);
            let b = self.create_child(right, partition.b);
            Node { a, b }
        };
        self.staging[node_index] = node;
    }

    fn create_staging_node(&mut self, index_map: &mut [usize]) -> i32 {
        let node_index = self.staging.len();
        self.staging.push(Node::default());
        self.split_into_children(index_map, node_index);
        node_index as i32
    }
}

/// Builds a binary hierarchy over `subtrees` with a top-down sweep using a surface area
/// heuristic.
///
/// Returns staging nodes where node 0 is the root. In the staging nodes, a nonnegative child
/// index is another staging node and a negative child index is an encoded position in
/// `subtrees`. Child slots that reference subtrees carry the subtree's bounds and leaf count.
pub(crate) fn build_staging_nodes(subtrees: &[NodeChild]) -> Vec<Node> {
    assert!(subtrees.len() >= 2, "A treelet needs at least two subtrees.");
    let mut resources = SweepResources {
        subtrees,
        centroids: subtrees.iter().map(|s| s.bounds().doubled_centroid()).collect(),
        merged: Vec::with_capacity(subtrees.len()),
        staging: Vec::with_capacity(subtrees.len() - 1),
    };
    let mut index_map: Vec<usize> = (0..subtrees.len()).collect();
    resources.create_staging_node(&mut index_map);
    resources.staging
}
