use super::leaf::Leaf;
use super::node::{Metanode, Node, NodeChild};
use super::tree::Tree;
use crate::utilities::bounding_box::BoundingBox;
use crate::utilities::memory::buffer_pool::BufferPool;

impl Tree {
    /// Adds a leaf to the tree with the given bounding box and returns the index of the added leaf.
    ///
    /// The leaf descends from the root into whichever child grows the least, and a new internal
    /// node is created where it meets an existing leaf. No rotations are performed; quality
    /// depends on insertion order until refinement catches up.
    pub fn add(&mut self, bounds: BoundingBox, pool: &mut BufferPool) -> i32 {
        if self.leaves.len() == self.leaves.capacity() {
            // The pool rounds up to the next power of two.
            self.resize(pool, self.leaves.len() + 1);
        }
        let leaf_count = self.leaf_count();
        if leaf_count < 2 {
            // The root is partial.
            *self.child_mut(0, leaf_count) = NodeChild {
                min: bounds.min,
                max: bounds.max,
                index: Self::encode(leaf_count),
                leaf_count: 1,
            };
            self.leaves.push(Leaf::new(0, leaf_count));
            return leaf_count;
        }

        let new_leaf_index = leaf_count;
        let mut node_index = 0;
        loop {
            let node = &self.nodes[node_index as usize];
            let (min_a, max_a) =
                BoundingBox::create_merged(bounds.min, bounds.max, node.a.min, node.a.max);
            let (min_b, max_b) =
                BoundingBox::create_merged(bounds.min, bounds.max, node.b.min, node.b.max);
            let increase_a = BoundingBox::compute_bounds_metric(min_a, max_a) - node.a.metric();
            let increase_b = BoundingBox::compute_bounds_metric(min_b, max_b) - node.b.metric();
            let use_a = if increase_a == increase_b {
                node.a.leaf_count < node.b.leaf_count
            } else {
                increase_a < increase_b
            };
            let (child_index, merged_min, merged_max) = if use_a {
                (0, min_a, max_a)
            } else {
                (1, min_b, max_b)
            };
            let child = *node.child(child_index);

            if child.leaf_count == 1 {
                // The merge target is a leaf; it gets pushed down into a new node alongside the
                // inserted leaf.
                let new_node_index = self.node_count();
                self.nodes.push(Node {
                    a: NodeChild {
                        min: bounds.min,
                        max: bounds.max,
                        index: Self::encode(new_leaf_index),
                        leaf_count: 1,
                    },
                    b: child,
                });
                self.metanodes.push(Metanode {
                    parent: node_index,
                    index_in_parent: child_index,
                    refine_flag: 0,
                });
                self.leaves[Self::encode(child.index) as usize] = Leaf::new(new_node_index, 1);
                self.leaves.push(Leaf::new(new_node_index, 0));
                *self.child_mut(node_index, child_index) = NodeChild {
                    min: merged_min,
                    max: merged_max,
                    index: new_node_index,
                    leaf_count: 2,
                };
                return new_leaf_index;
            }

            let slot = self.child_mut(node_index, child_index);
            slot.min = merged_min;
            slot.max = merged_max;
            slot.leaf_count += 1;
            node_index = child.index;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn unit_box(x: f32) -> BoundingBox {
        BoundingBox::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0))
    }

    #[test]
    fn first_two_leaves_fill_the_root() {
        let mut pool = BufferPool::new();
        let mut tree = Tree::new(&mut pool, 4);
        assert_eq!(tree.add(unit_box(0.0), &mut pool), 0);
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.add(unit_box(5.0), &mut pool), 1);
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.nodes[0].a.index, Tree::encode(0));
        assert_eq!(tree.nodes[0].b.index, Tree::encode(1));
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn third_leaf_joins_the_cheaper_side() {
        let mut pool = BufferPool::new();
        let mut tree = Tree::new(&mut pool, 4);
        tree.add(unit_box(0.0), &mut pool);
        tree.add(unit_box(10.0), &mut pool);
        let leaf = tree.add(unit_box(9.0), &mut pool);
        assert_eq!(tree.node_count(), 2);
        // Leaf 1 sits at x = 10 and is the cheaper merge target.
        assert_eq!(tree.nodes[0].b.index, 1);
        assert_eq!(tree.nodes[0].b.leaf_count, 2);
        assert_eq!(tree.leaves[leaf as usize], Leaf::new(1, 0));
        assert_eq!(tree.leaves[1], Leaf::new(1, 1));
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut pool = BufferPool::new();
        let mut tree = Tree::new(&mut pool, 1);
        for i in 0..100 {
            assert_eq!(tree.add(unit_box(i as f32 * 0.5), &mut pool), i);
        }
        assert_eq!(tree.leaf_count(), 100);
        assert_eq!(tree.node_count(), 99);
        assert!(tree.validate().is_ok());
    }
}
