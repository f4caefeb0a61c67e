use super::tree::Tree;

impl Tree {
    /// Exchanges the memory locations of two non-root nodes, fixing up every reference to
    /// either of them.
    pub(crate) fn swap_nodes(&mut self, index_a: i32, index_b: i32) {
        debug_assert!(
            index_a > 0 && index_b > 0,
            "The root never moves; it must stay at index 0."
        );
        self.nodes.swap(index_a as usize, index_b as usize);
        self.metanodes.swap(index_a as usize, index_b as usize);

        let (a, b) = (index_a as usize, index_b as usize);
        if self.metanodes[a].parent == index_a {
            // The original B's parent was A. That parent has moved.
            self.metanodes[a].parent = index_b;
        } else if self.metanodes[b].parent == index_b {
            // The original A's parent was B. That parent has moved.
            self.metanodes[b].parent = index_a;
        }

        let (meta_a, meta_b) = (self.metanodes[a], self.metanodes[b]);
        self.child_mut(meta_a.parent, meta_a.index_in_parent).index = index_a;
        self.child_mut(meta_b.parent, meta_b.index_in_parent).index = index_b;

        for node_index in [index_a, index_b] {
            let node = self.nodes[node_index as usize];
            self.set_parent_of(node.a.index, node_index, 0);
            self.set_parent_of(node.b.index, node_index, 1);
        }
    }

    /// Computes the index where the given node would be located if the tree were in depth
    /// first traversal order.
    pub fn compute_cache_optimal_location(&self, node_index: i32) -> i32 {
        let mut left_node_count = 0;
        let mut chained_node_index = node_index;
        loop {
            let metanode = self.metanodes[chained_node_index as usize];
            if metanode.parent < 0 {
                break;
            }
            chained_node_index = metanode.parent;
            left_node_count += 1;
            if metanode.index_in_parent == 1 {
                left_node_count += self.nodes[metanode.parent as usize].a.leaf_count - 1;
            }
        }
        left_node_count
    }

    /// Moves the children of a node into the positions they would have in depth first order,
    /// assuming the node itself is already in place. Does nothing for trees with two or fewer
    /// leaves.
    pub fn incremental_cache_optimize(&mut self, node_index: i32) {
        if self.leaf_count() <= 2 {
            return;
        }
        let node_count = self.node_count();
        let a = self.nodes[node_index as usize].a;
        let target_a = node_index + 1;
        if a.index >= 0 && a.index != target_a && target_a < node_count {
            self.swap_nodes(a.index, target_a);
        }
        // The swap may have moved b.
        let node = self.nodes[node_index as usize];
        let target_b = node_index + node.a.leaf_count;
        if node.b.index >= 0 && node.b.index != target_b && target_b < node_count {
            self.swap_nodes(node.b.index, target_b);
        }
    }

    fn cache_optimize_recursive(&mut self, node_index: i32, next_index: &mut i32) {
        for child_index in 0..2 {
            let child = self.child(node_index, child_index).index;
            if child >= 0 {
                debug_assert!(
                    *next_index > 0 && *next_index < self.node_count(),
                    "Swap target should be within the node set."
                );
                if child != *next_index {
                    self.swap_nodes(child, *next_index);
                }
                let moved_to = *next_index;
                *next_index += 1;
                self.cache_optimize_recursive(moved_to, next_index);
            }
        }
    }

    /// Puts every node below the given node into depth first order. Requires that the node is
    /// already at its depth first position.
    pub fn cache_optimize(&mut self, node_index: i32) {
        if self.leaf_count() <= 2 {
            return;
        }
        let mut next_index = node_index + 1;
        self.cache_optimize_recursive(node_index, &mut next_index);
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

    fn random_tree(count: usize, pool: &mut BufferPool) -> Tree {
        let mut rng = StdRng::seed_from_u64(11);
        let mut tree = Tree::new(pool, count);
        for _ in 0..count {
            let min = Vec3::new(rng.gen_range(0.0..50.0), rng.gen_range(0.0..50.0), 0.0);
            tree.add(BoundingBox::new(min, min + Vec3::ONE), pool);
        }
        tree
    }

    fn leaf_bounds(tree: &Tree) -> Vec<BoundingBox> {
        (0..tree.leaf_count()).map(|i| tree.get_bounds(i)).collect()
    }

    #[test]
    fn swapping_parent_and_child_keeps_links() {
        let mut pool = BufferPool::new();
        let mut tree = random_tree(20, &mut pool);
        let parent = (1..tree.node_count())
            .find(|&n| tree.nodes[n as usize].a.index >= 0)
            .expect("some non-root node has an internal child");
        let child = tree.nodes[parent as usize].a.index;
        let bounds = leaf_bounds(&tree);
        tree.swap_nodes(parent, child);
        assert!(tree.validate().is_ok());
        assert_eq!(leaf_bounds(&tree), bounds);
    }

    #[test]
    fn full_optimization_yields_depth_first_order() {
        let mut pool = BufferPool::new();
        let mut tree = random_tree(64, &mut pool);
        let bounds = leaf_bounds(&tree);
        tree.cache_optimize(0);
        assert!(tree.validate().is_ok());
        assert_eq!(leaf_bounds(&tree), bounds);
        for node_index in 0..tree.node_count() {
            assert_eq!(tree.compute_cache_optimal_location(node_index), node_index);
        }
    }

    #[test]
    fn incremental_optimization_keeps_the_tree_valid() {
        let mut pool = BufferPool::new();
        let mut tree = random_tree(40, &mut pool);
        for node_index in 0..tree.node_count() {
            tree.incremental_cache_optimize(node_index);
            assert!(tree.validate().is_ok());
        }
    }
}
