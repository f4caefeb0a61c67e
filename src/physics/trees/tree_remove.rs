use super::leaf::Leaf;
use super::tree::Tree;

impl Tree {
    /// Removes a node by moving the last node into its slot and fixing up every reference to
    /// the moved node. The removed node must already be detached from the tree.
    fn remove_node_at(&mut self, node_index: i32) {
        debug_assert!(
            node_index > 0 && node_index < self.node_count(),
            "Can only remove non-root nodes that exist."
        );
        self.nodes.swap_remove(node_index as usize);
        self.metanodes.swap_remove(node_index as usize);
        if node_index < self.node_count() {
            // A node was moved into the removed slot; its parent and children still point at
            // the old last index.
            let moved_metanode = self.metanodes[node_index as usize];
            self.child_mut(moved_metanode.parent, moved_metanode.index_in_parent)
                .index = node_index;
            let moved = self.nodes[node_index as usize];
            self.set_parent_of(moved.a.index, node_index, 0);
            self.set_parent_of(moved.b.index, node_index, 1);
        }
    }

    /// Walks up from a node whose parent slot lost a leaf, shrinking bounds and leaf counts.
    fn refit_for_removal(&mut self, mut node_index: i32) {
        loop {
            let metanode = self.metanodes[node_index as usize];
            if metanode.parent < 0 {
                break;
            }
            let merged = self.nodes[node_index as usize].merged_bounds();
            let slot = self.child_mut(metanode.parent, metanode.index_in_parent);
            slot.set_bounds(merged);
            slot.leaf_count -= 1;
            node_index = metanode.parent;
        }
    }

    /// Removes a leaf at the given index. If the index is not at the end of the leaf list, the
    /// last leaf is swapped into the removed location.
    ///
    /// Returns the former index of the leaf that was moved into the removed leaf's slot, if any.
    /// If `leaf_index` pointed at the last slot in the list, then this returns -1 since no leaf
    /// was moved.
    pub fn remove_at(&mut self, leaf_index: i32) -> i32 {
        assert!(
            leaf_index >= 0 && leaf_index < self.leaf_count(),
            "Leaf index must be a valid index in the tree's leaf array."
        );
        let leaf = self.leaves.swap_remove(leaf_index as usize);
        let leaf_count = self.leaf_count();
        if leaf_index < leaf_count {
            let moved = self.leaves[leaf_index as usize];
            self.child_mut(moved.node_index(), moved.child_index()).index =
                Self::encode(leaf_index);
        }

        let node_index = leaf.node_index();
        let survivor_index = leaf.child_index() ^ 1;
        let metanode = self.metanodes[node_index as usize];
        if metanode.parent >= 0 {
            // The node is left with a single child. Pull that child up into the parent's slot
            // and drop the node.
            let survivor = *self.child(node_index, survivor_index);
            *self.child_mut(metanode.parent, metanode.index_in_parent) = survivor;
            self.set_parent_of(survivor.index, metanode.parent, metanode.index_in_parent);
            self.refit_for_removal(metanode.parent);
            self.remove_node_at(node_index);
        } else if leaf_count > 0 {
            // The root is allowed to be partial.
            let survivor = *self.child(0, survivor_index);
            if survivor.index >= 0 {
                // Collapse the internal survivor into the root.
                let pulled = self.nodes[survivor.index as usize];
                self.nodes[0] = pulled;
                self.set_parent_of(pulled.a.index, 0, 0);
                self.set_parent_of(pulled.b.index, 0, 1);
                self.remove_node_at(survivor.index);
            } else if survivor_index == 1 {
                self.nodes[0].a = survivor;
                self.leaves[Self::encode(survivor.index) as usize] = Leaf::new(0, 0);
            }
        }

        if leaf_index < leaf_count {
            leaf_count
        } else {
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::physics::trees::tree::Tree;
    use crate::utilities::bounding_box::BoundingBox;
    use crate::utilities::memory::buffer_pool::BufferPool;
    use glam::Vec3;

    fn build(count: usize, pool: &mut BufferPool) -> Tree {
        let mut tree = Tree::new(pool, count.max(1));
        for i in 0..count {
            let min = Vec3::new((i % 7) as f32 * 1.5, (i / 7) as f32 * 1.5, 0.0);
            tree.add(BoundingBox::new(min, min + Vec3::ONE), pool);
        }
        tree
    }

    #[test]
    fn removing_the_last_leaf_moves_nothing() {
        let mut pool = BufferPool::new();
        let mut tree = build(5, &mut pool);
        assert_eq!(tree.remove_at(4), -1);
        assert_eq!(tree.leaf_count(), 4);
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn removing_an_inner_leaf_reports_the_moved_leaf() {
        let mut pool = BufferPool::new();
        let mut tree = build(6, &mut pool);
        let last_bounds = tree.get_bounds(5);
        assert_eq!(tree.remove_at(1), 5);
        assert_eq!(tree.get_bounds(1), last_bounds);
        assert_eq!(tree.node_count(), 4);
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn removing_down_to_empty_keeps_the_root() {
        let mut pool = BufferPool::new();
        let mut tree = build(9, &mut pool);
        let mut i = 0;
        while tree.leaf_count() > 0 {
            let target = (i * 5) % tree.leaf_count();
            tree.remove_at(target);
            assert!(tree.validate().is_ok(), "invalid after removing {target}");
            assert_eq!(tree.node_count(), (tree.leaf_count() - 1).max(1));
            i += 1;
        }
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn add_then_remove_restores_counts() {
        let mut pool = BufferPool::new();
        let mut tree = build(12, &mut pool);
        let (nodes, leaves) = (tree.node_count(), tree.leaf_count());
        let added = tree.add(BoundingBox::new(Vec3::splat(3.0), Vec3::splat(4.0)), &mut pool);
        assert_eq!(tree.remove_at(added), -1);
        assert_eq!((tree.node_count(), tree.leaf_count()), (nodes, leaves));
        assert!(tree.validate().is_ok());
    }
}
