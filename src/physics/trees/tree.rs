use super::leaf::Leaf;
use super::node::{Metanode, Node, NodeChild};
use crate::utilities::bounding_box::BoundingBox;
use crate::utilities::memory::buffer_pool::BufferPool;
use glam::Vec3;

/// A binary bounding volume hierarchy.
///
/// The struct is defined here and extended with `impl Tree` blocks in the sibling `tree_*`
/// modules.
///
/// Node 0 is the root and always exists, even in an empty tree. The root holds
/// `min(leaf_count, 2)` children; every other node holds exactly two. Slots beyond the root's
/// child count contain stale data and must not be read.
pub struct Tree {
    /// Nodes of the tree. `nodes.len()` is the node count.
    pub nodes: Vec<Node>,
    /// Per-node bookkeeping, parallel to `nodes`.
    pub metanodes: Vec<Metanode>,
    /// Back-pointers for each leaf. `leaves.len()` is the leaf count.
    pub leaves: Vec<Leaf>,
}

impl Tree {
    /// Encodes a leaf index into the negative form used by node child indices. Applying it
    /// twice gives back the original value.
    #[inline(always)]
    pub fn encode(index: i32) -> i32 {
        -1 - index
    }

    /// Constructs an empty tree with room for `initial_leaf_capacity` leaves.
    pub fn new(pool: &mut BufferPool, initial_leaf_capacity: usize) -> Self {
        assert!(initial_leaf_capacity > 0, "Initial leaf capacity must be positive.");
        let mut tree = Self {
            nodes: Vec::new(),
            metanodes: Vec::new(),
            leaves: Vec::new(),
        };
        tree.resize(pool, initial_leaf_capacity);
        tree.push_root();
        tree
    }

    fn push_root(&mut self) {
        self.nodes.push(Node::default());
        self.metanodes.push(Metanode::ROOT);
    }

    #[inline(always)]
    pub fn node_count(&self) -> i32 {
        self.nodes.len() as i32
    }

    #[inline(always)]
    pub fn leaf_count(&self) -> i32 {
        self.leaves.len() as i32
    }

    /// Number of leaves the tree can hold before it has to grow its buffers.
    pub fn leaf_capacity(&self) -> usize {
        self.leaves.capacity()
    }

    /// Number of children the root currently holds.
    #[inline(always)]
    pub(crate) fn root_child_count(&self) -> i32 {
        self.leaf_count().min(2)
    }

    #[inline(always)]
    pub(crate) fn child(&self, node_index: i32, child_index: i32) -> &NodeChild {
        self.nodes[node_index as usize].child(child_index)
    }

    #[inline(always)]
    pub(crate) fn child_mut(&mut self, node_index: i32, child_index: i32) -> &mut NodeChild {
        self.nodes[node_index as usize].child_mut(child_index)
    }

    /// Gets the child slot that holds the given leaf.
    #[inline(always)]
    pub(crate) fn leaf_child(&self, leaf_index: i32) -> &NodeChild {
        let leaf = self.leaves[leaf_index as usize];
        self.child(leaf.node_index(), leaf.child_index())
    }

    /// Updates the back-pointer of whatever a child slot references, an internal node or a
    /// leaf, so that it points at `parent`'s child `index_in_parent`.
    #[inline(always)]
    pub(crate) fn set_parent_of(&mut self, child_reference: i32, parent: i32, index_in_parent: i32) {
        if child_reference >= 0 {
            let metanode = &mut self.metanodes[child_reference as usize];
            metanode.parent = parent;
            metanode.index_in_parent = index_in_parent;
        } else {
            self.leaves[Self::encode(child_reference) as usize] = Leaf::new(parent, index_in_parent);
        }
    }

    /// Gets the bounds of a leaf.
    pub fn get_bounds(&self, leaf_index: i32) -> BoundingBox {
        assert!(
            leaf_index >= 0 && leaf_index < self.leaf_count(),
            "Leaf index must be a valid index in the tree's leaf array."
        );
        self.leaf_child(leaf_index).bounds()
    }

    /// Applies updated bounds to the given leaf and refits the ancestors to match.
    pub fn update_bounds(&mut self, leaf_index: i32, min: Vec3, max: Vec3) {
        assert!(
            leaf_index >= 0 && leaf_index < self.leaf_count(),
            "Leaf index must be a valid index in the tree's leaf array."
        );
        let leaf = self.leaves[leaf_index as usize];
        let child = self.child_mut(leaf.node_index(), leaf.child_index());
        child.min = min;
        child.max = max;
        self.refit_for_node_bounds_change(leaf.node_index());
    }

    /// Resizes the buffers backing the tree's nodes and leaves. Will not shrink the buffers
    /// below the size needed by the currently resident nodes and leaves.
    pub fn resize(&mut self, pool: &mut BufferPool, target_leaf_slot_count: usize) {
        let leaf_capacity = target_leaf_slot_count.max(self.leaves.len());
        let node_capacity = leaf_capacity.saturating_sub(1).max(1);
        let leaf_count = self.leaves.len();
        let node_count = self.nodes.len();
        pool.resize_to_at_least(&mut self.leaves, leaf_capacity, leaf_count);
        pool.resize_to_at_least(&mut self.nodes, node_capacity, node_count);
        pool.resize_to_at_least(&mut self.metanodes, node_capacity, node_count);
    }

    /// Removes every leaf, leaving an empty root.
    pub fn clear(&mut self) {
        self.leaves.clear();
        self.nodes.clear();
        self.metanodes.clear();
        self.push_root();
    }

    /// Returns the tree's buffers to the pool. The tree holds no storage afterwards and must
    /// not be used again.
    pub fn dispose(&mut self, pool: &mut BufferPool) {
        pool.return_buffer(std::mem::take(&mut self.nodes));
        pool.return_buffer(std::mem::take(&mut self.metanodes));
        pool.return_buffer(std::mem::take(&mut self.leaves));
    }

    /// Walks up from `node_index`, rewriting each ancestor slot with the merged bounds of the
    /// node below it.
    pub fn refit_for_node_bounds_change(&mut self, mut node_index: i32) {
        loop {
            let metanode = self.metanodes[node_index as usize];
            if metanode.parent < 0 {
                break;
            }
            let merged = self.nodes[node_index as usize].merged_bounds();
            self.child_mut(metanode.parent, metanode.index_in_parent)
                .set_bounds(merged);
            node_index = metanode.parent;
        }
    }
}
