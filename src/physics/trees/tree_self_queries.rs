use super::node::{Node, NodeChild};
use super::tree::Tree;

/// Receives pairs of leaves whose bounds overlap.
pub trait IOverlapHandler {
    fn handle(&mut self, index_a: i32, index_b: i32);
}

impl<F: FnMut(i32, i32)> IOverlapHandler for F {
    #[inline(always)]
    fn handle(&mut self, index_a: i32, index_b: i32) {
        self(index_a, index_b)
    }
}

impl Tree {
    fn dispatch_test_for_leaf<H: IOverlapHandler>(
        &self,
        leaf_index: i32,
        leaf_child: &NodeChild,
        node_index: i32,
        results: &mut H,
    ) {
        if node_index < 0 {
            results.handle(leaf_index, Self::encode(node_index));
        } else {
            self.test_leaf_against_node(leaf_index, leaf_child, node_index, results);
        }
    }

    pub(crate) fn test_leaf_against_node<H: IOverlapHandler>(
        &self,
        leaf_index: i32,
        leaf_child: &NodeChild,
        node_index: i32,
        results: &mut H,
    ) {
        let node = &self.nodes[node_index as usize];
        let a_intersects = leaf_child.intersects(&node.a);
        let b_intersects = leaf_child.intersects(&node.b);
        if a_intersects {
            self.dispatch_test_for_leaf(leaf_index, leaf_child, node.a.index, results);
        }
        if b_intersects {
            self.dispatch_test_for_leaf(leaf_index, leaf_child, node.b.index, results);
        }
    }

    #[inline(always)]
    pub(crate) fn dispatch_test_for_nodes<H: IOverlapHandler>(
        &self,
        a: &NodeChild,
        b: &NodeChild,
        results: &mut H,
    ) {
        if a.index >= 0 {
            if b.index >= 0 {
                self.get_overlaps_between_different_nodes(
                    &self.nodes[a.index as usize],
                    &self.nodes[b.index as usize],
                    results,
                );
            } else {
                // Leaf B versus node A.
                self.test_leaf_against_node(Self::encode(b.index), b, a.index, results);
            }
        } else if b.index >= 0 {
            // Leaf A versus node B.
            self.test_leaf_against_node(Self::encode(a.index), a, b.index, results);
        } else {
            results.handle(Self::encode(a.index), Self::encode(b.index));
        }
    }

    pub(crate) fn get_overlaps_between_different_nodes<H: IOverlapHandler>(
        &self,
        a: &Node,
        b: &Node,
        results: &mut H,
    ) {
        // No shared children, so every combination needs a test.
        let aa_intersects = a.a.intersects(&b.a);
        let ab_intersects = a.a.intersects(&b.b);
        let ba_intersects = a.b.intersects(&b.a);
        let bb_intersects = a.b.intersects(&b.b);

        if aa_intersects {
            self.dispatch_test_for_nodes(&a.a, &b.a, results);
        }
        if ab_intersects {
            self.dispatch_test_for_nodes(&a.a, &b.b, results);
        }
        if ba_intersects {
            self.dispatch_test_for_nodes(&a.b, &b.a, results);
        }
        if bb_intersects {
            self.dispatch_test_for_nodes(&a.b, &b.b, results);
        }
    }

    pub(crate) fn get_overlaps_in_node<H: IOverlapHandler>(&self, node: &Node, results: &mut H) {
        let ab = node.a.intersects(&node.b);
        if node.a.index >= 0 {
            self.get_overlaps_in_node(&self.nodes[node.a.index as usize], results);
        }
        if node.b.index >= 0 {
            self.get_overlaps_in_node(&self.nodes[node.b.index as usize], results);
        }
        if ab {
            self.dispatch_test_for_nodes(&node.a, &node.b, results);
        }
    }

    /// Reports every pair of leaves in this tree with overlapping bounds. Each unordered pair
    /// is reported once.
    pub fn get_self_overlaps<H: IOverlapHandler>(&self, results: &mut H) {
        // With fewer than two leaves, nothing can overlap.
        if self.leaf_count() < 2 {
            return;
        }
        self.get_overlaps_in_node(&self.nodes[0], results);
    }
}
