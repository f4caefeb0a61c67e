use super::node::{Node, NodeChild};
use super::tree::Tree;
use super::tree_self_queries::IOverlapHandler;

impl Tree {
    /// Tests a leaf of another tree against a node of this tree. Reports pairs with this tree's
    /// leaf second, so `self` plays the role of tree B.
    pub(crate) fn test_leaf_against_node_intertree<H: IOverlapHandler>(
        &self,
        leaf_index_a: i32,
        leaf_child_a: &NodeChild,
        node_index: i32,
        results: &mut H,
    ) {
        let node = &self.nodes[node_index as usize];
        for child in [&node.a, &node.b] {
            if leaf_child_a.intersects(child) {
                if child.index < 0 {
                    results.handle(leaf_index_a, Self::encode(child.index));
                } else {
                    self.test_leaf_against_node_intertree(leaf_index_a, leaf_child_a, child.index, results);
                }
            }
        }
    }

    /// Tests a node of this tree against a leaf of another tree. Reports pairs with this tree's
    /// leaf first, so `self` plays the role of tree A.
    pub(crate) fn test_node_against_leaf<H: IOverlapHandler>(
        &self,
        node_index: i32,
        leaf_index_b: i32,
        leaf_child_b: &NodeChild,
        results: &mut H,
    ) {
        let node = &self.nodes[node_index as usize];
        for child in [&node.a, &node.b] {
            if leaf_child_b.intersects(child) {
                if child.index < 0 {
                    results.handle(Self::encode(child.index), leaf_index_b);
                } else {
                    self.test_node_against_leaf(child.index, leaf_index_b, leaf_child_b, results);
                }
            }
        }
    }

    #[inline(always)]
    pub(crate) fn dispatch_test_for_nodes_intertree<H: IOverlapHandler>(
        &self,
        a: &NodeChild,
        b: &NodeChild,
        tree_b: &Tree,
        results: &mut H,
    ) {
        if a.index >= 0 {
            if b.index >= 0 {
                self.get_overlaps_between_different_nodes_intertree(
                    &self.nodes[a.index as usize],
                    &tree_b.nodes[b.index as usize],
                    tree_b,
                    results,
                );
            } else {
                self.test_node_against_leaf(a.index, Self::encode(b.index), b, results);
            }
        } else if b.index >= 0 {
            tree_b.test_leaf_against_node_intertree(Self::encode(a.index), a, b.index, results);
        } else {
            results.handle(Self::encode(a.index), Self::encode(b.index));
        }
    }

    pub(crate) fn get_overlaps_between_different_nodes_intertree<H: IOverlapHandler>(
        &self,
        a: &Node,
        b: &Node,
        tree_b: &Tree,
        results: &mut H,
    ) {
        let aa_intersects = a.a.intersects(&b.a);
        let ab_intersects = a.a.intersects(&b.b);
        let ba_intersects = a.b.intersects(&b.a);
        let bb_intersects = a.b.intersects(&b.b);

        if aa_intersects {
            self.dispatch_test_for_nodes_intertree(&a.a, &b.a, tree_b, results);
        }
        if ab_intersects {
            self.dispatch_test_for_nodes_intertree(&a.a, &b.b, tree_b, results);
        }
        if ba_intersects {
            self.dispatch_test_for_nodes_intertree(&a.b, &b.a, tree_b, results);
        }
        if bb_intersects {
            self.dispatch_test_for_nodes_intertree(&a.b, &b.b, tree_b, results);
        }
    }

    /// Reports every pair of leaves with overlapping bounds where the first leaf belongs to
    /// this tree and the second to `tree_b`.
    pub fn get_overlaps_with_tree<H: IOverlapHandler>(&self, tree_b: &Tree, results: &mut H) {
        // Partial roots only have their first child slot populated.
        let (root_a, root_b) = (&self.nodes[0], &tree_b.nodes[0]);
        for i in 0..self.root_child_count() {
            let a = root_a.child(i);
            for j in 0..tree_b.root_child_count() {
                let b = root_b.child(j);
                if a.intersects(b) {
                    self.dispatch_test_for_nodes_intertree(a, b, tree_b, results);
                }
            }
        }
    }
}
