use super::node::{Node, NodeChild};
use super::tree::Tree;
use crate::utilities::bounding_box::BoundingBox;

impl Tree {
    fn refit_node(&mut self, node_index: i32) -> BoundingBox {
        for child_index in 0..2 {
            let child = *self.child(node_index, child_index);
            if child.index >= 0 {
                let bounds = self.refit_node(child.index);
                self.child_mut(node_index, child_index).set_bounds(bounds);
            }
        }
        self.nodes[node_index as usize].merged_bounds()
    }

    /// Updates the bounds of every internal node to tightly contain the leaf bounds below it.
    pub fn refit(&mut self) {
        // With two or fewer leaves, the root's children are all leaves and nothing can change.
        if self.leaf_count() <= 2 {
            return;
        }
        self.refit_node(0);
    }

    /// Refits the subtree in child slot `child_index` of `parent_index` and returns how much
    /// the summed bounds metric of the subtree's internal nodes changed.
    pub(crate) fn refit_and_measure(&mut self, parent_index: i32, child_index: i32) -> f32 {
        let slot = *self.child(parent_index, child_index);
        debug_assert!(slot.index >= 0);
        let mut child_change = 0.0f32;
        for grandchild_index in 0..2 {
            if self.child(slot.index, grandchild_index).index >= 0 {
                child_change += self.refit_and_measure(slot.index, grandchild_index);
            }
        }
        let merged = self.nodes[slot.index as usize].merged_bounds();
        self.child_mut(parent_index, child_index).set_bounds(merged);
        merged.metric() - slot.metric() + child_change
    }

    /// Read-only version of [`Tree::refit_and_measure`]. Refitted copies of every node in the
    /// subtree are pushed into `refitted_nodes` instead of being written back.
    pub(crate) fn measure_refit(
        &self,
        slot: &NodeChild,
        refitted_nodes: &mut Vec<(i32, Node)>,
    ) -> (BoundingBox, f32) {
        debug_assert!(slot.index >= 0);
        let mut node = self.nodes[slot.index as usize];
        let mut child_change = 0.0f32;
        for child_index in 0..2 {
            let child = node.child_mut(child_index);
            if child.index >= 0 {
                let (bounds, change) = self.measure_refit(child, refitted_nodes);
                child.set_bounds(bounds);
                child_change += change;
            }
        }
        let merged = node.merged_bounds();
        refitted_nodes.push((slot.index, node));
        (merged, merged.metric() - slot.metric() + child_change)
    }

    /// Refits the subtree in child slot `child_index` of `parent_index`, collecting the
    /// refinement candidate wavefront: the first internal nodes on each path whose leaf count
    /// is at or below the threshold.
    pub(crate) fn refit_and_mark(
        &mut self,
        parent_index: i32,
        child_index: i32,
        leaf_count_threshold: i32,
        refinement_candidates: &mut Vec<i32>,
    ) -> f32 {
        debug_assert!(leaf_count_threshold > 1);
        let slot = *self.child(parent_index, child_index);
        debug_assert_eq!(self.metanodes[slot.index as usize].refine_flag, 0);
        let child_change =
            self.refit_and_mark_children(slot.index, leaf_count_threshold, refinement_candidates);
        let merged = self.nodes[slot.index as usize].merged_bounds();
        self.child_mut(parent_index, child_index).set_bounds(merged);
        merged.metric() - slot.metric() + child_change
    }

    fn refit_and_mark_children(
        &mut self,
        node_index: i32,
        leaf_count_threshold: i32,
        refinement_candidates: &mut Vec<i32>,
    ) -> f32 {
        let mut child_change = 0.0f32;
        for child_index in 0..2 {
            let child = *self.child(node_index, child_index);
            if child.index >= 0 {
                if child.leaf_count <= leaf_count_threshold {
                    refinement_candidates.push(child.index);
                    child_change += self.refit_and_measure(node_index, child_index);
                } else {
                    child_change += self.refit_and_mark(
                        node_index,
                        child_index,
                        leaf_count_threshold,
                        refinement_candidates,
                    );
                }
            }
        }
        child_change
    }

    /// Refits the whole tree while collecting refinement candidates. Returns the change in
    /// internal bounds metric normalized by the root's metric.
    pub(crate) fn refit_and_mark_root(
        &mut self,
        leaf_count_threshold: i32,
        refinement_candidates: &mut Vec<i32>,
    ) -> f32 {
        debug_assert!(
            self.leaf_count() > 2,
            "There's no reason to refit a tree with 2 or less elements. Nothing would happen."
        );
        let child_change =
            self.refit_and_mark_children(0, leaf_count_threshold, refinement_candidates);
        // The root's own bounds don't count; refinement can't change them.
        let postmetric = self.nodes[0].merged_bounds().metric();
        if postmetric >= 1e-10 {
            child_change / postmetric
        } else {
            0.0
        }
    }
}
