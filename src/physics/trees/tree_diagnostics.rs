use super::tree::Tree;
use crate::utilities::bounding_box::BoundingBox;
use thiserror::Error;

/// Structural problems found by [`Tree::validate`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TreeValidationError {
    #[error("node {node} has parent {actual}, expected {expected}")]
    BadParent { node: i32, expected: i32, actual: i32 },
    #[error("node {node} has index in parent {actual}, expected {expected}")]
    BadIndexInParent { node: i32, expected: i32, actual: i32 },
    #[error("node {node} still carries a refinement flag")]
    RefineFlagSet { node: i32 },
    #[error("leaf {leaf} points at node {node} child {child}, which doesn't reference it")]
    BadLeafPointer { leaf: i32, node: i32, child: i32 },
    #[error("child {child} of node {node} claims {claimed} leaves but holds {actual}")]
    LeafCountMismatch { node: i32, child: i32, claimed: i32, actual: i32 },
    #[error("child {child} of node {node} has bounds that don't match its node's children")]
    BoundsMismatch { node: i32, child: i32 },
    #[error("child {child} of node {node} has a non-finite bounds metric")]
    NonFiniteBounds { node: i32, child: i32 },
    #[error("tree with {leaf_count} leaves has {actual} nodes, expected {expected}")]
    NodeCountMismatch { leaf_count: i32, expected: i32, actual: i32 },
    #[error("{reached} of {node_count} nodes are reachable from the root")]
    UnreachableNodes { reached: i32, node_count: i32 },
}

impl Tree {
    /// Measures the bounds metric of every child slot in the tree relative to the root's
    /// bounds. Lower is better. Returns 0 for trees with two or fewer leaves.
    pub fn measure_cost_metric(&self) -> f32 {
        if self.leaf_count() <= 2 {
            return 0.0;
        }
        let root_metric = self.nodes[0].merged_bounds().metric();
        let total_cost: f32 = self
            .nodes
            .iter()
            .flat_map(|node| [node.a.metric(), node.b.metric()])
            .sum();
        total_cost / root_metric
    }

    /// Summed bounds metric of all internal nodes below the root, relative to the root's
    /// bounds.
    pub fn compute_cost(&self) -> f32 {
        if self.leaf_count() <= 2 {
            return 0.0;
        }
        let root_metric = self.nodes[0].merged_bounds().metric();
        let internal_cost: f32 = self
            .nodes
            .iter()
            .flat_map(|node| [node.a, node.b])
            .filter(|child| child.index >= 0)
            .map(|child| child.metric())
            .sum();
        internal_cost / root_metric
    }

    fn compute_maximum_depth_of(&self, node_index: i32, depth: i32) -> i32 {
        let node = &self.nodes[node_index as usize];
        [node.a.index, node.b.index]
            .into_iter()
            .map(|child| {
                if child >= 0 {
                    self.compute_maximum_depth_of(child, depth + 1)
                } else {
                    depth
                }
            })
            .max()
            .unwrap_or(depth)
    }

    /// Number of internal nodes on the longest path from the root to a leaf.
    pub fn compute_maximum_depth(&self) -> i32 {
        if self.leaf_count() <= 2 {
            return if self.leaf_count() > 0 { 1 } else { 0 };
        }
        self.compute_maximum_depth_of(0, 1)
    }

    fn validate_node(
        &self,
        node_index: i32,
        expected_parent: i32,
        expected_index_in_parent: i32,
        child_count: i32,
        reached: &mut i32,
    ) -> Result<i32, TreeValidationError> {
        *reached += 1;
        let metanode = self.metanodes[node_index as usize];
        if metanode.parent != expected_parent {
            return Err(TreeValidationError::BadParent {
                node: node_index,
                expected: expected_parent,
                actual: metanode.parent,
            });
        }
        if metanode.index_in_parent != expected_index_in_parent {
            return Err(TreeValidationError::BadIndexInParent {
                node: node_index,
                expected: expected_index_in_parent,
                actual: metanode.index_in_parent,
            });
        }
        if metanode.refine_flag != 0 {
            return Err(TreeValidationError::RefineFlagSet { node: node_index });
        }

        let mut leaf_count = 0;
        for child_index in 0..child_count {
            let child = *self.child(node_index, child_index);
            if !child.metric().is_finite() {
                return Err(TreeValidationError::NonFiniteBounds { node: node_index, child: child_index });
            }
            let actual = if child.index >= 0 {
                let below = self.validate_node(child.index, node_index, child_index, 2, reached)?;
                let merged: BoundingBox = self.nodes[child.index as usize].merged_bounds();
                if merged != child.bounds() {
                    return Err(TreeValidationError::BoundsMismatch { node: node_index, child: child_index });
                }
                below
            } else {
                let leaf_index = Self::encode(child.index);
                let leaf = self.leaves[leaf_index as usize];
                if leaf.node_index() != node_index || leaf.child_index() != child_index {
                    return Err(TreeValidationError::BadLeafPointer {
                        leaf: leaf_index,
                        node: leaf.node_index(),
                        child: leaf.child_index(),
                    });
                }
                1
            };
            if actual != child.leaf_count {
                return Err(TreeValidationError::LeafCountMismatch {
                    node: node_index,
                    child: child_index,
                    claimed: child.leaf_count,
                    actual,
                });
            }
            leaf_count += actual;
        }
        Ok(leaf_count)
    }

    /// Checks every structural invariant of the tree: parent links, leaf back-pointers, leaf
    /// counts, exact bounds, node count, and that no refinement flags were left behind.
    pub fn validate(&self) -> Result<(), TreeValidationError> {
        let expected_node_count = (self.leaf_count() - 1).max(1);
        if self.node_count() != expected_node_count {
            return Err(TreeValidationError::NodeCountMismatch {
                leaf_count: self.leaf_count(),
                expected: expected_node_count,
                actual: self.node_count(),
            });
        }
        let mut reached = 0;
        let leaf_count =
            self.validate_node(0, -1, -1, self.root_child_count(), &mut reached)?;
        if reached != self.node_count() {
            return Err(TreeValidationError::UnreachableNodes {
                reached,
                node_count: self.node_count(),
            });
        }
        debug_assert_eq!(leaf_count, self.leaf_count());
        Ok(())
    }
}
