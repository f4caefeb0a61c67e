use super::node::{Node, NodeChild};
use super::tree::Tree;
use super::tree_sweep_builder::build_staging_nodes;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Internal subtree waiting in the collection heap, ordered by bounds metric.
#[derive(Clone, Copy, Debug)]
struct SubtreeHeapEntry {
    index: i32,
    cost: f32,
}

impl PartialEq for SubtreeHeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SubtreeHeapEntry {}

impl PartialOrd for SubtreeHeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SubtreeHeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .total_cmp(&other.cost)
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// Subtrees and internal nodes making up one treelet.
#[derive(Debug, Default)]
pub(crate) struct CollectedTreelet {
    /// Child references (node index or encoded leaf index) of the treelet's subtrees.
    pub subtrees: Vec<i32>,
    /// Internal nodes between the treelet root and its subtrees, excluding the root itself.
    /// Sorted ascending.
    pub internal_nodes: Vec<i32>,
    /// Summed bounds metric of `internal_nodes`.
    pub cost: f32,
}

/// A rebuilt treelet that hasn't been written into the tree yet.
#[derive(Debug)]
pub struct TreeletRefinement {
    pub(crate) target: i32,
    pub(crate) subtrees: Vec<i32>,
    pub(crate) internal_nodes: Vec<i32>,
    pub(crate) staging: Vec<Node>,
}

impl TreeletRefinement {
    /// Node at the root of the refined treelet.
    pub fn target(&self) -> i32 {
        self.target
    }
}

impl Tree {
    fn push_children_of(
        &self,
        node_index: i32,
        heap: &mut BinaryHeap<SubtreeHeapEntry>,
        subtrees: &mut Vec<i32>,
    ) {
        let node = &self.nodes[node_index as usize];
        for child in [&node.a, &node.b] {
            if child.index >= 0 {
                heap.push(SubtreeHeapEntry {
                    index: child.index,
                    cost: child.metric(),
                });
            } else {
                // Leaves can't be expanded.
                subtrees.push(child.index);
            }
        }
    }

    /// Collects the subtrees of the treelet rooted at `node_index` by repeatedly expanding the
    /// internal node with the largest bounds metric.
    ///
    /// Expansion stops at nodes flagged for refinement and once `maximum_subtrees` subtrees
    /// have been gathered. Either both or neither of a node's children are collected.
    pub(crate) fn collect_subtrees(&self, node_index: i32, maximum_subtrees: i32) -> CollectedTreelet {
        debug_assert!(
            maximum_subtrees >= 2,
            "Can't only consider some of a node's children, but specified maximum_subtrees precludes the treelet root's children."
        );
        let mut treelet = CollectedTreelet::default();
        let mut heap = BinaryHeap::with_capacity(maximum_subtrees as usize);
        self.push_children_of(node_index, &mut heap, &mut treelet.subtrees);

        // The treelet root's cost is excluded since it can't change.
        let mut remaining_subtree_space =
            maximum_subtrees - heap.len() as i32 - treelet.subtrees.len() as i32;
        while let Some(entry) = heap.pop() {
            if remaining_subtree_space >= 1 && self.metanodes[entry.index as usize].refine_flag == 0 {
                remaining_subtree_space -= 1;
                treelet.cost += entry.cost;
                treelet.internal_nodes.push(entry.index);
                self.push_children_of(entry.index, &mut heap, &mut treelet.subtrees);
            } else {
                // No room, or some other refinement owns it.
                treelet.subtrees.push(entry.index);
            }
        }

        // Keeps the rebuilt treelet from scrambling node order more than necessary.
        treelet.internal_nodes.sort_unstable();
        treelet
    }

    /// Gets the child slot that holds a subtree reference: the slot in the node's parent for
    /// internal nodes, or the slot holding the leaf for encoded leaf indices.
    pub(crate) fn subtree_child(&self, child_reference: i32) -> NodeChild {
        if child_reference >= 0 {
            let metanode = self.metanodes[child_reference as usize];
            *self.child(metanode.parent, metanode.index_in_parent)
        } else {
            *self.leaf_child(Self::encode(child_reference))
        }
    }

    /// Rebuilds the treelet rooted at `target` without modifying the tree.
    ///
    /// Returns `None` if the treelet has no internal nodes below its root, or if the rebuilt
    /// treelet would not lower the summed bounds metric.
    pub fn plan_refinement(&self, target: i32, maximum_subtrees: i32) -> Option<TreeletRefinement> {
        let treelet = self.collect_subtrees(target, maximum_subtrees);
        if treelet.internal_nodes.is_empty() {
            return None;
        }
        let subtree_children: Vec<NodeChild> = treelet
            .subtrees
            .iter()
            .map(|&reference| self.subtree_child(reference))
            .collect();
        let staging = build_staging_nodes(&subtree_children);
        debug_assert_eq!(staging.len(), treelet.internal_nodes.len() + 1);

        let new_cost: f32 = staging
            .iter()
            .flat_map(|node| [node.a, node.b])
            .filter(|child| child.index >= 0)
            .map(|child| child.metric())
            .sum();
        if new_cost < treelet.cost {
            Some(TreeletRefinement {
                target,
                subtrees: treelet.subtrees,
                internal_nodes: treelet.internal_nodes,
                staging,
            })
        } else {
            None
        }
    }

    /// Writes a planned treelet into the tree. The treelet's root and its internal nodes keep
    /// their indices; only their contents and the links below the root change.
    pub fn commit_refinement(&mut self, refinement: &TreeletRefinement) {
        let real_index = |staging_index: i32| {
            if staging_index == 0 {
                refinement.target
            } else {
                refinement.internal_nodes[staging_index as usize - 1]
            }
        };
        for (staging_index, staging_node) in refinement.staging.iter().enumerate() {
            let node_index = real_index(staging_index as i32);
            let mut node = *staging_node;
            for child_index in 0..2 {
                let child = node.child_mut(child_index);
                child.index = if child.index >= 0 {
                    real_index(child.index)
                } else {
                    refinement.subtrees[Self::encode(child.index) as usize]
                };
                let reference = child.index;
                self.set_parent_of(reference, node_index, child_index);
            }
            self.nodes[node_index as usize] = node;
        }
    }

    /// Plans and immediately commits a refinement of the treelet rooted at `target`. Returns
    /// true if the tree changed.
    pub fn refine_treelet(&mut self, target: i32, maximum_subtrees: i32) -> bool {
        match self.plan_refinement(target, maximum_subtrees) {
            Some(refinement) => {
                self.commit_refinement(&refinement);
                true
            }
            None => false,
        }
    }
}
