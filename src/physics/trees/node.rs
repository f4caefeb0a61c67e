use crate::utilities::bounding_box::BoundingBox;
use glam::Vec3;

/// One of the two child slots of a tree node: the child's bounds, its index, and the number of
/// leaves below it.
///
/// A nonnegative index points at an internal node. A negative index is an encoded leaf index;
/// see [`Tree::encode`](super::tree::Tree::encode).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NodeChild {
    pub min: Vec3,
    pub index: i32,
    pub max: Vec3,
    pub leaf_count: i32,
}

impl NodeChild {
    #[inline(always)]
    pub fn is_leaf(&self) -> bool {
        self.index < 0
    }

    #[inline(always)]
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::new(self.min, self.max)
    }

    #[inline(always)]
    pub fn metric(&self) -> f32 {
        BoundingBox::compute_bounds_metric(self.min, self.max)
    }

    #[inline(always)]
    pub fn intersects(&self, other: &NodeChild) -> bool {
        BoundingBox::intersects_bounds(self.min, self.max, other.min, other.max)
    }

    #[inline(always)]
    pub(crate) fn set_bounds(&mut self, bounds: BoundingBox) {
        self.min = bounds.min;
        self.max = bounds.max;
    }
}

/// 2-wide tree node.
///
/// The node doesn't store its own bounds; those live in the parent's child slot. The root's
/// bounds are never stored anywhere, which is fine for broad phase use where queries are
/// almost always inside the root anyway.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Node {
    pub a: NodeChild,
    pub b: NodeChild,
}

impl Node {
    #[inline(always)]
    pub fn child(&self, child_index: i32) -> &NodeChild {
        debug_assert!(child_index == 0 || child_index == 1);
        if child_index == 0 {
            &self.a
        } else {
            &self.b
        }
    }

    #[inline(always)]
    pub fn child_mut(&mut self, child_index: i32) -> &mut NodeChild {
        debug_assert!(child_index == 0 || child_index == 1);
        if child_index == 0 {
            &mut self.a
        } else {
            &mut self.b
        }
    }

    /// Bounds enclosing both children.
    #[inline(always)]
    pub fn merged_bounds(&self) -> BoundingBox {
        BoundingBox::merge(&self.a.bounds(), &self.b.bounds())
    }
}

/// Bookkeeping for a node that queries never touch.
///
/// Kept out of [`Node`] so traversal only streams through child bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Metanode {
    pub parent: i32,
    pub index_in_parent: i32,
    /// Nonzero while the node is scheduled as a refinement target. Other treelets stop at
    /// flagged nodes instead of expanding through them.
    pub refine_flag: i32,
}

impl Metanode {
    pub(crate) const ROOT: Metanode = Metanode {
        parent: -1,
        index_in_parent: -1,
        refine_flag: 0,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_slots_are_addressed_by_index() {
        let mut node = Node::default();
        node.child_mut(1).index = 7;
        node.child_mut(0).index = -3;
        assert_eq!(node.b.index, 7);
        assert!(node.child(0).is_leaf());
        assert!(!node.child(1).is_leaf());
    }

    #[test]
    fn merged_bounds_cover_both_children() {
        let mut node = Node::default();
        node.a.set_bounds(BoundingBox::new(Vec3::ZERO, Vec3::ONE));
        node.b.set_bounds(BoundingBox::new(Vec3::splat(2.0), Vec3::splat(3.0)));
        let merged = node.merged_bounds();
        assert_eq!(merged.min, Vec3::ZERO);
        assert_eq!(merged.max, Vec3::splat(3.0));
        assert_eq!(node.a.metric(), 3.0);
    }
}
