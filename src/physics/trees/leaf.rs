/// Back-pointer from a leaf to the node child slot that holds it.
///
/// Leaves are identified by their position in the tree's leaf array; this only records where
/// the leaf's bounds currently live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Leaf {
    packed: u32,
}

impl Leaf {
    const CHILD_BIT: u32 = 1 << 31;

    /// Creates a leaf pointing at child `child_index` of node `node_index`.
    #[inline(always)]
    pub fn new(node_index: i32, child_index: i32) -> Self {
        debug_assert!(
            child_index == 0 || child_index == 1,
            "Binary trees can't have children in slots other than 0 and 1!"
        );
        debug_assert!(node_index >= 0);
        Self {
            packed: (node_index as u32 & !Self::CHILD_BIT)
                | if child_index == 1 { Self::CHILD_BIT } else { 0 },
        }
    }

    /// Index of the node that directly holds the leaf.
    #[inline(always)]
    pub fn node_index(&self) -> i32 {
        (self.packed & !Self::CHILD_BIT) as i32
    }

    /// Which child of the owning node holds the leaf.
    #[inline(always)]
    pub fn child_index(&self) -> i32 {
        (self.packed >> 31) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_node_and_child() {
        let leaf = Leaf::new(123, 1);
        assert_eq!(leaf.node_index(), 123);
        assert_eq!(leaf.child_index(), 1);

        let leaf = Leaf::new(0x7FFF_FFFF, 0);
        assert_eq!(leaf.node_index(), 0x7FFF_FFFF);
        assert_eq!(leaf.child_index(), 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "Binary trees can't have children in slots other than 0 and 1!")]
    fn rejects_third_child() {
        let _ = Leaf::new(5, 2);
    }
}
