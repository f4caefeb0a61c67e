/// Collection of unique indices supporting add, remove, and contains operations.
///
/// Stored as a flat bitset; membership costs one bit per possible index.
#[derive(Clone, Debug, Default)]
pub struct IndexSet {
    /// Packed flags, 64 indices per word.
    pub flags: Vec<u64>,
    count: usize,
}

const SHIFT: u32 = 6;
const MASK: usize = 63;

impl IndexSet {
    /// Creates a set able to hold indices below `initial_capacity` without growing.
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            flags: vec![0; Self::bundle_capacity(initial_capacity)],
            count: 0,
        }
    }

    #[inline(always)]
    fn bundle_capacity(count: usize) -> usize {
        (count + MASK) >> SHIFT
    }

    /// Number of indices in the set.
    #[inline(always)]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Checks whether the set contains `index`.
    #[inline(always)]
    pub fn contains(&self, index: usize) -> bool {
        let bundle = index >> SHIFT;
        bundle < self.flags.len() && (self.flags[bundle] & (1u64 << (index & MASK))) != 0
    }

    /// Adds an index to the set, growing the flag storage if needed.
    /// Returns false if the index was already present.
    pub fn add(&mut self, index: usize) -> bool {
        let bundle = index >> SHIFT;
        if bundle >= self.flags.len() {
            self.flags.resize(bundle + 1, 0);
        }
        let bit = 1u64 << (index & MASK);
        if self.flags[bundle] & bit != 0 {
            return false;
        }
        self.flags[bundle] |= bit;
        self.count += 1;
        true
    }

    /// Adds an index that must not already be present.
    #[inline]
    pub fn add_unsafely(&mut self, index: usize) {
        let added = self.add(index);
        debug_assert!(added, "Index {} was already in the set.", index);
    }

    /// Removes an index from the set. Returns false if it was not present.
    pub fn remove(&mut self, index: usize) -> bool {
        let bundle = index >> SHIFT;
        if bundle >= self.flags.len() {
            return false;
        }
        let bit = 1u64 << (index & MASK);
        if self.flags[bundle] & bit == 0 {
            return false;
        }
        self.flags[bundle] &= !bit;
        self.count -= 1;
        true
    }

    /// Checks whether none of the given indices are in the set.
    pub fn can_fit(&self, indices: impl IntoIterator<Item = usize>) -> bool {
        indices.into_iter().all(|index| !self.contains(index))
    }

    /// Removes every index.
    pub fn clear(&mut self) {
        self.flags.fill(0);
        self.count = 0;
    }
}
