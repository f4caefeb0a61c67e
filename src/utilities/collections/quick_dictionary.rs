use rustc_hash::FxHashMap;
use std::hash::Hash;

/// Dictionary with dense, index-addressable key and value storage.
///
/// Entries live in parallel arrays so that an entry's slot index can be handed out and used for
/// direct access. Removal swaps the last entry into the removed slot, so slot indices are only
/// stable between removals.
#[derive(Clone, Debug)]
pub struct QuickDictionary<K, V> {
    /// Backing memory containing the keys of the dictionary. Indices from 0 to count-1 hold actual data.
    pub keys: Vec<K>,
    /// Backing memory containing the values of the dictionary. Indices from 0 to count-1 hold actual data.
    pub values: Vec<V>,
    table: FxHashMap<K, i32>,
}

impl<K: Copy + Eq + Hash, V> Default for QuickDictionary<K, V> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<K: Copy + Eq + Hash, V> QuickDictionary<K, V> {
    /// Creates a dictionary able to hold `capacity` entries without growing.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut table = FxHashMap::default();
        table.reserve(capacity);
        Self {
            keys: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
            table,
        }
    }

    /// Number of entries.
    #[inline(always)]
    pub fn count(&self) -> usize {
        self.keys.len()
    }

    /// Gets the slot holding `key`, or -1 if it is absent.
    #[inline]
    pub fn index_of(&self, key: &K) -> i32 {
        self.table.get(key).copied().unwrap_or(-1)
    }

    /// Checks if a key is present.
    #[inline]
    pub fn contains_key(&self, key: &K) -> bool {
        self.table.contains_key(key)
    }

    /// Gets the value for `key`, if present.
    #[inline]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.table.get(key).map(|&index| &self.values[index as usize])
    }

    /// Adds a pair if the key is absent. Returns true if it was added, false if the key existed
    /// and nothing changed.
    pub fn try_add(&mut self, key: K, value: V) -> bool {
        if self.table.contains_key(&key) {
            return false;
        }
        self.table.insert(key, self.keys.len() as i32);
        self.keys.push(key);
        self.values.push(value);
        true
    }

    /// Removes the entry at `index`, moving the last entry into its slot.
    pub fn fast_remove_at(&mut self, index: usize) -> (K, V) {
        let key = self.keys.swap_remove(index);
        let value = self.values.swap_remove(index);
        self.table.remove(&key);
        if index < self.keys.len() {
            self.table.insert(self.keys[index], index as i32);
        }
        (key, value)
    }

    /// Removes `key` if present, moving the last entry into its slot.
    pub fn fast_remove(&mut self, key: &K) -> Option<V> {
        let index = self.table.get(key).copied()?;
        Some(self.fast_remove_at(index as usize).1)
    }

    /// Ensures room for `capacity` entries in total.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        let additional = capacity.saturating_sub(self.keys.len());
        self.keys.reserve(additional);
        self.values.reserve(additional);
        self.table.reserve(additional);
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.keys.clear();
        self.values.clear();
        self.table.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removal_reindexes_moved_entry() {
        let mut dictionary = QuickDictionary::<u32, &str>::with_capacity(4);
        assert!(dictionary.try_add(10, "a"));
        assert!(dictionary.try_add(20, "b"));
        assert!(dictionary.try_add(30, "c"));
        assert!(!dictionary.try_add(20, "z"));
        assert_eq!(dictionary.get(&20), Some(&"b"));

        assert_eq!(dictionary.fast_remove(&10), Some("a"));
        assert_eq!(dictionary.count(), 2);
        assert_eq!(dictionary.index_of(&30), 0);
        assert_eq!(dictionary.values[0], "c");
        assert_eq!(dictionary.index_of(&10), -1);
        assert_eq!(dictionary.fast_remove(&10), None);
    }
}
