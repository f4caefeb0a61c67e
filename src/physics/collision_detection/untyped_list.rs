use crate::utilities::memory::buffer_pool::BufferPool;

/// Byte storage for variable length records, used for the collision detection caches that pair
/// testers hand back each frame.
///
/// Records are appended and never removed; the whole list is dropped at the end of the frame it
/// was the "current" list for.
#[derive(Debug, Default)]
pub struct UntypedList {
    buffer: Vec<u8>,
    record_starts: Vec<u32>,
}

impl UntypedList {
    /// Creates a list able to hold `initial_record_capacity` records totalling
    /// `initial_byte_capacity` bytes before reallocating.
    pub fn new(initial_record_capacity: usize, initial_byte_capacity: usize, pool: &mut BufferPool) -> Self {
        Self {
            buffer: pool.take_at_least(initial_byte_capacity),
            record_starts: pool.take_at_least(initial_record_capacity),
        }
    }

    /// Number of records in the list.
    #[inline(always)]
    pub fn count(&self) -> usize {
        self.record_starts.len()
    }

    /// Number of bytes used by all records.
    #[inline(always)]
    pub fn byte_count(&self) -> usize {
        self.buffer.len()
    }

    /// Appends a record and returns its index.
    pub fn add(&mut self, bytes: &[u8]) -> usize {
        let index = self.record_starts.len();
        debug_assert!(
            self.buffer.len() + bytes.len() <= u32::MAX as usize,
            "Collision cache storage exceeded the addressable byte range."
        );
        self.record_starts.push(self.buffer.len() as u32);
        self.buffer.extend_from_slice(bytes);
        index
    }

    /// Gets the bytes of a record.
    #[inline]
    pub fn get(&self, index: usize) -> &[u8] {
        let start = self.record_starts[index] as usize;
        let end = self
            .record_starts
            .get(index + 1)
            .map_or(self.buffer.len(), |&next| next as usize);
        &self.buffer[start..end]
    }

    /// Returns the list's storage to the pool.
    pub fn dispose(&mut self, pool: &mut BufferPool) {
        pool.return_buffer(std::mem::take(&mut self.buffer));
        pool.return_buffer(std::mem::take(&mut self.record_starts));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_keep_their_lengths() {
        let mut pool = BufferPool::new();
        let mut list = UntypedList::new(2, 8, &mut pool);
        assert_eq!(list.add(&[1, 2, 3]), 0);
        assert_eq!(list.add(&[]), 1);
        assert_eq!(list.add(&[9; 12]), 2);
        assert_eq!(list.count(), 3);
        assert_eq!(list.byte_count(), 15);
        assert_eq!(list.get(0), &[1, 2, 3]);
        assert!(list.get(1).is_empty());
        assert_eq!(list.get(2), &[9; 12]);

        list.dispose(&mut pool);
        assert_eq!(list.count(), 0);
        assert!(pool.pooled_buffer_count() >= 2);
    }
}
