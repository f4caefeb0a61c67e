use super::buffer_pool::BufferPool;

/// Manages a pool of identifier values. Grabbing an id from the pool picks a number that has been
/// picked and returned before, or if none of those are available, the minimum value greater
/// than any existing id.
///
/// Returned ids are handed out again most-recently-returned first.
pub struct IdPool {
    next_index: i32,
    available_ids: Vec<i32>,
}

impl IdPool {
    /// Creates a new IdPool with room for `initial_capacity` returned ids.
    pub fn new(initial_capacity: usize, pool: &mut BufferPool) -> Self {
        IdPool {
            next_index: 0,
            available_ids: pool.take_at_least(initial_capacity),
        }
    }

    /// Gets the highest value which any index claimed thus far could possibly have.
    /// -1 if nothing has ever been claimed.
    #[inline(always)]
    pub fn highest_possibly_claimed_id(&self) -> i32 {
        self.next_index - 1
    }

    /// Gets the number of previously returned ids waiting in the pool.
    #[inline(always)]
    pub fn available_id_count(&self) -> usize {
        self.available_ids.len()
    }

    /// Takes an id from the pool.
    #[inline(always)]
    pub fn take(&mut self) -> i32 {
        match self.available_ids.pop() {
            Some(id) => id,
            None => {
                let id = self.next_index;
                self.next_index += 1;
                id
            }
        }
    }

    /// Returns an id to the pool.
    #[inline(always)]
    pub fn return_id(&mut self, id: i32) {
        debug_assert!(
            id >= 0 && id < self.next_index,
            "Returned ids must have been taken from this pool."
        );
        debug_assert!(
            !self.available_ids.contains(&id),
            "An id was returned to the pool twice."
        );
        self.available_ids.push(id);
    }

    /// Makes sure `additional` more ids can be returned without reallocating.
    pub fn ensure_capacity(&mut self, additional: usize, pool: &mut BufferPool) {
        let target = self.available_ids.len() + additional;
        if self.available_ids.capacity() < target {
            let count = self.available_ids.len();
            pool.resize_to_at_least(&mut self.available_ids, target, count);
        }
    }

    /// Resets the IdPool.
    pub fn clear(&mut self) {
        self.next_index = 0;
        self.available_ids.clear();
    }

    /// Returns underlying memory to the pool.
    pub fn dispose(&mut self, pool: &mut BufferPool) {
        pool.return_buffer(std::mem::take(&mut self.available_ids));
        self.next_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_returned_ids_first() {
        let mut pool = BufferPool::new();
        let mut ids = IdPool::new(4, &mut pool);
        assert_eq!(ids.highest_possibly_claimed_id(), -1);
        let a = ids.take();
        let b = ids.take();
        let c = ids.take();
        assert_eq!((a, b, c), (0, 1, 2));
        ids.return_id(b);
        ids.return_id(a);
        assert_eq!(ids.available_id_count(), 2);
        assert_eq!(ids.take(), a);
        assert_eq!(ids.take(), b);
        assert_eq!(ids.take(), 3);
        assert_eq!(ids.highest_possibly_claimed_id(), 3);
    }

    #[test]
    #[should_panic(expected = "An id was returned to the pool twice.")]
    #[cfg(debug_assertions)]
    fn double_return_is_caught() {
        let mut pool = BufferPool::new();
        let mut ids = IdPool::new(4, &mut pool);
        let id = ids.take();
        ids.return_id(id);
        ids.return_id(id);
    }
}
