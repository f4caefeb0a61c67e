use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};

/// Recycles `Vec` allocations so that per-frame scratch storage stops hitting the allocator
/// once the simulation reaches a steady state.
///
/// Buffers are bucketed by element type and by the power of two at or below their capacity.
/// A buffer taken from bucket `p` always has room for at least `2^p` elements. Everything
/// handed out is empty; callers push into it.
#[derive(Default)]
pub struct BufferPool {
    buckets: FxHashMap<(TypeId, u32), Vec<Box<dyn Any + Send + Sync>>>,
    pooled_count: usize,
}

impl BufferPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the capacity that a request for `count` elements is rounded up to.
    #[inline(always)]
    pub fn get_capacity_for_count(count: usize) -> usize {
        count.max(1).next_power_of_two()
    }

    #[inline(always)]
    fn bucket_for_capacity(capacity: usize) -> u32 {
        debug_assert!(capacity > 0);
        usize::BITS - 1 - capacity.leading_zeros()
    }

    /// Takes an empty buffer able to hold at least `count` elements without reallocating.
    pub fn take_at_least<T: Send + Sync + 'static>(&mut self, count: usize) -> Vec<T> {
        let capacity = Self::get_capacity_for_count(count);
        let key = (TypeId::of::<T>(), Self::bucket_for_capacity(capacity));
        if let Some(bucket) = self.buckets.get_mut(&key) {
            while let Some(buffer) = bucket.pop() {
                self.pooled_count -= 1;
                if let Ok(buffer) = buffer.downcast::<Vec<T>>() {
                    debug_assert!(buffer.is_empty() && buffer.capacity() >= capacity);
                    return *buffer;
                }
            }
        }
        Vec::with_capacity(capacity)
    }

    /// Hands a buffer back to the pool. Its contents are dropped.
    pub fn return_buffer<T: Send + Sync + 'static>(&mut self, mut buffer: Vec<T>) {
        if buffer.capacity() == 0 {
            return;
        }
        buffer.clear();
        let key = (TypeId::of::<T>(), Self::bucket_for_capacity(buffer.capacity()));
        self.buckets.entry(key).or_default().push(Box::new(buffer));
        self.pooled_count += 1;
    }

    /// Swaps `buffer` for a pooled one with room for `target_count` elements, keeping the first
    /// `copy_count` elements. The old allocation returns to the pool.
    pub fn resize_to_at_least<T: Send + Sync + 'static>(
        &mut self,
        buffer: &mut Vec<T>,
        target_count: usize,
        copy_count: usize,
    ) {
        let copy_count = copy_count.min(buffer.len());
        if buffer.capacity() >= target_count {
            buffer.truncate(copy_count);
            return;
        }
        let mut resized = self.take_at_least::<T>(target_count);
        resized.extend(buffer.drain(..copy_count));
        let old = std::mem::replace(buffer, resized);
        self.return_buffer(old);
    }

    /// Number of buffers currently waiting in the pool.
    pub fn pooled_buffer_count(&self) -> usize {
        self.pooled_count
    }

    /// Drops every pooled buffer.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.pooled_count = 0;
    }
}
