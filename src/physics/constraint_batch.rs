use crate::physics::collidables::collidable_reference::{CollidableMobility, CollidableReference};
use crate::physics::collision_detection::contact_constraint_accessor::{
    ContactConstraintDescription, ContactImpulses, CONTACT_CONSTRAINT_TYPE_COUNT,
};
use crate::physics::handles::{BodyHandle, ConstraintHandle};
use crate::utilities::collections::index_set::IndexSet;
use crate::utilities::memory::buffer_pool::BufferPool;

/// Bodies connected by a contact constraint. `b` is `None` when the other collidable is a static.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintBodies {
    pub a: CollidableReference,
    pub b: Option<CollidableReference>,
}

impl ConstraintBodies {
    /// Builds the body list for a collidable pair whose first member is a body.
    #[inline(always)]
    pub fn from_references(a: CollidableReference, b: CollidableReference) -> Self {
        debug_assert!(a.is_body(), "Statics are always stored in the second slot of a pair.");
        Self {
            a,
            b: b.is_body().then_some(b),
        }
    }

    /// Number of bodies the constraint acts on.
    #[inline(always)]
    pub fn count(&self) -> usize {
        1 + self.b.is_some() as usize
    }

    /// Iterates the connected body handles in constraint order.
    pub fn handles(&self) -> impl Iterator<Item = BodyHandle> + '_ {
        std::iter::once(self.a)
            .chain(self.b)
            .map(|reference| reference.body_handle())
    }

    /// Iterates the handles of dynamic bodies. Kinematic bodies never block batch membership.
    pub fn dynamic_handles(&self) -> impl Iterator<Item = BodyHandle> + '_ {
        std::iter::once(self.a)
            .chain(self.b)
            .filter(|reference| reference.mobility() == CollidableMobility::Dynamic)
            .map(|reference| reference.body_handle())
    }
}

/// Contiguous storage for constraints of a single type within one batch.
#[derive(Debug, Clone)]
pub struct TypeBatch {
    pub type_id: i32,
    pub index_to_handle: Vec<ConstraintHandle>,
    pub body_references: Vec<ConstraintBodies>,
    pub descriptions: Vec<ContactConstraintDescription>,
    pub accumulated_impulses: Vec<ContactImpulses>,
}

impl TypeBatch {
    pub fn new(type_id: i32, initial_capacity: usize, pool: &mut BufferPool) -> Self {
        Self {
            type_id,
            index_to_handle: pool.take_at_least(initial_capacity),
            body_references: pool.take_at_least(initial_capacity),
            descriptions: pool.take_at_least(initial_capacity),
            accumulated_impulses: pool.take_at_least(initial_capacity),
        }
    }

    /// Returns the type batch's buffers to the pool.
    pub fn dispose(self, pool: &mut BufferPool) {
        pool.return_buffer(self.index_to_handle);
        pool.return_buffer(self.body_references);
        pool.return_buffer(self.descriptions);
        pool.return_buffer(self.accumulated_impulses);
    }

    #[inline(always)]
    pub fn constraint_count(&self) -> usize {
        self.index_to_handle.len()
    }

    /// Appends a constraint and returns its index in the type batch.
    pub fn allocate(
        &mut self,
        handle: ConstraintHandle,
        bodies: ConstraintBodies,
        description: ContactConstraintDescription,
        impulses: ContactImpulses,
    ) -> i32 {
        let index = self.index_to_handle.len() as i32;
        self.index_to_handle.push(handle);
        self.body_references.push(bodies);
        self.descriptions.push(description);
        self.accumulated_impulses.push(impulses);
        index
    }

    /// Removes the constraint at `index` by moving the last constraint into its slot.
    /// Returns the handle and new index of the moved constraint, if one moved.
    pub fn remove_at(&mut self, index: usize) -> Option<(ConstraintHandle, i32)> {
        self.index_to_handle.swap_remove(index);
        self.body_references.swap_remove(index);
        self.descriptions.swap_remove(index);
        self.accumulated_impulses.swap_remove(index);
        self.index_to_handle
            .get(index)
            .map(|&moved_handle| (moved_handle, index as i32))
    }
}

/// Contains a set of type batches whose constraints share no dynamic body references.
#[derive(Debug, Clone)]
pub struct ConstraintBatch {
    // The handle->constraint indirection stores a type id rather than a type batch index, so
    // type batches can change slots without touching every handle mapping.
    pub type_index_to_type_batch_index: [i32; CONTACT_CONSTRAINT_TYPE_COUNT],
    pub type_batches: Vec<TypeBatch>,
    /// Handles of the dynamic bodies referenced by any constraint in this batch.
    pub referenced_handles: IndexSet,
}

impl ConstraintBatch {
    pub fn new(initial_type_count_estimate: usize, body_handle_capacity: usize) -> Self {
        Self {
            type_index_to_type_batch_index: [-1; CONTACT_CONSTRAINT_TYPE_COUNT],
            type_batches: Vec::with_capacity(initial_type_count_estimate),
            referenced_handles: IndexSet::new(body_handle_capacity),
        }
    }

    /// Gets the index of the type batch holding `type_id`, if it exists.
    #[inline(always)]
    pub fn type_batch_index(&self, type_id: i32) -> Option<usize> {
        let index = self.type_index_to_type_batch_index[type_id as usize];
        (index >= 0).then_some(index as usize)
    }

    /// Gets a reference to the type batch matching the given type id.
    /// Requires that there exists at least one constraint in the type batch.
    pub fn get_type_batch(&self, type_id: i32) -> &TypeBatch {
        let index = self.type_index_to_type_batch_index[type_id as usize];
        debug_assert!(index >= 0, "Type batch for type {} does not exist in this batch.", type_id);
        &self.type_batches[index as usize]
    }

    pub fn get_type_batch_mut(&mut self, type_id: i32) -> &mut TypeBatch {
        let index = self.type_index_to_type_batch_index[type_id as usize];
        debug_assert!(index >= 0, "Type batch for type {} does not exist in this batch.", type_id);
        &mut self.type_batches[index as usize]
    }

    pub(crate) fn get_or_create_type_batch(
        &mut self,
        type_id: i32,
        initial_capacity: usize,
        pool: &mut BufferPool,
    ) -> &mut TypeBatch {
        let slot = &mut self.type_index_to_type_batch_index[type_id as usize];
        if *slot < 0 {
            *slot = self.type_batches.len() as i32;
            self.type_batches.push(TypeBatch::new(type_id, initial_capacity, pool));
        }
        let index = *slot as usize;
        &mut self.type_batches[index]
    }

    /// Checks whether a constraint touching `bodies` could be added without sharing a dynamic body.
    #[inline]
    pub fn can_fit(&self, bodies: &ConstraintBodies) -> bool {
        self.referenced_handles
            .can_fit(bodies.dynamic_handles().map(|handle| handle.0 as usize))
    }

    /// Removes a type batch if it has no more constraints, returning its buffers to the pool.
    pub fn remove_type_batch_if_empty(&mut self, type_batch_index: usize, pool: &mut BufferPool) {
        if self.type_batches[type_batch_index].constraint_count() > 0 {
            return;
        }
        let removed = self.type_batches.swap_remove(type_batch_index);
        self.type_index_to_type_batch_index[removed.type_id as usize] = -1;
        if let Some(swapped) = self.type_batches.get(type_batch_index) {
            // Something moved into the removed slot; update the type index mapping.
            self.type_index_to_type_batch_index[swapped.type_id as usize] = type_batch_index as i32;
        }
        removed.dispose(pool);
    }

    /// Total number of constraints in the batch.
    pub fn constraint_count(&self) -> usize {
        self.type_batches.iter().map(TypeBatch::constraint_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bodies(a: i32, b: Option<i32>) -> ConstraintBodies {
        ConstraintBodies {
            a: CollidableReference::dynamic(BodyHandle(a)),
            b: b.map(|b| CollidableReference::kinematic(BodyHandle(b))),
        }
    }

    #[test]
    fn removing_type_batch_remaps_swapped_type() {
        let mut pool = BufferPool::new();
        let mut batch = ConstraintBatch::new(4, 16);
        batch
            .get_or_create_type_batch(3, 4, &mut pool)
            .allocate(ConstraintHandle(0), bodies(0, None), Default::default(), [0.0; 4]);
        batch
            .get_or_create_type_batch(9, 4, &mut pool)
            .allocate(ConstraintHandle(1), bodies(1, Some(2)), Default::default(), [0.0; 4]);
        assert_eq!(batch.type_batch_index(9), Some(1));
        assert_eq!(batch.get_type_batch_mut(3).remove_at(0), None);
        batch.remove_type_batch_if_empty(0, &mut pool);
        assert_eq!(batch.type_batch_index(3), None);
        assert_eq!(batch.type_batch_index(9), Some(0));
        assert_eq!(batch.get_type_batch(9).index_to_handle, vec![ConstraintHandle(1)]);
    }

    #[test]
    fn type_batch_buffers_cycle_through_the_pool() {
        let mut pool = BufferPool::new();
        let mut batch = ConstraintBatch::new(1, 16);
        let type_batch = batch.get_or_create_type_batch(2, 8, &mut pool);
        assert!(type_batch.descriptions.capacity() >= 8);
        let handles_pointer = type_batch.index_to_handle.as_ptr();
        type_batch.allocate(ConstraintHandle(0), bodies(0, None), Default::default(), [0.0; 4]);
        type_batch.remove_at(0);

        // Non-empty type batches stay put.
        batch
            .get_or_create_type_batch(5, 8, &mut pool)
            .allocate(ConstraintHandle(1), bodies(1, None), Default::default(), [0.0; 4]);
        batch.remove_type_batch_if_empty(1, &mut pool);
        assert_eq!(pool.pooled_buffer_count(), 0);

        batch.remove_type_batch_if_empty(0, &mut pool);
        assert_eq!(pool.pooled_buffer_count(), 4);
        let recreated = batch.get_or_create_type_batch(7, 8, &mut pool);
        assert_eq!(recreated.index_to_handle.as_ptr(), handles_pointer);
        assert_eq!(pool.pooled_buffer_count(), 0);
    }

    #[test]
    fn kinematics_do_not_block() {
        let mut batch = ConstraintBatch::new(1, 16);
        batch.referenced_handles.add(2);
        let constraint = bodies(1, Some(2));
        assert_eq!(constraint.dynamic_handles().collect::<Vec<_>>(), vec![BodyHandle(1)]);
        assert_eq!(constraint.handles().count(), 2);
        assert!(batch.can_fit(&constraint));
        batch.referenced_handles.add(1);
        assert!(!batch.can_fit(&constraint));
    }

    #[test]
    fn type_batch_swap_remove_reports_move() {
        let mut type_batch = TypeBatch::new(0, 4, &mut BufferPool::new());
        for i in 0..3 {
            type_batch.allocate(ConstraintHandle(i), bodies(i, None), Default::default(), [i as f32; 4]);
        }
        assert_eq!(type_batch.remove_at(0), Some((ConstraintHandle(2), 0)));
        assert_eq!(type_batch.accumulated_impulses[0], [2.0; 4]);
        assert_eq!(type_batch.remove_at(1), None);
    }
}
