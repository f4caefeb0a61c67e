use crate::physics::bodies::Bodies;
use crate::physics::collision_detection::contact_constraint_accessor::{
    ContactConstraintDescription, ContactConstraintTypeId, ContactImpulses,
};
use crate::physics::constraint_batch::{ConstraintBatch, ConstraintBodies, TypeBatch};
use crate::physics::constraint_location::ConstraintLocation;
use crate::physics::handles::ConstraintHandle;
use crate::utilities::memory::buffer_pool::BufferPool;
use crate::utilities::memory::id_pool::IdPool;
use tracing::trace;

/// Stores contact constraints in batches that never share a dynamic body.
///
/// This is the constraint storage the collision pipeline writes into. It performs no numerical
/// solving; it keeps handles, batch coloring, descriptions and accumulated impulses consistent.
pub struct Solver {
    pub(crate) batches: Vec<ConstraintBatch>,
    pub(crate) bodies: Bodies,
    /// Pool from which constraint handles are claimed.
    pub(crate) handle_pool: IdPool,
    /// Mapping from constraint handle to the constraint's memory location.
    pub(crate) handle_to_constraint: Vec<ConstraintLocation>,
    minimum_capacity_per_type_batch: usize,
    body_handle_capacity: usize,
    pub(crate) pool: BufferPool,
}

impl Solver {
    /// Creates an empty solver.
    pub fn new(
        initial_constraint_capacity: usize,
        minimum_capacity_per_type_batch: usize,
        body_handle_capacity: usize,
    ) -> Self {
        let mut pool = BufferPool::new();
        let handle_pool = IdPool::new(initial_constraint_capacity, &mut pool);
        let mut handle_to_constraint = pool.take_at_least(initial_constraint_capacity);
        handle_to_constraint.resize(initial_constraint_capacity, ConstraintLocation::UNUSED);
        Self {
            batches: Vec::new(),
            bodies: Bodies::new(4),
            handle_pool,
            handle_to_constraint,
            minimum_capacity_per_type_batch: minimum_capacity_per_type_batch.max(1),
            body_handle_capacity,
            pool,
        }
    }

    /// Constraint batches in coloring order.
    pub fn batches(&self) -> &[ConstraintBatch] {
        &self.batches
    }

    pub fn bodies(&self) -> &Bodies {
        &self.bodies
    }

    pub fn handle_to_constraint(&self) -> &[ConstraintLocation] {
        &self.handle_to_constraint
    }

    pub fn handle_pool(&self) -> &IdPool {
        &self.handle_pool
    }

    /// Checks whether a constraint handle currently refers to a live constraint.
    pub fn constraint_exists(&self, handle: ConstraintHandle) -> bool {
        handle.0 >= 0
            && self
                .handle_to_constraint
                .get(handle.0 as usize)
                .is_some_and(ConstraintLocation::is_used)
    }

    /// Gets the location of a live constraint.
    pub fn location(&self, handle: ConstraintHandle) -> ConstraintLocation {
        assert!(
            self.constraint_exists(handle),
            "{} does not refer to an existing constraint.",
            handle
        );
        self.handle_to_constraint[handle.0 as usize]
    }

    /// Number of live constraints.
    pub fn count_constraints(&self) -> usize {
        self.batches.iter().map(ConstraintBatch::constraint_count).sum()
    }

    fn type_batch(&self, handle: ConstraintHandle) -> (&TypeBatch, usize) {
        let location = self.location(handle);
        (
            self.batches[location.batch_index as usize].get_type_batch(location.type_id),
            location.index_in_type_batch as usize,
        )
    }

    /// Gets the constraint type of a live constraint.
    pub fn constraint_type(&self, handle: ConstraintHandle) -> ContactConstraintTypeId {
        ContactConstraintTypeId::from_index(self.location(handle).type_id as usize)
    }

    pub fn get_description(&self, handle: ConstraintHandle) -> &ContactConstraintDescription {
        let (type_batch, index) = self.type_batch(handle);
        &type_batch.descriptions[index]
    }

    pub fn get_accumulated_impulses(&self, handle: ConstraintHandle) -> ContactImpulses {
        let (type_batch, index) = self.type_batch(handle);
        type_batch.accumulated_impulses[index]
    }

    /// Gets the bodies a constraint acts on.
    pub fn enumerate_connected_bodies(&self, handle: ConstraintHandle) -> ConstraintBodies {
        let (type_batch, index) = self.type_batch(handle);
        type_batch.body_references[index]
    }

    pub fn apply_description(
        &mut self,
        handle: ConstraintHandle,
        description: &ContactConstraintDescription,
    ) {
        self.begin_adds().apply_description(handle, description);
    }

    pub fn set_accumulated_impulses(&mut self, handle: ConstraintHandle, impulses: ContactImpulses) {
        self.begin_adds().set_accumulated_impulses(handle, impulses);
    }

    /// Attempts to locate a spot for a new constraint. Does not perform allocation.
    /// Returns the index of the first batch the constraint would fit in, which may be one past
    /// the last existing batch.
    pub fn find_candidate_batch(&self, bodies: &ConstraintBodies) -> usize {
        find_candidate_batch_from(&self.batches, 0, bodies)
    }

    /// Tries to add a constraint to a specific batch. Fails if the batch already references one
    /// of the constraint's dynamic bodies.
    pub fn try_allocate_in_batch(
        &mut self,
        type_id: ContactConstraintTypeId,
        target_batch_index: usize,
        bodies: ConstraintBodies,
        description: &ContactConstraintDescription,
        impulses: ContactImpulses,
    ) -> Option<ConstraintHandle> {
        let mut adder = self.begin_adds();
        let handle =
            adder.try_allocate_in_batch(type_id, target_batch_index, bodies, description, impulses);
        let staged = adder.finish();
        self.apply_staged_locations(staged);
        handle
    }

    /// Adds a constraint to the first batch that can hold it.
    pub fn add(
        &mut self,
        type_id: ContactConstraintTypeId,
        bodies: ConstraintBodies,
        description: &ContactConstraintDescription,
        impulses: ContactImpulses,
    ) -> ConstraintHandle {
        let mut adder = self.begin_adds();
        let handle = adder.add(0, type_id, bodies, description, impulses);
        let staged = adder.finish();
        self.apply_staged_locations(staged);
        handle
    }

    /// Splits the solver into a view that can add and update constraints while the handle
    /// mapping stays readable by others. Locations of new constraints are staged in the view and
    /// must be written back with `apply_staged_locations`.
    pub(crate) fn begin_adds(&mut self) -> ConstraintAdder<'_> {
        ConstraintAdder {
            batches: &mut self.batches,
            bodies: &mut self.bodies,
            handle_pool: &mut self.handle_pool,
            handle_to_constraint: &self.handle_to_constraint,
            minimum_capacity_per_type_batch: self.minimum_capacity_per_type_batch,
            body_handle_capacity: self.body_handle_capacity,
            pool: &mut self.pool,
            staged_locations: Vec::new(),
        }
    }

    /// Writes the locations of constraints created through a `ConstraintAdder`.
    pub(crate) fn apply_staged_locations(&mut self, staged: Vec<(ConstraintHandle, ConstraintLocation)>) {
        for &(handle, location) in &staged {
            let index = handle.0 as usize;
            if index >= self.handle_to_constraint.len() {
                let old_len = self.handle_to_constraint.len();
                let target = (old_len * 2).max(index + 1);
                self.pool
                    .resize_to_at_least(&mut self.handle_to_constraint, target, old_len);
                self.handle_to_constraint
                    .resize(self.handle_to_constraint.capacity(), ConstraintLocation::UNUSED);
            }
            self.handle_to_constraint[index] = location;
        }
        self.pool.return_buffer(staged);
    }

    /// Removes a constraint from its type batch, fixing up the location of whatever constraint
    /// moved into its slot. Does not touch body lists, batch referenced handles or the handle pool.
    pub(crate) fn remove_from_type_batch(&mut self, batch_index: usize, type_id: i32, index_in_type_batch: usize) {
        let type_batch = self.batches[batch_index].get_type_batch_mut(type_id);
        if let Some((moved_handle, new_index)) = type_batch.remove_at(index_in_type_batch) {
            self.handle_to_constraint[moved_handle.0 as usize].index_in_type_batch = new_index;
        }
        let batch = &mut self.batches[batch_index];
        if let Some(type_batch_index) = batch.type_batch_index(type_id) {
            batch.remove_type_batch_if_empty(type_batch_index, &mut self.pool);
        }
    }

    /// Removes trailing batches that no longer hold constraints. Only the last batch can be
    /// removed since constraint locations refer to batches by index.
    pub(crate) fn remove_batch_if_empty(&mut self, batch_index: usize) {
        if batch_index + 1 != self.batches.len() {
            return;
        }
        while self
            .batches
            .last()
            .is_some_and(|batch| batch.type_batches.is_empty())
        {
            self.batches.pop();
        }
    }

    /// Removes the constraint associated with the given handle.
    pub fn remove(&mut self, handle: ConstraintHandle) {
        let location = self.location(handle);
        let batch_index = location.batch_index as usize;
        let bodies = self.batches[batch_index]
            .get_type_batch(location.type_id)
            .body_references[location.index_in_type_batch as usize];
        for body in bodies.handles() {
            self.bodies.remove_constraint_reference(body, handle);
        }
        let referenced_handles = &mut self.batches[batch_index].referenced_handles;
        for body in bodies.dynamic_handles() {
            referenced_handles.remove(body.0 as usize);
        }
        self.remove_from_type_batch(batch_index, location.type_id, location.index_in_type_batch as usize);
        self.remove_batch_if_empty(batch_index);
        self.handle_to_constraint[handle.0 as usize] = ConstraintLocation::UNUSED;
        self.handle_pool.return_id(handle.0);
        trace!(%handle, "removed constraint");
    }

    /// Checks that every live handle points at a slot that points back at it.
    pub fn validate_constraint_locations(&self) -> bool {
        let mut live = 0;
        for (handle, location) in self.handle_to_constraint.iter().enumerate() {
            if !location.is_used() {
                continue;
            }
            live += 1;
            let Some(batch) = self.batches.get(location.batch_index as usize) else {
                return false;
            };
            let Some(type_batch_index) = batch.type_batch_index(location.type_id) else {
                return false;
            };
            let type_batch = &batch.type_batches[type_batch_index];
            if type_batch.index_to_handle.get(location.index_in_type_batch as usize)
                != Some(&ConstraintHandle(handle as i32))
            {
                return false;
            }
        }
        live == self.count_constraints()
    }
}

/// Finds the first batch at or after `start` that shares no dynamic body with `bodies`.
pub(crate) fn find_candidate_batch_from(
    batches: &[ConstraintBatch],
    start: usize,
    bodies: &ConstraintBodies,
) -> usize {
    (start..batches.len())
        .find(|&batch_index| batches[batch_index].can_fit(bodies))
        .unwrap_or(batches.len())
}

/// Mutable view of the solver used while constraints are added.
///
/// Holds the handle mapping by shared reference so it can be read concurrently; new locations
/// are staged and written once the view is dropped.
pub(crate) struct ConstraintAdder<'a> {
    batches: &'a mut Vec<ConstraintBatch>,
    bodies: &'a mut Bodies,
    handle_pool: &'a mut IdPool,
    handle_to_constraint: &'a [ConstraintLocation],
    minimum_capacity_per_type_batch: usize,
    body_handle_capacity: usize,
    pool: &'a mut BufferPool,
    staged_locations: Vec<(ConstraintHandle, ConstraintLocation)>,
}

impl<'a> ConstraintAdder<'a> {
    /// The solver's handle mapping as of the start of the add phase.
    pub fn handle_to_constraint(&self) -> &'a [ConstraintLocation] {
        self.handle_to_constraint
    }

    fn existing_slot(&mut self, handle: ConstraintHandle) -> (&mut TypeBatch, usize) {
        let location = self.handle_to_constraint[handle.0 as usize];
        debug_assert!(location.is_used(), "{} does not refer to an existing constraint.", handle);
        (
            self.batches[location.batch_index as usize].get_type_batch_mut(location.type_id),
            location.index_in_type_batch as usize,
        )
    }

    pub fn apply_description(&mut self, handle: ConstraintHandle, description: &ContactConstraintDescription) {
        let (type_batch, index) = self.existing_slot(handle);
        type_batch.descriptions[index] = *description;
    }

    pub fn set_accumulated_impulses(&mut self, handle: ConstraintHandle, impulses: ContactImpulses) {
        let (type_batch, index) = self.existing_slot(handle);
        type_batch.accumulated_impulses[index] = impulses;
    }

    pub fn try_allocate_in_batch(
        &mut self,
        type_id: ContactConstraintTypeId,
        target_batch_index: usize,
        bodies: ConstraintBodies,
        description: &ContactConstraintDescription,
        impulses: ContactImpulses,
    ) -> Option<ConstraintHandle> {
        debug_assert!(
            target_batch_index <= self.batches.len(),
            "Target batch cannot be more than one slot beyond the end of the batch list."
        );
        if target_batch_index == self.batches.len() {
            self.batches
                .push(ConstraintBatch::new(4, self.body_handle_capacity));
        } else if !self.batches[target_batch_index].can_fit(&bodies) {
            return None;
        }
        let handle = ConstraintHandle(self.handle_pool.take());
        let batch = &mut self.batches[target_batch_index];
        for body in bodies.dynamic_handles() {
            batch.referenced_handles.add_unsafely(body.0 as usize);
        }
        let index_in_type_batch = batch
            .get_or_create_type_batch(type_id.index() as i32, self.minimum_capacity_per_type_batch, self.pool)
            .allocate(handle, bodies, *description, impulses);
        for (body_index_in_constraint, body) in bodies.handles().enumerate() {
            self.bodies
                .add_constraint(body, handle, body_index_in_constraint as i32);
        }
        self.staged_locations.push((
            handle,
            ConstraintLocation {
                set_index: 0,
                batch_index: target_batch_index as i32,
                type_id: type_id.index() as i32,
                index_in_type_batch,
            },
        ));
        Some(handle)
    }

    /// Adds a constraint to the first batch at or after `start_batch_index` that can hold it.
    pub fn add(
        &mut self,
        start_batch_index: usize,
        type_id: ContactConstraintTypeId,
        bodies: ConstraintBodies,
        description: &ContactConstraintDescription,
        impulses: ContactImpulses,
    ) -> ConstraintHandle {
        let start = start_batch_index.min(self.batches.len());
        let mut batch_index = find_candidate_batch_from(&self.batches[..], start, &bodies);
        loop {
            if let Some(handle) =
                self.try_allocate_in_batch(type_id, batch_index, bodies, description, impulses)
            {
                return handle;
            }
            // The candidate search already skipped full batches, so this only happens if the
            // candidate was stale; the slot one past the end always succeeds.
            batch_index += 1;
        }
    }

    /// Ends the add phase, returning the staged locations.
    pub fn finish(self) -> Vec<(ConstraintHandle, ConstraintLocation)> {
        self.staged_locations
    }
}
