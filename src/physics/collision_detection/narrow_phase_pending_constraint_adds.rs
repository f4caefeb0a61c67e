use super::contact_constraint_accessor::{
    ContactConstraintDescription, ContactConstraintTypeId, ContactImpulses, CONTACT_CONSTRAINT_TYPE_COUNT,
};
use super::pair_cache::PairCacheIndex;
use crate::physics::constraint_batch::{ConstraintBatch, ConstraintBodies};
use crate::physics::handles::ConstraintHandle;
use crate::physics::solver::{find_candidate_batch_from, ConstraintAdder};

/// A constraint requested by a narrow phase worker that has not been added to the solver yet.
#[derive(Debug, Clone, Copy)]
pub struct PendingConstraint {
    /// Pair cache entry waiting for the constraint's handle.
    pub constraint_cache: PairCacheIndex,
    /// Ordering key used by deterministic flushes.
    pub sort_key: u64,
    pub bodies: ConstraintBodies,
    pub description: ContactConstraintDescription,
    pub impulses: ContactImpulses,
}

/// New contact data for a constraint that keeps its type and handle this frame.
#[derive(Debug, Clone, Copy)]
pub struct PendingConstraintUpdate {
    pub handle: ConstraintHandle,
    pub description: ContactConstraintDescription,
    pub impulses: ContactImpulses,
}

/// Per-worker buffer of constraint additions, one list per contact constraint type.
///
/// Workers only append. Everything is handed to the solver during the narrow phase flush.
#[derive(Debug)]
pub struct PendingConstraintAddCache {
    pending_by_type: [Vec<PendingConstraint>; CONTACT_CONSTRAINT_TYPE_COUNT],
    // Batch to start searching from for each pending constraint; empty until the speculative
    // search has run.
    speculative_batch_indices: [Vec<u16>; CONTACT_CONSTRAINT_TYPE_COUNT],
    minimum_constraint_count_per_type: usize,
}

impl PendingConstraintAddCache {
    pub fn new(minimum_constraint_count_per_type: usize) -> Self {
        Self {
            pending_by_type: Default::default(),
            speculative_batch_indices: Default::default(),
            minimum_constraint_count_per_type: minimum_constraint_count_per_type.max(1),
        }
    }

    pub fn add_constraint(
        &mut self,
        type_id: ContactConstraintTypeId,
        constraint_cache: PairCacheIndex,
        sort_key: u64,
        bodies: ConstraintBodies,
        description: ContactConstraintDescription,
        impulses: ContactImpulses,
    ) {
        let list = &mut self.pending_by_type[type_id.index()];
        if list.capacity() == 0 {
            list.reserve(self.minimum_constraint_count_per_type);
        }
        list.push(PendingConstraint {
            constraint_cache,
            sort_key,
            bodies,
            description,
            impulses,
        });
    }

    /// Pending constraints of one type in the order they were requested.
    #[inline(always)]
    pub fn pending(&self, type_id: ContactConstraintTypeId) -> &[PendingConstraint] {
        &self.pending_by_type[type_id.index()]
    }

    pub fn count_constraints(&self) -> usize {
        self.pending_by_type.iter().map(Vec::len).sum()
    }

    /// Number of pending constraints of each type.
    pub fn counts_by_type(&self) -> [usize; CONTACT_CONSTRAINT_TYPE_COUNT] {
        std::array::from_fn(|type_index| self.pending_by_type[type_index].len())
    }

    /// Speculative start batch of a pending constraint, or 0 if no search ran.
    #[inline(always)]
    pub fn speculative_batch_index(&self, type_id: ContactConstraintTypeId, index: usize) -> usize {
        self.speculative_batch_indices[type_id.index()]
            .get(index)
            .map_or(0, |&batch_index| batch_index as usize)
    }

    /// Sizes the speculative result lists to match the pending lists and hands out both, so
    /// searches over different ranges can run at the same time.
    pub(crate) fn split_for_speculative_search(
        &mut self,
    ) -> (
        &[Vec<PendingConstraint>; CONTACT_CONSTRAINT_TYPE_COUNT],
        &mut [Vec<u16>; CONTACT_CONSTRAINT_TYPE_COUNT],
    ) {
        for (indices, pending) in self.speculative_batch_indices.iter_mut().zip(&self.pending_by_type) {
            indices.clear();
            indices.resize(pending.len(), 0);
        }
        (&self.pending_by_type, &mut self.speculative_batch_indices)
    }

    /// Adds every pending constraint to the solver in request order, type by type.
    pub(crate) fn flush_sequentially(
        &self,
        adder: &mut ConstraintAdder,
        completed: &mut Vec<(PairCacheIndex, ConstraintHandle)>,
    ) {
        for type_index in 0..CONTACT_CONSTRAINT_TYPE_COUNT {
            let type_id = ContactConstraintTypeId::from_index(type_index);
            for (index, pending) in self.pending_by_type[type_index].iter().enumerate() {
                let handle = adder.add(
                    self.speculative_batch_index(type_id, index),
                    type_id,
                    pending.bodies,
                    &pending.description,
                    pending.impulses,
                );
                completed.push((pending.constraint_cache, handle));
            }
        }
    }

    /// Drops every pending constraint, keeping allocations for the next frame.
    pub fn clear(&mut self) {
        for list in &mut self.pending_by_type {
            list.clear();
        }
        for list in &mut self.speculative_batch_indices {
            list.clear();
        }
    }

    pub fn dispose(&mut self) {
        self.pending_by_type = Default::default();
        self.speculative_batch_indices = Default::default();
    }
}

/// Finds the first batch each pending constraint could fit in right now.
///
/// Batches only gain constraints while adds run, so the result never skips past the batch the
/// constraint will end up in; it is only a starting point for the real search.
pub(crate) fn speculative_constraint_batch_search(
    batches: &[ConstraintBatch],
    pending: &[PendingConstraint],
    results: &mut [u16],
) {
    debug_assert_eq!(pending.len(), results.len());
    for (result, pending) in results.iter_mut().zip(pending) {
        let batch_index = find_candidate_batch_from(batches, 0, &pending.bodies);
        *result = batch_index.min(u16::MAX as usize) as u16;
    }
}
