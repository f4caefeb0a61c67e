use crate::physics::handles::{BodyHandle, ConstraintHandle};

/// Reference connecting a body to one of its constraints.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyConstraintReference {
    /// Handle of the constraint connected to the body.
    pub connecting_constraint_handle: ConstraintHandle,
    /// The body's index within the constraint (e.g. 0 for body A, 1 for body B).
    pub body_index_in_constraint: i32,
}

/// Constraint connectivity of every body the solver has seen, indexed by body handle.
///
/// Poses, velocities and inertias live elsewhere; the collision pipeline only needs to know
/// which constraints touch which bodies.
#[derive(Debug, Default)]
pub struct Bodies {
    constraints: Vec<Vec<BodyConstraintReference>>,
    /// Capacity given to a body's constraint list the first time it gains a constraint.
    pub minimum_constraint_capacity_per_body: usize,
}

impl Bodies {
    pub fn new(minimum_constraint_capacity_per_body: usize) -> Self {
        Self {
            constraints: Vec::new(),
            minimum_constraint_capacity_per_body,
        }
    }

    /// Gets the constraints attached to a body.
    pub fn constraints_of(&self, body: BodyHandle) -> &[BodyConstraintReference] {
        self.constraints
            .get(body.0 as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Registers a constraint with a body.
    pub(crate) fn add_constraint(
        &mut self,
        body: BodyHandle,
        constraint_handle: ConstraintHandle,
        body_index_in_constraint: i32,
    ) {
        let index = body.0 as usize;
        if index >= self.constraints.len() {
            self.constraints.resize_with(index + 1, Vec::new);
        }
        let list = &mut self.constraints[index];
        if list.capacity() == 0 {
            list.reserve(self.minimum_constraint_capacity_per_body);
        }
        list.push(BodyConstraintReference {
            connecting_constraint_handle: constraint_handle,
            body_index_in_constraint,
        });
    }

    /// Removes a constraint from a body's constraint list.
    ///
    /// Returns true if the number of constraints remaining attached to the body is 0.
    pub(crate) fn remove_constraint_reference(
        &mut self,
        body: BodyHandle,
        constraint_handle: ConstraintHandle,
    ) -> bool {
        let Some(list) = self.constraints.get_mut(body.0 as usize) else {
            return true;
        };
        // Linear search; bodies rarely have more than a handful of constraints.
        if let Some(position) = list
            .iter()
            .position(|reference| reference.connecting_constraint_handle == constraint_handle)
        {
            list.swap_remove(position);
        }
        let target_capacity = (2 * list.len()).max(self.minimum_constraint_capacity_per_body);
        if list.capacity() >= 2 * target_capacity.max(1) {
            list.shrink_to(target_capacity);
        }
        list.is_empty()
    }

    /// Total number of body-constraint links.
    pub fn constraint_reference_count(&self) -> usize {
        self.constraints.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_lists_track_links() {
        let mut bodies = Bodies::new(4);
        bodies.add_constraint(BodyHandle(3), ConstraintHandle(0), 0);
        bodies.add_constraint(BodyHandle(3), ConstraintHandle(1), 1);
        bodies.add_constraint(BodyHandle(0), ConstraintHandle(1), 0);
        assert_eq!(bodies.constraints_of(BodyHandle(3)).len(), 2);
        assert!(bodies.constraints_of(BodyHandle(9)).is_empty());
        assert!(!bodies.remove_constraint_reference(BodyHandle(3), ConstraintHandle(0)));
        assert_eq!(
            bodies.constraints_of(BodyHandle(3)),
            &[BodyConstraintReference {
                connecting_constraint_handle: ConstraintHandle(1),
                body_index_in_constraint: 1
            }]
        );
        assert!(bodies.remove_constraint_reference(BodyHandle(0), ConstraintHandle(1)));
        assert_eq!(bodies.constraint_reference_count(), 1);
    }
}
