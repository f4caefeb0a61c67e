use glam::Vec3;

/// Maximum number of contacts a single pair manifold can hold.
pub const MAXIMUM_CONTACT_COUNT: usize = 4;

/// Information about a single contact.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Contact {
    /// Offset from the position of collidable A to the contact position.
    pub offset: Vec3,
    /// Penetration depth between the two collidables at this contact. Negative values represent separation.
    pub depth: f32,
    /// Surface basis of the contact. Points from collidable B to collidable A.
    /// Convex manifolds store the shared normal in every contact.
    pub normal: Vec3,
    /// Id of the features involved in the collision that generated this contact.
    pub feature_id: i32,
}

/// Contact manifold produced for one collidable pair in one frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContactManifold {
    /// Offset from collidable A to collidable B.
    pub offset_b: Vec3,
    // Live contacts sit at the front of `contacts`. Only `add` raises this.
    count: usize,
    /// True if the manifold came from a pair of convex shapes and shares one normal.
    pub convex: bool,
    pub contacts: [Contact; MAXIMUM_CONTACT_COUNT],
}

impl ContactManifold {
    /// Creates an empty manifold.
    pub fn new(offset_b: Vec3, convex: bool) -> Self {
        Self {
            offset_b,
            count: 0,
            convex,
            contacts: [Contact::default(); MAXIMUM_CONTACT_COUNT],
        }
    }

    /// Adds a contact. Returns false if the manifold is already full.
    pub fn add(&mut self, contact: Contact) -> bool {
        if self.count == MAXIMUM_CONTACT_COUNT {
            return false;
        }
        self.contacts[self.count] = contact;
        self.count += 1;
        true
    }

    /// Removes a contact by moving the last contact into its slot.
    pub fn fast_remove_at(&mut self, index: usize) {
        debug_assert!(index < self.count, "Contact index must be within the manifold's count.");
        self.count -= 1;
        if index < self.count {
            self.contacts[index] = self.contacts[self.count];
        }
    }

    /// Number of live contacts. Never exceeds `MAXIMUM_CONTACT_COUNT`.
    #[inline(always)]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Live contacts.
    #[inline(always)]
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts[..self.count]
    }

    #[inline(always)]
    pub fn feature_id(&self, contact_index: usize) -> i32 {
        self.contacts()[contact_index].feature_id
    }

    #[inline(always)]
    pub fn depth(&self, contact_index: usize) -> f32 {
        self.contacts()[contact_index].depth
    }

    /// Gets a contact's normal. Points from collidable B to collidable A.
    #[inline(always)]
    pub fn normal(&self, contact_index: usize) -> Vec3 {
        if self.convex {
            self.contacts[0].normal
        } else {
            self.contacts()[contact_index].normal
        }
    }

    /// Gets the offset from collidable A to the requested contact.
    #[inline(always)]
    pub fn offset(&self, contact_index: usize) -> Vec3 {
        self.contacts()[contact_index].offset
    }

    /// Convexity class used to pick the constraint type. Single contacts are always convex.
    #[inline(always)]
    pub fn is_effectively_convex(&self) -> bool {
        self.convex || self.count <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(feature_id: i32, depth: f32) -> Contact {
        Contact {
            offset: Vec3::ZERO,
            depth,
            normal: Vec3::X,
            feature_id,
        }
    }

    #[test]
    fn add_and_remove_contacts() {
        let mut manifold = ContactManifold::new(Vec3::new(1.5, 0.0, 0.0), false);
        for i in 0..4 {
            assert!(manifold.add(contact(i, i as f32)));
        }
        assert!(!manifold.add(contact(9, 0.0)));
        manifold.fast_remove_at(1);
        assert_eq!(manifold.count(), 3);
        assert_eq!(manifold.feature_id(1), 3);
        assert_eq!(manifold.depth(1), 3.0);
        assert!(!manifold.is_effectively_convex());
        manifold.fast_remove_at(0);
        manifold.fast_remove_at(0);
        assert!(manifold.is_effectively_convex());
    }

    #[test]
    fn count_is_bounded_by_capacity() {
        let mut manifold = ContactManifold::default();
        let accepted = (0..MAXIMUM_CONTACT_COUNT as i32 + 3)
            .filter(|&i| manifold.add(contact(i, 0.5)))
            .count();
        assert_eq!(accepted, MAXIMUM_CONTACT_COUNT);
        assert_eq!(manifold.count(), MAXIMUM_CONTACT_COUNT);
        assert_eq!(manifold.contacts().len(), MAXIMUM_CONTACT_COUNT);
        assert_eq!(manifold.contacts().last().map(|c| c.feature_id), Some(3));
    }
}
