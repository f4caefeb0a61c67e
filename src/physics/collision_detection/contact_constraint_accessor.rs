use super::contact_manifold::{ContactManifold, MAXIMUM_CONTACT_COUNT};
use super::narrow_phase_callbacks::PairMaterialProperties;
use std::fmt;

/// Number of distinct contact constraint types: contact count (1-4) x convexity x body count.
pub const CONTACT_CONSTRAINT_TYPE_COUNT: usize = 16;

/// Identifies a contact constraint type.
///
/// Bits 0-1 hold the contact count minus one, bit 2 is set for nonconvex manifolds and
/// bit 3 is set when both collidables are bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContactConstraintTypeId(u8);

const TYPE_NAMES: [&str; CONTACT_CONSTRAINT_TYPE_COUNT] = [
    "Contact1OneBody",
    "Contact2OneBody",
    "Contact3OneBody",
    "Contact4OneBody",
    "Contact1NonconvexOneBody",
    "Contact2NonconvexOneBody",
    "Contact3NonconvexOneBody",
    "Contact4NonconvexOneBody",
    "Contact1",
    "Contact2",
    "Contact3",
    "Contact4",
    "Contact1Nonconvex",
    "Contact2Nonconvex",
    "Contact3Nonconvex",
    "Contact4Nonconvex",
];

impl ContactConstraintTypeId {
    /// Builds the type id for a manifold shape. One-contact manifolds are always treated as convex.
    #[inline(always)]
    pub fn new(contact_count: usize, convex: bool, two_body: bool) -> Self {
        debug_assert!(
            (1..=MAXIMUM_CONTACT_COUNT).contains(&contact_count),
            "Contact constraints need between 1 and 4 contacts."
        );
        let nonconvex = !convex && contact_count > 1;
        Self((contact_count as u8 - 1) | (nonconvex as u8) << 2 | (two_body as u8) << 3)
    }

    /// Type id for the constraint a manifold between the given collidables would need.
    #[inline(always)]
    pub fn for_manifold(manifold: &ContactManifold, two_body: bool) -> Self {
        Self::new(manifold.count(), manifold.is_effectively_convex(), two_body)
    }

    /// Reconstructs a type id from its raw value.
    #[inline(always)]
    pub fn from_index(index: usize) -> Self {
        debug_assert!(index < CONTACT_CONSTRAINT_TYPE_COUNT);
        Self(index as u8)
    }

    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline(always)]
    pub fn contact_count(self) -> usize {
        (self.0 & 3) as usize + 1
    }

    #[inline(always)]
    pub fn is_convex(self) -> bool {
        self.0 & 4 == 0
    }

    #[inline(always)]
    pub fn is_two_body(self) -> bool {
        self.0 & 8 != 0
    }

    /// Index of the per-contact-count constraint cache list this type uses.
    #[inline(always)]
    pub fn cache_type_index(self) -> usize {
        (self.0 & 3) as usize
    }

    pub fn name(self) -> &'static str {
        TYPE_NAMES[self.index()]
    }
}

impl fmt::Display for ContactConstraintTypeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accumulated impulses of a contact constraint, one per contact slot.
pub type ContactImpulses = [f32; MAXIMUM_CONTACT_COUNT];

/// Everything a contact constraint stores about its pair besides impulses.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ContactConstraintDescription {
    pub manifold: ContactManifold,
    pub material: PairMaterialProperties,
}

/// Maps a previous frame's accumulated impulses onto a new manifold's contacts.
///
/// A new contact inherits the impulse of the old contact that had the same feature id; contacts
/// without a match start from zero. A single contact replacing a single contact always inherits,
/// since one-contact manifolds rarely keep stable feature ids.
pub fn redistribute_impulses(
    old_feature_ids: &[i32],
    old_impulses: &ContactImpulses,
    manifold: &ContactManifold,
) -> ContactImpulses {
    let mut new_impulses = [0.0; MAXIMUM_CONTACT_COUNT];
    if old_feature_ids.len() == 1 && manifold.count() == 1 {
        new_impulses[0] = old_impulses[0];
        return new_impulses;
    }
    for (new_index, contact) in manifold.contacts().iter().enumerate() {
        if let Some(old_index) = old_feature_ids
            .iter()
            .position(|&feature_id| feature_id == contact.feature_id)
        {
            new_impulses[new_index] = old_impulses[old_index];
        }
    }
    new_impulses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collision_detection::contact_manifold::Contact;
    use glam::Vec3;

    fn manifold(feature_ids: &[i32]) -> ContactManifold {
        let mut manifold = ContactManifold::new(Vec3::ZERO, false);
        for &feature_id in feature_ids {
            manifold.add(Contact {
                feature_id,
                normal: Vec3::Y,
                ..Default::default()
            });
        }
        manifold
    }

    #[test]
    fn type_ids_cover_sixteen_layouts() {
        let mut seen = [false; CONTACT_CONSTRAINT_TYPE_COUNT];
        for count in 1..=4 {
            for convex in [false, true] {
                for two_body in [false, true] {
                    let id = ContactConstraintTypeId::new(count, convex, two_body);
                    assert_eq!(id.contact_count(), count);
                    assert_eq!(id.is_two_body(), two_body);
                    assert_eq!(id.is_convex(), convex || count == 1);
                    assert_eq!(id.cache_type_index(), count - 1);
                    seen[id.index()] = true;
                }
            }
        }
        // Nonconvex one-contact ids are never produced.
        assert_eq!(seen.iter().filter(|&&s| s).count(), 14);
        assert_eq!(ContactConstraintTypeId::new(3, false, true).name(), "Contact3Nonconvex");
    }

    #[test]
    fn impulses_follow_feature_ids() {
        let impulses = redistribute_impulses(&[7, 8, 9], &[1.0, 2.0, 3.0, 0.0], &manifold(&[9, 4, 7]));
        assert_eq!(impulses, [3.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn single_contact_always_inherits() {
        let impulses = redistribute_impulses(&[5], &[0.75, 0.0, 0.0, 0.0], &manifold(&[6]));
        assert_eq!(impulses[0], 0.75);
        let impulses = redistribute_impulses(&[5], &[0.75, 0.0, 0.0, 0.0], &manifold(&[6, 5]));
        assert_eq!(impulses, [0.0, 0.75, 0.0, 0.0]);
    }
}
