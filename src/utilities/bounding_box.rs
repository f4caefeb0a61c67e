use glam::Vec3;

/// Provides simple axis-aligned bounding box functionality.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    /// Location with the lowest X, Y, and Z coordinates in the axis-aligned bounding box.
    pub min: Vec3,
    /// Location with the highest X, Y, and Z coordinates in the axis-aligned bounding box.
    pub max: Vec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingBox {
    /// Constructs a bounding box from the specified minimum and maximum.
    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Creates an inverted box that acts as the identity for merging.
    #[inline]
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(f32::MIN),
        }
    }

    /// Creates a box centered on `center` with the given half extents.
    #[inline]
    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Determines if a bounding box intersects another bounding box. Touching boxes intersect.
    #[inline]
    pub fn intersects(a: &Self, b: &Self) -> bool {
        Self::intersects_bounds(a.min, a.max, b.min, b.max)
    }

    /// Determines if two min/max pairs intersect.
    #[inline]
    pub fn intersects_bounds(min_a: Vec3, max_a: Vec3, min_b: Vec3, max_b: Vec3) -> bool {
        let separated = max_a.cmplt(min_b) | max_b.cmplt(min_a);
        !separated.any()
    }

    /// Computes a bounding box which contains two other bounding boxes.
    #[inline]
    pub fn create_merged(min_a: Vec3, max_a: Vec3, min_b: Vec3, max_b: Vec3) -> (Vec3, Vec3) {
        (min_a.min(min_b), max_a.max(max_b))
    }

    /// Computes the box containing both `a` and `b`.
    #[inline]
    pub fn merge(a: &Self, b: &Self) -> Self {
        Self {
            min: a.min.min(b.min),
            max: a.max.max(b.max),
        }
    }

    /// Surface-area-proportional cost of a box: x*y + y*z + z*x of its extent.
    ///
    /// Unlike volume, flat boxes still have a nonzero cost.
    #[inline]
    pub fn compute_bounds_metric(min: Vec3, max: Vec3) -> f32 {
        let offset = max - min;
        offset.x * offset.y + offset.y * offset.z + offset.z * offset.x
    }

    /// Surface-area-proportional cost of this box.
    #[inline]
    pub fn metric(&self) -> f32 {
        Self::compute_bounds_metric(self.min, self.max)
    }

    /// Checks whether `other` lies entirely within this box.
    #[inline]
    pub fn contains(&self, other: &Self) -> bool {
        self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
    }

    /// Midpoint of the box scaled by two; cheaper than the true center and orders identically.
    #[inline]
    pub fn doubled_centroid(&self) -> Vec3 {
        self.min + self.max
    }
}
