use super::contact_manifold::ContactManifold;
use super::pair_cache::CollidablePair;
use crate::physics::collidables::collidable_reference::CollidableReference;
use crate::utilities::thread_dispatcher::IThreadDispatcher;

/// Spring properties used by a contact constraint to recover from penetration.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpringSettings {
    pub angular_frequency: f32,
    pub twice_damping_ratio: f32,
}

impl SpringSettings {
    /// Constructs spring settings from a frequency in hertz and a damping ratio.
    pub fn new(frequency: f32, damping_ratio: f32) -> Self {
        Self {
            angular_frequency: frequency * std::f32::consts::TAU,
            twice_damping_ratio: damping_ratio * 2.0,
        }
    }
}

impl Default for SpringSettings {
    fn default() -> Self {
        Self::new(30.0, 1.0)
    }
}

/// Material properties governing the interaction between colliding bodies.
/// Used by the narrow phase to create constraints of the appropriate configuration.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairMaterialProperties {
    /// Coefficient of friction to apply for the constraint.
    /// Maximum friction force will be equal to the normal force times the friction coefficient.
    pub friction_coefficient: f32,
    /// Maximum relative velocity along the contact normal at which the collision constraint will recover from penetration.
    pub maximum_recovery_velocity: f32,
    /// Defines the constraint's penetration recovery spring properties.
    pub spring_settings: SpringSettings,
}

impl PairMaterialProperties {
    /// Constructs a pair's material properties.
    #[inline(always)]
    pub fn new(
        friction_coefficient: f32,
        maximum_recovery_velocity: f32,
        spring_settings: SpringSettings,
    ) -> Self {
        Self {
            friction_coefficient,
            maximum_recovery_velocity,
            spring_settings,
        }
    }
}

impl Default for PairMaterialProperties {
    fn default() -> Self {
        Self::new(1.0, 2.0, SpringSettings::default())
    }
}

/// Defines handlers for narrow phase events.
///
/// `allow_contact_generation` and `configure_contact_manifold` are called from many workers at
/// once, so implementations must be safe to share.
pub trait INarrowPhaseCallbacks: Send + Sync {
    /// Chooses whether to allow contact generation to proceed for two overlapping collidables.
    fn allow_contact_generation(
        &self,
        worker_index: usize,
        a: CollidableReference,
        b: CollidableReference,
    ) -> bool;

    /// Provides a notification that a manifold has been created for a pair.
    /// Offers an opportunity to change the manifold's details.
    /// Returns true if a constraint should be created for the manifold, false otherwise.
    fn configure_contact_manifold(
        &self,
        worker_index: usize,
        pair: CollidablePair,
        manifold: &mut ContactManifold,
        pair_material: &mut PairMaterialProperties,
    ) -> bool;

    /// Called once per frame after all overlaps have been handled and before constraints are
    /// flushed into the solver.
    fn flush(&mut self, _thread_dispatcher: Option<&dyn IThreadDispatcher>) {}

    /// Releases any resources held by the callbacks.
    fn dispose(&mut self) {}
}

/// Produces contact manifolds for overlapping collidable pairs.
///
/// The pipeline does not know shape geometry; the tester owns it. A tester may carry
/// per-pair state across frames through the collision cache bytes: whatever it writes into
/// `next_collision_cache` is handed back as `previous_collision_cache` on the next frame the
/// pair is tested.
pub trait IPairTester: Send + Sync {
    fn test(
        &self,
        worker_index: usize,
        pair: CollidablePair,
        previous_collision_cache: Option<&[u8]>,
        next_collision_cache: &mut Vec<u8>,
    ) -> ContactManifold;
}
