//! Collision pipeline core of a rigid body physics engine.
//!
//! The broad phase keeps collidable bounds in dynamic bounding volume trees and reports
//! overlapping pairs. The narrow phase turns those overlaps into contact constraints,
//! correlates them with the previous frame for warm starting, and batches constraint
//! additions and removals so that they can be applied without a global lock.

pub mod error;
pub mod physics;
pub mod utilities;

pub use error::ConfigError;
