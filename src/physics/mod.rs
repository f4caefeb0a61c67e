pub mod bodies;
pub mod collidables;
pub mod collision_detection;
pub mod constraint_batch;
pub mod constraint_location;
pub mod handles;
pub mod solver;
pub mod trees;
