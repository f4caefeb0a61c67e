pub mod broad_phase;
pub mod collidable_overlap_finder;
pub mod constraint_remover;
pub mod contact_constraint_accessor;
pub mod contact_manifold;
pub mod freshness_checker;
pub mod narrow_phase;
pub mod narrow_phase_callbacks;
pub mod narrow_phase_pending_constraint_adds;
mod narrow_phase_preflush;
pub mod pair_cache;
pub mod untyped_list;
pub mod worker_pair_cache;

pub use broad_phase::{BroadPhase, BroadPhaseConfig};
pub use collidable_overlap_finder::CollidableOverlapFinder;
pub use constraint_remover::{ConstraintRemover, ConstraintRemoverConfig};
pub use contact_constraint_accessor::{ContactConstraintDescription, ContactConstraintTypeId, ContactImpulses};
pub use contact_manifold::{Contact, ContactManifold};
pub use narrow_phase::{NarrowPhase, NarrowPhaseConfig, NarrowPhaseWorker};
pub use narrow_phase_callbacks::{INarrowPhaseCallbacks, IPairTester, PairMaterialProperties, SpringSettings};
pub use pair_cache::{CollidablePair, CollidablePairPointers, ConstraintCache, PairCache, PairCacheConfig, PairCacheIndex};
