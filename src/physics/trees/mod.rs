pub mod leaf;
pub mod node;
pub mod tree;
pub mod tree_add;
pub mod tree_cache_optimizer;
pub mod tree_diagnostics;
pub mod tree_intertree_queries;
pub mod tree_intertree_queries_mt;
pub mod tree_multithreaded_refit_refine;
pub mod tree_refine_common;
pub mod tree_refinement_scheduling;
pub mod tree_refit;
pub mod tree_remove;
pub mod tree_self_queries;
pub mod tree_self_queries_mt;
pub mod tree_sweep_builder;

pub use leaf::Leaf;
pub use node::{Metanode, Node, NodeChild};
pub use tree::Tree;
pub use tree_diagnostics::TreeValidationError;
pub use tree_refine_common::TreeletRefinement;
pub use tree_self_queries::IOverlapHandler;
