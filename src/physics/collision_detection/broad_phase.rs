use crate::error::{require_capacity, require_scale, ConfigError};
use crate::physics::collidables::collidable_reference::CollidableReference;
use crate::physics::trees::tree::Tree;
use crate::utilities::bounding_box::BoundingBox;
use crate::utilities::memory::buffer_pool::BufferPool;
use crate::utilities::thread_dispatcher::IThreadDispatcher;
use glam::Vec3;
use tracing::debug;

/// Settings of the broad phase trees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BroadPhaseConfig {
    pub initial_active_leaf_capacity: usize,
    pub initial_static_leaf_capacity: usize,
    /// Scales how many refinement targets are picked each frame.
    pub refine_aggressiveness_scale: f32,
    /// Scales how many nodes the incremental cache optimization visits each frame.
    pub cache_optimize_aggressiveness_scale: f32,
}

impl Default for BroadPhaseConfig {
    fn default() -> Self {
        Self {
            initial_active_leaf_capacity: 4096,
            initial_static_leaf_capacity: 8192,
            refine_aggressiveness_scale: 1.0,
            cache_optimize_aggressiveness_scale: 1.0,
        }
    }
}

impl BroadPhaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_capacity("initial_active_leaf_capacity", self.initial_active_leaf_capacity)?;
        require_capacity("initial_static_leaf_capacity", self.initial_static_leaf_capacity)?;
        require_scale("refine_aggressiveness_scale", self.refine_aggressiveness_scale)?;
        require_scale(
            "cache_optimize_aggressiveness_scale",
            self.cache_optimize_aggressiveness_scale,
        )
    }
}

/// Manages scene acceleration structures for collision detection and queries.
pub struct BroadPhase {
    /// Tree containing moving collidables.
    pub active_tree: Tree,
    /// Tree containing statics.
    pub static_tree: Tree,
    active_leaves: Vec<CollidableReference>,
    static_leaves: Vec<CollidableReference>,
    config: BroadPhaseConfig,
    pool: BufferPool,
    // Set whenever the static tree changes; the static tree is only refined after changes.
    static_dirty: bool,
}

impl BroadPhase {
    pub fn new(config: BroadPhaseConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut pool = BufferPool::new();
        let active_tree = Tree::new(&mut pool, config.initial_active_leaf_capacity);
        let static_tree = Tree::new(&mut pool, config.initial_static_leaf_capacity);
        Ok(Self {
            active_leaves: pool.take_at_least(config.initial_active_leaf_capacity),
            static_leaves: pool.take_at_least(config.initial_static_leaf_capacity),
            active_tree,
            static_tree,
            config,
            pool,
            static_dirty: false,
        })
    }

    pub fn config(&self) -> &BroadPhaseConfig {
        &self.config
    }

    /// Collidables of the active tree, indexed by leaf.
    #[inline(always)]
    pub fn active_leaves(&self) -> &[CollidableReference] {
        &self.active_leaves
    }

    /// Collidables of the static tree, indexed by leaf.
    #[inline(always)]
    pub fn static_leaves(&self) -> &[CollidableReference] {
        &self.static_leaves
    }

    fn add_internal(
        collidable: CollidableReference,
        bounds: BoundingBox,
        tree: &mut Tree,
        pool: &mut BufferPool,
        leaves: &mut Vec<CollidableReference>,
    ) -> i32 {
        let leaf_index = tree.add(bounds, pool);
        debug_assert_eq!(leaf_index as usize, leaves.len(), "Tree leaves and collidables must stay in step.");
        leaves.push(collidable);
        leaf_index
    }

    fn remove_internal(
        index: i32,
        tree: &mut Tree,
        leaves: &mut Vec<CollidableReference>,
    ) -> Option<CollidableReference> {
        let moved_leaf_index = tree.remove_at(index);
        leaves.swap_remove(index as usize);
        debug_assert!(moved_leaf_index < 0 || moved_leaf_index as usize == leaves.len());
        (moved_leaf_index >= 0).then(|| leaves[index as usize])
    }

    /// Adds a moving collidable and returns its leaf index in the active tree.
    pub fn add_active(&mut self, collidable: CollidableReference, bounds: BoundingBox) -> i32 {
        Self::add_internal(
            collidable,
            bounds,
            &mut self.active_tree,
            &mut self.pool,
            &mut self.active_leaves,
        )
    }

    /// Removes the active leaf at `index`. If another collidable was moved into the slot to
    /// fill the gap, returns it; its leaf index is now `index`.
    pub fn remove_active_at(&mut self, index: i32) -> Option<CollidableReference> {
        Self::remove_internal(index, &mut self.active_tree, &mut self.active_leaves)
    }

    /// Adds a static collidable and returns its leaf index in the static tree.
    pub fn add_static(&mut self, collidable: CollidableReference, bounds: BoundingBox) -> i32 {
        self.static_dirty = true;
        Self::add_internal(
            collidable,
            bounds,
            &mut self.static_tree,
            &mut self.pool,
            &mut self.static_leaves,
        )
    }

    /// Removes the static leaf at `index`, returning the collidable moved into its slot, if any.
    pub fn remove_static_at(&mut self, index: i32) -> Option<CollidableReference> {
        self.static_dirty = true;
        Self::remove_internal(index, &mut self.static_tree, &mut self.static_leaves)
    }

    /// Applies updated bounds to the given active leaf index, refitting the tree to match.
    #[inline(always)]
    pub fn update_active_bounds(&mut self, broad_phase_index: i32, min: Vec3, max: Vec3) {
        self.active_tree.update_bounds(broad_phase_index, min, max);
    }

    /// Applies updated bounds to the given static leaf index, refitting the tree to match.
    #[inline(always)]
    pub fn update_static_bounds(&mut self, broad_phase_index: i32, min: Vec3, max: Vec3) {
        self.static_dirty = true;
        self.static_tree.update_bounds(broad_phase_index, min, max);
    }

    /// Refits and refines the trees. The active tree is processed every frame; the static tree
    /// only after statics were added, removed or moved.
    pub fn update(&mut self, thread_dispatcher: Option<&dyn IThreadDispatcher>, frame_index: i32) {
        let refine_scale = self.config.refine_aggressiveness_scale;
        let cache_scale = self.config.cache_optimize_aggressiveness_scale;
        let refine = |tree: &mut Tree| match thread_dispatcher {
            Some(dispatcher) if dispatcher.thread_count() > 1 => {
                tree.refit_and_refine_mt(dispatcher, frame_index, refine_scale, cache_scale)
            }
            _ => tree.refit_and_refine(frame_index, refine_scale, cache_scale),
        };
        let active_targets = refine(&mut self.active_tree);
        let static_targets = if self.static_dirty {
            self.static_dirty = false;
            refine(&mut self.static_tree)
        } else {
            0
        };
        debug!(
            frame_index,
            active_leaves = self.active_tree.leaf_count(),
            static_leaves = self.static_tree.leaf_count(),
            active_targets,
            static_targets,
            "updated broad phase"
        );
    }

    /// Clears out the broad phase's structures without releasing any resources.
    pub fn clear(&mut self) {
        self.active_tree.clear();
        self.static_tree.clear();
        self.active_leaves.clear();
        self.static_leaves.clear();
        self.static_dirty = false;
    }

    /// Returns all of the broad phase's storage to its pool.
    pub fn dispose(&mut self) {
        self.active_tree.dispose(&mut self.pool);
        self.static_tree.dispose(&mut self.pool);
        self.pool.return_buffer(std::mem::take(&mut self.active_leaves));
        self.pool.return_buffer(std::mem::take(&mut self.static_leaves));
        self.pool.clear();
    }
}
