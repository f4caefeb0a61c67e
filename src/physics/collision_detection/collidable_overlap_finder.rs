use crate::physics::collidables::collidable_reference::CollidableReference;
use crate::physics::collision_detection::broad_phase::BroadPhase;
use crate::physics::collision_detection::narrow_phase::{NarrowPhase, NarrowPhaseWorker};
use crate::physics::collision_detection::narrow_phase_callbacks::{INarrowPhaseCallbacks, IPairTester};
use crate::physics::trees::IOverlapHandler;
use crate::utilities::thread_dispatcher::IThreadDispatcher;
use tracing::trace;

/// Forwards leaf overlaps reported by the trees to a narrow phase worker.
struct OverlapHandler<'a, C, T> {
    leaves_a: &'a [CollidableReference],
    leaves_b: &'a [CollidableReference],
    worker: NarrowPhaseWorker<'a, C, T>,
    overlap_count: usize,
}

impl<C: INarrowPhaseCallbacks, T: IPairTester> IOverlapHandler for OverlapHandler<'_, C, T> {
    #[inline(always)]
    fn handle(&mut self, index_a: i32, index_b: i32) {
        let a = self.leaves_a[index_a as usize];
        let b = self.leaves_b[index_b as usize];
        self.overlap_count += 1;
        self.worker.handle_overlap(a, b);
    }
}

/// Finds overlapping collidables in the broad phase and hands them to the narrow phase.
///
/// Moving collidables are tested against each other and against statics. Statics are never
/// tested against each other.
pub struct CollidableOverlapFinder<'a, C: INarrowPhaseCallbacks, T: IPairTester> {
    narrow_phase: &'a mut NarrowPhase<C, T>,
    broad_phase: &'a BroadPhase,
}

impl<'a, C: INarrowPhaseCallbacks, T: IPairTester> CollidableOverlapFinder<'a, C, T> {
    pub fn new(narrow_phase: &'a mut NarrowPhase<C, T>, broad_phase: &'a BroadPhase) -> Self {
        Self {
            narrow_phase,
            broad_phase,
        }
    }

    /// Prepares the narrow phase and reports every overlap to it, spreading the tree queries
    /// over the dispatcher's workers if there is more than one. Call `NarrowPhase::flush`
    /// afterwards to apply the results.
    pub fn dispatch_overlaps(&mut self, thread_dispatcher: Option<&dyn IThreadDispatcher>) {
        self.narrow_phase.prepare(thread_dispatcher);
        let broad_phase = self.broad_phase;
        let active_leaves = broad_phase.active_leaves();
        let static_leaves = broad_phase.static_leaves();
        let mut self_handlers: Vec<_> = self
            .narrow_phase
            .workers()
            .into_iter()
            .map(|worker| OverlapHandler {
                leaves_a: active_leaves,
                leaves_b: active_leaves,
                worker,
                overlap_count: 0,
            })
            .collect();
        let (self_overlaps, handlers) = match thread_dispatcher {
            Some(dispatcher) if dispatcher.thread_count() > 1 && self_handlers.len() > 1 => {
                broad_phase
                    .active_tree
                    .get_self_overlaps_mt(dispatcher, &mut self_handlers);
                let mut intertree_handlers: Vec<_> = self_handlers
                    .into_iter()
                    .map(|handler| OverlapHandler {
                        leaves_b: static_leaves,
                        ..handler
                    })
                    .collect();
                let self_overlaps = intertree_handlers.iter().map(|handler| handler.overlap_count).sum::<usize>();
                broad_phase
                    .active_tree
                    .get_overlaps_with_tree_mt(&broad_phase.static_tree, dispatcher, &mut intertree_handlers);
                (self_overlaps, intertree_handlers)
            }
            _ => {
                let handler = &mut self_handlers[0];
                broad_phase.active_tree.get_self_overlaps(handler);
                let mut intertree_handlers: Vec<_> = self_handlers
                    .into_iter()
                    .map(|handler| OverlapHandler {
                        leaves_b: static_leaves,
                        ..handler
                    })
                    .collect();
                let self_overlaps = intertree_handlers[0].overlap_count;
                broad_phase
                    .active_tree
                    .get_overlaps_with_tree(&broad_phase.static_tree, &mut intertree_handlers[0]);
                (self_overlaps, intertree_handlers)
            }
        };
        let total = handlers.iter().map(|handler| handler.overlap_count).sum::<usize>();
        trace!(
            self_overlaps,
            static_overlaps = total - self_overlaps,
            "dispatched broad phase overlaps"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collision_detection::broad_phase::BroadPhaseConfig;
    use crate::physics::collision_detection::contact_manifold::{Contact, ContactManifold};
    use crate::physics::collision_detection::narrow_phase::NarrowPhaseConfig;
    use crate::physics::collision_detection::narrow_phase_callbacks::PairMaterialProperties;
    use crate::physics::collision_detection::pair_cache::CollidablePair;
    use crate::physics::handles::{BodyHandle, StaticHandle};
    use crate::physics::solver::Solver;
    use crate::utilities::bounding_box::BoundingBox;
    use crate::utilities::thread_dispatcher::SimpleThreadDispatcher;
    use glam::Vec3;

    struct AlwaysTouching;

    impl IPairTester for AlwaysTouching {
        fn test(&self, _: usize, _: CollidablePair, _: Option<&[u8]>, _: &mut Vec<u8>) -> ContactManifold {
            let mut manifold = ContactManifold::new(Vec3::X, true);
            manifold.add(Contact {
                depth: 0.01,
                ..Default::default()
            });
            manifold
        }
    }

    struct AcceptAll;

    impl INarrowPhaseCallbacks for AcceptAll {
        fn allow_contact_generation(&self, _: usize, _: CollidableReference, _: CollidableReference) -> bool {
            true
        }

        fn configure_contact_manifold(
            &self,
            _: usize,
            _: CollidablePair,
            _: &mut ContactManifold,
            _: &mut PairMaterialProperties,
        ) -> bool {
            true
        }
    }

    /// A row of unit boxes overlapping their neighbors, on top of one long static.
    fn scene(count: i32) -> BroadPhase {
        let mut broad_phase = BroadPhase::new(BroadPhaseConfig::default()).unwrap();
        for i in 0..count {
            let x = i as f32 * 0.75;
            broad_phase.add_active(
                CollidableReference::dynamic(BodyHandle(i)),
                BoundingBox::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0)),
            );
        }
        broad_phase.add_static(
            CollidableReference::from_static(StaticHandle(0)),
            BoundingBox::new(Vec3::new(-10.0, -1.0, -10.0), Vec3::new(1000.0, 0.25, 10.0)),
        );
        broad_phase
    }

    fn constraint_count(thread_dispatcher: Option<&dyn IThreadDispatcher>) -> usize {
        let broad_phase = scene(64);
        let mut narrow_phase =
            NarrowPhase::new(AcceptAll, AlwaysTouching, Solver::new(64, 8, 128), NarrowPhaseConfig::default()).unwrap();
        CollidableOverlapFinder::new(&mut narrow_phase, &broad_phase).dispatch_overlaps(thread_dispatcher);
        narrow_phase.flush(thread_dispatcher);
        assert!(narrow_phase.solver().validate_constraint_locations());
        narrow_phase.solver().count_constraints()
    }

    #[test]
    fn every_overlap_reaches_the_narrow_phase() {
        // 63 neighbor pairs plus 64 body-static pairs.
        assert_eq!(constraint_count(None), 127);
        let dispatcher = SimpleThreadDispatcher::new(4).unwrap();
        assert_eq!(constraint_count(Some(&dispatcher)), 127);
    }
}
