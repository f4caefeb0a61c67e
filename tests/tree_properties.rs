use bepu_collision_pipeline::physics::trees::Tree;
use bepu_collision_pipeline::utilities::bounding_box::BoundingBox;
use bepu_collision_pipeline::utilities::memory::buffer_pool::BufferPool;
use glam::Vec3;
use proptest::prelude::*;

fn boxes() -> impl Strategy<Value = Vec<BoundingBox>> {
    prop::collection::vec(
        (
            (-20.0f32..20.0, -20.0f32..20.0, -20.0f32..20.0),
            (0.1f32..5.0, 0.1f32..5.0, 0.1f32..5.0),
        )
            .prop_map(|((x, y, z), (w, h, d))| {
                let min = Vec3::new(x, y, z);
                BoundingBox::new(min, min + Vec3::new(w, h, d))
            }),
        0..120,
    )
}

fn build(bounds: &[BoundingBox], pool: &mut BufferPool) -> Tree {
    let mut tree = Tree::new(pool, bounds.len().max(1));
    for (i, b) in bounds.iter().enumerate() {
        assert_eq!(tree.add(*b, pool), i as i32);
    }
    tree
}

fn brute_force_pairs(bounds: &[BoundingBox]) -> Vec<(i32, i32)> {
    let mut pairs = Vec::new();
    for i in 0..bounds.len() {
        for j in i + 1..bounds.len() {
            if BoundingBox::intersects(&bounds[i], &bounds[j]) {
                pairs.push((i as i32, j as i32));
            }
        }
    }
    pairs
}

fn tree_pairs(tree: &Tree) -> Vec<(i32, i32)> {
    let mut pairs = Vec::new();
    tree.get_self_overlaps(&mut |a: i32, b: i32| pairs.push((a.min(b), a.max(b))));
    pairs.sort_unstable();
    pairs
}

proptest! {
    #[test]
    fn self_overlaps_match_brute_force(bounds in boxes()) {
        let mut pool = BufferPool::new();
        let tree = build(&bounds, &mut pool);
        prop_assert!(tree.validate().is_ok());
        prop_assert_eq!(tree_pairs(&tree), brute_force_pairs(&bounds));
    }

    #[test]
    fn refinement_preserves_overlaps(bounds in boxes(), frame_index in 0i32..16) {
        let mut pool = BufferPool::new();
        let mut tree = build(&bounds, &mut pool);
        tree.refit_and_refine(frame_index, 1.0, 1.0);
        prop_assert!(tree.validate().is_ok());
        prop_assert_eq!(tree.leaf_count() as usize, bounds.len());
        for (i, b) in bounds.iter().enumerate() {
            prop_assert_eq!(tree.get_bounds(i as i32), *b);
        }
        prop_assert_eq!(tree_pairs(&tree), brute_force_pairs(&bounds));
    }

    #[test]
    fn removal_keeps_the_tree_consistent(bounds in boxes(), removals in prop::collection::vec(any::<prop::sample::Index>(), 0..40)) {
        let mut pool = BufferPool::new();
        let mut tree = build(&bounds, &mut pool);
        // Mirror the tree's swap removal on the bounds list.
        let mut remaining = bounds.clone();
        let mut removed = Vec::new();
        for removal in removals {
            if remaining.is_empty() {
                break;
            }
            let index = removal.index(remaining.len());
            let moved = tree.remove_at(index as i32);
            removed.push(remaining.swap_remove(index));
            if index < remaining.len() {
                prop_assert_eq!(moved, remaining.len() as i32);
            } else {
                prop_assert_eq!(moved, -1);
            }
        }
        prop_assert!(tree.validate().is_ok());
        prop_assert_eq!(tree.leaf_count() as usize, remaining.len());
        for (i, b) in remaining.iter().enumerate() {
            prop_assert_eq!(tree.get_bounds(i as i32), *b);
        }
        prop_assert_eq!(tree_pairs(&tree), brute_force_pairs(&remaining));

        // Adding the removed leaves back yields the same overlaps as a fresh build.
        for b in removed {
            tree.add(b, &mut pool);
            remaining.push(b);
        }
        prop_assert!(tree.validate().is_ok());
        prop_assert_eq!(tree_pairs(&tree), brute_force_pairs(&remaining));
    }
}
