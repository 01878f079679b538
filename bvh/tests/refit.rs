mod common;

use common::*;
use glam::Vec3;
use rand::Rng;
use rfw_bvh::*;

#[test]
fn refit_matches_fresh_bounds() {
    init_logger();
    let mut rng = rng(51);
    let aabbs = random_boxes(&mut rng, 1200);

    for quality in [BuildQuality::Low, BuildQuality::High] {
        let mut bvh = Bvh::construct_with(&aabbs, quality, &BuildConfig::default()).unwrap();
        let topology: Vec<NodeKind> = bvh.nodes.iter().map(|n| n.kind).collect();
        let prim_indices = bvh.prim_indices.clone();

        let moved: Vec<Aabb> = aabbs
            .iter()
            .map(|bb| {
                let delta = Vec3::new(
                    rng.gen_range(-5.0..5.0),
                    rng.gen_range(-5.0..5.0),
                    rng.gen_range(-5.0..5.0),
                );
                Aabb::new(Vec3::from(bb.min) + delta, Vec3::from(bb.max) + delta)
            })
            .collect();

        bvh.refit(&moved).unwrap();

        // Same topology, boxes tight around the moved geometry.
        assert_eq!(bvh.nodes.iter().map(|n| n.kind).collect::<Vec<_>>(), topology);
        assert_eq!(bvh.prim_indices, prim_indices);
        bvh.validate(&moved).unwrap();
        assert_eq!(bvh.bounds(), union(&moved));

        // Refitting back restores the original boxes exactly.
        let original = Bvh::construct_with(&aabbs, quality, &BuildConfig::default()).unwrap();
        bvh.refit_with(|i| aabbs[i]).unwrap();
        assert_eq!(bvh, original);

        // Queries on a refit tree agree with a tree built over the moved boxes.
        bvh.refit(&moved).unwrap();
        let fresh = Bvh::construct_with(&moved, quality, &BuildConfig::default()).unwrap();
        for _ in 0..32 {
            let ray = random_ray(&mut rng);
            assert_eq!(
                bvh.traverse_closest(&ray, box_test(&moved)).map(|h| h.distance),
                fresh.traverse_closest(&ray, box_test(&moved)).map(|h| h.distance),
            );
        }
    }
}

#[test]
fn free_refit_on_raw_arrays() {
    let mut rng = rng(53);
    let aabbs = random_boxes(&mut rng, 100);
    let bvh = Bvh::construct(&aabbs).unwrap();
    let Bvh {
        mut nodes,
        prim_indices,
        build_order,
    } = bvh;

    let grown: Vec<Aabb> = aabbs
        .iter()
        .map(|bb| Aabb::new(Vec3::from(bb.min) - 1.0, Vec3::from(bb.max) + 1.0))
        .collect();
    refit(&mut nodes, &prim_indices, &build_order, |i| Ok(grown[i])).unwrap();

    let bvh = Bvh::from_parts(nodes, prim_indices, build_order).unwrap();
    bvh.validate(&grown).unwrap();
}

#[test]
fn refit_without_build_order_fails() {
    let mut rng = rng(55);
    let aabbs = random_boxes(&mut rng, 50);
    let built = Bvh::construct(&aabbs).unwrap();

    let mut bvh = Bvh::from_parts(built.nodes.clone(), built.prim_indices.clone(), Vec::new())
        .unwrap();
    // Still usable for queries.
    bvh.validate(&aabbs).unwrap();
    assert!(matches!(bvh.refit(&aabbs), Err(Error::InvalidTopology(_))));
    assert_eq!(bvh.nodes, built.nodes);

    let mut empty = Bvh::empty();
    assert!(matches!(empty.refit(&[]), Err(Error::InvalidTopology(_))));
    let mut restored = Bvh::from_parts(vec![], vec![], vec![]).unwrap();
    assert!(matches!(restored.refit(&[]), Err(Error::InvalidTopology(_))));
}

#[test]
fn refit_with_missing_boxes_fails() {
    let mut rng = rng(57);
    let aabbs = random_boxes(&mut rng, 64);
    let mut bvh = Bvh::construct(&aabbs).unwrap();
    let before = bvh.clone();

    match bvh.refit(&aabbs[..10]) {
        Err(Error::IndexOutOfRange { index, len }) => {
            assert!(index >= 10);
            assert_eq!(len, 10);
        }
        other => panic!("unexpected refit result {:?}", other),
    }
    assert_eq!(bvh, before);
}
