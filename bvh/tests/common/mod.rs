#![allow(dead_code)]

use glam::Vec3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rfw_bvh::{Aabb, Ray};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn rng(seed: u64) -> SmallRng {
    SmallRng::seed_from_u64(seed)
}

/// `n` small boxes scattered through a 100 unit cube.
pub fn random_boxes(rng: &mut SmallRng, n: usize) -> Vec<Aabb> {
    (0..n)
        .map(|_| {
            let center = Vec3::new(
                rng.gen_range(-50.0..50.0),
                rng.gen_range(-50.0..50.0),
                rng.gen_range(-50.0..50.0),
            );
            let half = Vec3::new(
                rng.gen_range(0.05..2.0),
                rng.gen_range(0.05..2.0),
                rng.gen_range(0.05..2.0),
            );
            Aabb::new(center - half, center + half)
        })
        .collect()
}

/// Ray starting somewhere near the scene pointing at a random point inside it.
pub fn random_ray(rng: &mut SmallRng) -> Ray {
    let origin = Vec3::new(
        rng.gen_range(-80.0..80.0),
        rng.gen_range(-80.0..80.0),
        rng.gen_range(-80.0..80.0),
    );
    let target = Vec3::new(
        rng.gen_range(-40.0..40.0),
        rng.gen_range(-40.0..40.0),
        rng.gen_range(-40.0..40.0),
    );
    Ray::new(origin, (target - origin).normalize(), 0.0, f32::INFINITY)
}

/// Treats every primitive as a solid box: the hit distance is the entry point.
pub fn box_test(boxes: &[Aabb]) -> impl FnMut(&Ray, usize) -> Option<(f32, ())> + '_ {
    move |ray, prim| boxes[prim].intersect(ray).map(|(t, _)| (t, ()))
}

pub fn union(boxes: &[Aabb]) -> Aabb {
    boxes.iter().fold(Aabb::empty(), |acc, b| acc.union_of(b))
}
