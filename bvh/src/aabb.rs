use glam::*;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::Ray;

/// Axis-aligned bounding box stored as two corners.
///
/// The empty box has `min = +inf` and `max = -inf` on every axis, which makes it
/// the identity element of [`Aabb::union_of`]. Boxes are closed sets: a point on
/// a face is inside the box.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

/// Anything that can report its own bounding box.
pub trait Bounds {
    fn bounds(&self) -> Aabb;
}

impl Bounds for Aabb {
    fn bounds(&self) -> Aabb {
        *self
    }
}

impl Display for Aabb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(min: ({}, {}, {}),  max: ({}, {}, {}))",
            self.min[0], self.min[1], self.min[2], self.max[0], self.max[1], self.max[2],
        )
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    pub fn empty() -> Aabb {
        Aabb {
            min: [f32::INFINITY; 3],
            max: [f32::NEG_INFINITY; 3],
        }
    }

    pub fn new(min: Vec3, max: Vec3) -> Aabb {
        Aabb {
            min: min.to_array(),
            max: max.to_array(),
        }
    }

    pub fn from_point(p: Vec3) -> Aabb {
        Self::new(p, p)
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|axis| !(self.min[axis] <= self.max[axis]))
    }

    /// Slab test against `ray` restricted to `[ray.t_min, ray.t_max]`.
    ///
    /// Returns the clamped entry and exit distances. A zero direction component
    /// has an infinite inverse; the ray then runs parallel to that slab and
    /// passes through it only when the origin lies within `[min, max]` on that
    /// axis. This sidesteps the `0 * inf = NaN` case of the plain slab formula.
    pub fn intersect(&self, ray: &Ray) -> Option<(f32, f32)> {
        let mut entry = ray.t_min;
        let mut exit = ray.t_max;

        for axis in 0..3 {
            let origin = ray.origin[axis];
            let inv = ray.inv_direction[axis];

            if inv.is_infinite() {
                if origin < self.min[axis] || origin > self.max[axis] {
                    return None;
                }
                continue;
            }

            let (near, far) = if inv.is_sign_negative() {
                (self.max[axis], self.min[axis])
            } else {
                (self.min[axis], self.max[axis])
            };

            let t_near = (near - origin) * inv;
            let t_far = (far - origin) * inv;

            if t_near > entry {
                entry = t_near;
            }
            if t_far < exit {
                exit = t_far;
            }
            if !(entry <= exit) {
                return None;
            }
        }

        // Parallel axes never narrow the interval, so an inverted one survives
        // the loop when no slab was tested.
        if !(entry <= exit) || exit < 0.0 {
            return None;
        }

        Some((entry, exit))
    }

    pub fn grow(&mut self, pos: Vec3) {
        let (min, max) = self.points();
        self.min = min.min(pos).into();
        self.max = max.max(pos).into();
    }

    pub fn grow_bb(&mut self, aabb: &Aabb) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(aabb.min[axis]);
            self.max[axis] = self.max[axis].max(aabb.max[axis]);
        }
    }

    /// Tightest box containing both `self` and `bb`.
    pub fn union_of(&self, bb: &Self) -> Self {
        let mut result = *self;
        result.grow_bb(bb);
        result
    }

    /// Tightest box containing both `self` and `pos`.
    pub fn extended(&self, pos: Vec3) -> Self {
        let mut result = *self;
        result.grow(pos);
        result
    }

    pub fn intersection(&self, bb: &Self) -> Self {
        let (min, max) = self.points();
        let (b_min, b_max) = bb.points();
        Self {
            min: min.max(b_min).into(),
            max: max.min(b_max).into(),
        }
    }

    pub fn contains(&self, bb: &Self) -> bool {
        if bb.is_empty() {
            return true;
        }
        (0..3).all(|axis| self.min[axis] <= bb.min[axis] && bb.max[axis] <= self.max[axis])
    }

    pub fn center(&self) -> Vec3 {
        let (min, max) = self.points();
        (min + max) * 0.5
    }

    /// Position of `p` relative to the box, `0` at `min` and `1` at `max`.
    /// Flat axes map to `0`.
    pub fn offset(&self, p: Vec3) -> Vec3 {
        let (min, max) = self.points();
        let o = p - min;
        let flat = max.cmpgt(min);
        Vec3::select(flat, o / Vec3::select(flat, max - min, Vec3::ONE), Vec3::ZERO)
    }

    /// `2 * (dx*dy + dy*dz + dz*dx)`, zero for the empty box.
    pub fn surface_area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let e = self.lengths();
        2.0 * (e.x * e.y + e.y * e.z + e.z * e.x)
    }

    /// Sum of the edge lengths along each axis, zero for the empty box.
    pub fn half_perimeter(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let e = self.lengths();
        e.x + e.y + e.z
    }

    pub fn lengths(&self) -> Vec3 {
        Vec3::from(self.max) - Vec3::from(self.min)
    }

    pub fn extent(&self, axis: usize) -> f32 {
        self.max[axis] - self.min[axis]
    }

    pub fn longest_axis(&self) -> usize {
        let mut a: usize = 0;
        if self.extent(1) > self.extent(0) {
            a = 1;
        }
        if self.extent(2) > self.extent(a) {
            a = 2
        }
        a
    }

    pub fn points(&self) -> (Vec3, Vec3) {
        (self.min.into(), self.max.into())
    }
}

impl From<(Vec3, Vec3)> for Aabb {
    fn from(v: (Vec3, Vec3)) -> Self {
        Aabb::new(v.0, v.1)
    }
}

impl From<Aabb> for (Vec3, Vec3) {
    fn from(bb: Aabb) -> Self {
        bb.points()
    }
}
