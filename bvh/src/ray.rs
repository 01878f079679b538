use glam::*;

/// A ray with a valid parametric interval `[t_min, t_max]`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    /// Component-wise `1 / direction`; a zero component becomes a signed infinity.
    pub inv_direction: Vec3,
    pub t_min: f32,
    pub t_max: f32,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3, t_min: f32, t_max: f32) -> Ray {
        Ray {
            origin,
            direction,
            inv_direction: direction.recip(),
            t_min,
            t_max,
        }
    }

    pub fn from_arrays(origin: [f32; 3], direction: [f32; 3], t_min: f32, t_max: f32) -> Ray {
        Self::new(Vec3::from(origin), Vec3::from(direction), t_min, t_max)
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Same ray with its interval upper bound moved to `t_max`.
    pub fn with_t_max(&self, t_max: f32) -> Ray {
        Ray { t_max, ..*self }
    }

    pub fn contains(&self, t: f32) -> bool {
        t >= self.t_min && t <= self.t_max
    }
}
