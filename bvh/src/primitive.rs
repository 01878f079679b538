use glam::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{Aabb, Bounds, Error, Result};

/// Largest primitive set a tree can hold. Node indices of the builders' reserved
/// layout (`2n - 1` slots) must fit in `u32`.
pub const MAX_PRIMITIVES: usize = (u32::MAX / 2) as usize;

fn check_count(len: usize) -> Result<()> {
    if len > MAX_PRIMITIVES {
        return Err(Error::InvalidInput(format!(
            "{} primitives exceed the supported maximum of {}",
            len, MAX_PRIMITIVES
        )));
    }
    Ok(())
}

/// A primitive as seen by the builders: an opaque index into host storage
/// together with its bounding box and cached centroid.
///
/// Builders reorder slices of references but never change their fields.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveRef {
    pub index: u32,
    pub bounds: Aabb,
    pub centroid: [f32; 3],
}

impl PrimitiveRef {
    pub fn new(index: u32, bounds: Aabb) -> Self {
        Self {
            index,
            bounds,
            centroid: bounds.center().into(),
        }
    }

    /// References for `aabbs`, indexed by position. Fails with
    /// [`Error::InvalidInput`] above [`MAX_PRIMITIVES`] boxes.
    pub fn from_aabbs(aabbs: &[Aabb]) -> Result<Vec<Self>> {
        check_count(aabbs.len())?;
        Ok(aabbs
            .par_iter()
            .enumerate()
            .map(|(i, bb)| Self::new(i as u32, *bb))
            .collect())
    }

    /// References for arbitrary bounded shapes, indexed by position. Fails with
    /// [`Error::InvalidInput`] above [`MAX_PRIMITIVES`] shapes.
    pub fn from_bounds<T: Bounds + Sync>(shapes: &[T]) -> Result<Vec<Self>> {
        check_count(shapes.len())?;
        Ok(shapes
            .par_iter()
            .enumerate()
            .map(|(i, shape)| Self::new(i as u32, shape.bounds()))
            .collect())
    }

    pub fn centroid(&self) -> Vec3 {
        Vec3::from(self.centroid)
    }
}
