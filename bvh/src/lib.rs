//! Bounding volume hierarchies over axis-aligned boxes: binned SAH and Morton
//! code builders, stack based ray traversal and bottom-up refit.

pub mod aabb;
pub mod build;
pub mod bvh;
pub mod bvh_node;
pub mod error;
pub mod primitive;
pub mod ray;
pub mod refit;
pub mod traversal;

pub use crate::bvh::*;
pub use aabb::*;
pub use build::*;
pub use bvh_node::*;
pub use error::*;
pub use primitive::*;
pub use ray::*;
pub use refit::refit;
pub use traversal::*;
