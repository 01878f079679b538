use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::Aabb;

/// What a node points at: two children or a slice of the primitive index array.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Internal { left: u32, right: u32 },
    Leaf { first: u32, count: u32 },
}

/// Element of the flat node arena. Children are addressed by index; there are
/// no parent links.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct BvhNode {
    pub bounds: Aabb,
    pub kind: NodeKind,
}

impl Display for BvhNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            NodeKind::Internal { left, right } => {
                write!(f, "internal {} -> ({}, {})", self.bounds, left, right)
            }
            NodeKind::Leaf { first, count } => {
                write!(f, "leaf {} -> [{}, {})", self.bounds, first, first + count)
            }
        }
    }
}

impl Default for BvhNode {
    fn default() -> Self {
        Self::leaf(Aabb::empty(), 0, 0)
    }
}

impl BvhNode {
    pub fn leaf(bounds: Aabb, first: u32, count: u32) -> BvhNode {
        BvhNode {
            bounds,
            kind: NodeKind::Leaf { first, count },
        }
    }

    pub fn internal(bounds: Aabb, left: u32, right: u32) -> BvhNode {
        BvhNode {
            bounds,
            kind: NodeKind::Internal { left, right },
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    /// Range into the primitive index array for leaves.
    pub fn prim_range(&self) -> Option<std::ops::Range<usize>> {
        match self.kind {
            NodeKind::Leaf { first, count } => {
                Some(first as usize..first as usize + count as usize)
            }
            NodeKind::Internal { .. } => None,
        }
    }

    pub fn children(&self) -> Option<(usize, usize)> {
        match self.kind {
            NodeKind::Internal { left, right } => Some((left as usize, right as usize)),
            NodeKind::Leaf { .. } => None,
        }
    }
}
