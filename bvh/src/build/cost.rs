use serde::{Deserialize, Serialize};

/// Cost model driving the surface area heuristic.
///
/// A split of a node with parent area `A` into children of areas `a_l`, `a_r`
/// holding `n_l`, `n_r` primitives is estimated as
/// `traversal_cost() + a_l / A * intersection_cost(n_l) + a_r / A * intersection_cost(n_r)`
/// and compared against `intersection_cost(n)` for keeping the node as a leaf.
pub trait CostModel: Sync {
    fn traversal_cost(&self) -> f32;
    fn intersection_cost(&self, prim_count: usize) -> f32;
}

/// Constant per-visit and per-primitive costs.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SahCost {
    pub traversal: f32,
    pub intersection: f32,
}

impl Default for SahCost {
    fn default() -> Self {
        Self {
            traversal: 1.0,
            intersection: 1.0,
        }
    }
}

impl CostModel for SahCost {
    fn traversal_cost(&self) -> f32 {
        self.traversal
    }

    fn intersection_cost(&self, prim_count: usize) -> f32 {
        self.intersection * prim_count as f32
    }
}

impl<F> CostModel for F
where
    F: Fn(usize) -> f32 + Sync,
{
    /// Closures model the intersection cost only; a node visit is one unit.
    fn traversal_cost(&self) -> f32 {
        1.0
    }

    fn intersection_cost(&self, prim_count: usize) -> f32 {
        self(prim_count)
    }
}
