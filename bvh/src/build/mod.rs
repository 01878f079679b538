pub mod cost;
pub mod lbvh_builder;
pub mod top_down_builder;

pub use cost::*;
pub use lbvh_builder::*;
pub use top_down_builder::*;

use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{Bvh, BvhNode, Error, NodeKind, PrimitiveRef, Result, MAX_PRIMITIVES};

pub trait Builder {
    /// Builds a hierarchy over `primitives`. The input slice is left untouched;
    /// the returned tree carries the permuted primitive indices.
    fn build(&self, primitives: &[PrimitiveRef]) -> Result<Bvh>;
}

/// Tuning values shared by the builders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Centroid bins per axis for the SAH sweep.
    pub bins: usize,
    /// Ranges of at most this many primitives always become leaves.
    pub min_leaf_size: usize,
    /// Ranges above this size are split whenever a split exists, even when the
    /// SAH predicts no gain. `usize::MAX` leaves termination to the SAH alone.
    pub max_leaf_size: usize,
    /// Maximum number of levels, root included.
    pub max_depth: usize,
    /// Ranges larger than this are candidates for a parallel split.
    pub parallel_threshold: usize,
    /// Upper bound on concurrently running build threads.
    pub max_threads: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            bins: 16,
            min_leaf_size: 1,
            max_leaf_size: 8,
            max_depth: 64,
            parallel_threshold: 1024,
            max_threads: num_cpus::get(),
        }
    }
}

impl BuildConfig {
    /// Copy of `self` with values that would stall or break a build clamped.
    pub fn sanitized(&self) -> Self {
        let mut config = self.clone();
        if config.bins < 2 {
            warn!("bvh build config: bins = {} raised to 2", config.bins);
            config.bins = 2;
        }
        if config.min_leaf_size == 0 {
            warn!("bvh build config: min_leaf_size = 0 raised to 1");
            config.min_leaf_size = 1;
        }
        if config.max_leaf_size < config.min_leaf_size {
            warn!(
                "bvh build config: max_leaf_size = {} raised to min_leaf_size = {}",
                config.max_leaf_size, config.min_leaf_size
            );
            config.max_leaf_size = config.min_leaf_size;
        }
        if config.max_depth == 0 {
            warn!("bvh build config: max_depth = 0 raised to 1");
            config.max_depth = 1;
        }
        if config.max_threads == 0 {
            warn!("bvh build config: max_threads = 0 raised to 1");
            config.max_threads = 1;
        }
        config
    }
}

/// Builder selection for the convenience entry points.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildQuality {
    /// Morton code ordering, fast to build.
    Low,
    /// Binned SAH, slower to build and cheaper to traverse.
    High,
}

impl Default for BuildQuality {
    fn default() -> Self {
        BuildQuality::High
    }
}

/// Binned SAH build with the default cost model.
pub fn build(primitives: &[PrimitiveRef], config: &BuildConfig) -> Result<Bvh> {
    BinnedSahBuilder::new(config.clone()).build(primitives)
}

/// Binned SAH build driven by a host supplied cost model.
pub fn build_with_cost<C: CostModel>(
    primitives: &[PrimitiveRef],
    config: &BuildConfig,
    cost: C,
) -> Result<Bvh> {
    BinnedSahBuilder::new(config.clone())
        .with_cost(cost)
        .build(primitives)
}

pub fn build_with_quality(
    primitives: &[PrimitiveRef],
    quality: BuildQuality,
    config: &BuildConfig,
) -> Result<Bvh> {
    match quality {
        BuildQuality::Low => LinearBuilder::new(config.clone()).build(primitives),
        BuildQuality::High => BinnedSahBuilder::new(config.clone()).build(primitives),
    }
}

pub(crate) fn check_input(primitives: &[PrimitiveRef]) -> Result<()> {
    if primitives.is_empty() {
        return Err(Error::InvalidInput(
            "cannot build a hierarchy over zero primitives".to_string(),
        ));
    }
    if primitives.len() > MAX_PRIMITIVES {
        return Err(Error::InvalidInput(format!(
            "{} primitives exceed the supported maximum of {}",
            primitives.len(),
            MAX_PRIMITIVES
        )));
    }
    Ok(())
}

pub(crate) fn check_cancelled(flag: &Option<Arc<AtomicBool>>) -> Result<()> {
    match flag {
        Some(flag) if flag.load(Ordering::Relaxed) => Err(Error::Cancelled),
        _ => Ok(()),
    }
}

/// Node slots reserved for a subtree over `prim_count` primitives.
///
/// A binary tree with at most one primitive per leaf has `2n - 1` nodes, so a
/// subtree rooted at slot `r` owns `r .. r + 2n - 1`: its root, then `2 * n_left - 1`
/// slots for the left child, then the rest for the right child. Multi-primitive
/// leaves leave unused slots behind, which [`finish`] drops.
pub(crate) fn reserved_len(prim_count: usize) -> usize {
    2 * prim_count - 1
}

/// Compacts a reserved node array into depth-first pre-order and packages the
/// tree. Pre-order puts every child after its parent, so the reverse of the
/// node order is a valid refit order.
pub(crate) fn finish(reserved: &[BvhNode], refs: &[PrimitiveRef]) -> Bvh {
    let mut order: Vec<u32> = Vec::with_capacity(reserved.len());
    let mut stack = vec![0_u32];
    while let Some(i) = stack.pop() {
        order.push(i);
        if let NodeKind::Internal { left, right } = reserved[i as usize].kind {
            stack.push(right);
            stack.push(left);
        }
    }

    let mut remap = vec![u32::MAX; reserved.len()];
    for (new, &old) in order.iter().enumerate() {
        remap[old as usize] = new as u32;
    }

    let nodes: Vec<BvhNode> = order
        .iter()
        .map(|&old| {
            let node = reserved[old as usize];
            match node.kind {
                NodeKind::Internal { left, right } => BvhNode::internal(
                    node.bounds,
                    remap[left as usize],
                    remap[right as usize],
                ),
                NodeKind::Leaf { .. } => node,
            }
        })
        .collect();

    let build_order = (0..nodes.len() as u32).rev().collect();

    Bvh {
        nodes,
        prim_indices: refs.iter().map(|r| r.index).collect(),
        build_order,
    }
}
