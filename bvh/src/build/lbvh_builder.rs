use glam::Vec3;
use log::debug;
use rayon::prelude::*;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::build::{check_cancelled, check_input, finish, reserved_len};
use crate::{Aabb, Builder, BuildConfig, Bvh, BvhNode, PrimitiveRef, Result};

/// Quantization steps per axis; 10 bits each give 30-bit codes.
const MORTON_DOMAIN: u32 = 1024;

fn morton_expand(mut n: u32) -> u32 {
    n = (n | (n << 16)) & 0x030000ff;
    n = (n | (n << 8)) & 0x0300f00f;
    n = (n | (n << 4)) & 0x030c30c3;
    n = (n | (n << 2)) & 0x09249249;
    n
}

fn morton_encoder(x: u32, y: u32, z: u32) -> u32 {
    (morton_expand(x) << 2) | (morton_expand(y) << 1) | morton_expand(z)
}

/// Morton code of `p` quantized inside `bounds`. Flat axes map to zero.
fn morton_code(p: Vec3, bounds: &Aabb) -> u32 {
    let max = (MORTON_DOMAIN - 1) as f32;
    let q = (bounds.offset(p) * MORTON_DOMAIN as f32).clamp(Vec3::ZERO, Vec3::splat(max));
    morton_encoder(q.x as u32, q.y as u32, q.z as u32)
}

/// Linear builder: orders primitives along a Morton curve over their centroids
/// and splits each range where the highest differing code bit flips.
///
/// Much faster to build than [`crate::BinnedSahBuilder`] but the resulting trees
/// are more expensive to traverse.
pub struct LinearBuilder {
    config: BuildConfig,
    cancel: Option<Arc<AtomicBool>>,
}

struct Range<'a> {
    codes: &'a [u32],
    refs: &'a [PrimitiveRef],
    first: usize,
    nodes: &'a mut [BvhNode],
    base: usize,
    depth: usize,
}

impl LinearBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config: config.sanitized(),
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Emits the subtree for `range` and returns its bounds.
    fn emit(&self, range: Range<'_>) -> Result<Aabb> {
        check_cancelled(&self.cancel)?;

        let Range {
            codes,
            refs,
            first,
            nodes,
            base,
            depth,
        } = range;
        let count = refs.len();

        // Codes are sorted, so the first and last differ in the highest bit
        // that differs anywhere in the range.
        let diff = codes[0] ^ codes[count - 1];
        if count <= self.config.max_leaf_size
            || diff == 0
            || depth + 1 >= self.config.max_depth
        {
            let bounds = refs
                .iter()
                .fold(Aabb::empty(), |acc, r| acc.union_of(&r.bounds));
            nodes[0] = BvhNode::leaf(bounds, first as u32, count as u32);
            return Ok(bounds);
        }

        let bit = 1_u32 << (31 - diff.leading_zeros());
        let split = codes.partition_point(|c| c & bit == 0);

        let (left_codes, right_codes) = codes.split_at(split);
        let (left_refs, right_refs) = refs.split_at(split);
        let (root, rest) = nodes.split_at_mut(1);
        let (left_nodes, right_nodes) = rest.split_at_mut(reserved_len(split));
        let left_base = base + 1;
        let right_base = base + 1 + reserved_len(split);

        let left = Range {
            codes: left_codes,
            refs: left_refs,
            first,
            nodes: left_nodes,
            base: left_base,
            depth: depth + 1,
        };
        let right = Range {
            codes: right_codes,
            refs: right_refs,
            first: first + split,
            nodes: right_nodes,
            base: right_base,
            depth: depth + 1,
        };

        let (left_bounds, right_bounds) = if count > self.config.parallel_threshold {
            let (l, r) = rayon::join(|| self.emit(left), || self.emit(right));
            (l?, r?)
        } else {
            (self.emit(left)?, self.emit(right)?)
        };

        let bounds = left_bounds.union_of(&right_bounds);
        root[0] = BvhNode::internal(bounds, left_base as u32, right_base as u32);
        Ok(bounds)
    }
}

impl Builder for LinearBuilder {
    fn build(&self, primitives: &[PrimitiveRef]) -> Result<Bvh> {
        check_input(primitives)?;
        let instant = std::time::Instant::now();

        let centroid_bounds = primitives
            .iter()
            .fold(Aabb::empty(), |acc, r| acc.extended(r.centroid()));

        let mut entries: Vec<(u32, PrimitiveRef)> = primitives
            .par_iter()
            .map(|r| (morton_code(r.centroid(), &centroid_bounds), *r))
            .collect();
        // Stable, equal codes keep their input order.
        entries.par_sort_by_key(|(code, _)| *code);
        let (codes, refs): (Vec<u32>, Vec<PrimitiveRef>) = entries.into_iter().unzip();

        let mut reserved = vec![BvhNode::default(); reserved_len(refs.len())];
        self.emit(Range {
            codes: &codes,
            refs: &refs,
            first: 0,
            nodes: reserved.as_mut_slice(),
            base: 0,
            depth: 0,
        })?;

        let bvh = finish(&reserved, &refs);
        debug!(
            "linear build: {} primitives -> {} nodes in {} ms",
            primitives.len(),
            bvh.nodes.len(),
            instant.elapsed().as_millis()
        );
        Ok(bvh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, NodeKind};

    #[test]
    fn morton_interleaves_bits() {
        assert_eq!(morton_expand(0), 0);
        assert_eq!(morton_expand(1), 1);
        assert_eq!(morton_expand(2), 8);
        assert_eq!(morton_expand(1023), 0x09249249);
        assert_eq!(morton_encoder(1, 0, 0), 4);
        assert_eq!(morton_encoder(0, 1, 0), 2);
        assert_eq!(morton_encoder(0, 0, 1), 1);
        assert_eq!(morton_encoder(1023, 1023, 1023), (1 << 30) - 1);
    }

    #[test]
    fn morton_code_clamps_to_domain() {
        let bounds = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(morton_code(Vec3::ZERO, &bounds), 0);
        assert_eq!(morton_code(Vec3::ONE, &bounds), (1 << 30) - 1);
    }

    fn row(n: usize) -> Vec<PrimitiveRef> {
        let boxes: Vec<Aabb> = (0..n)
            .map(|i| {
                let c = Vec3::new(i as f32, 0.0, 0.0);
                Aabb::new(c - 0.25, c + 0.25)
            })
            .collect();
        PrimitiveRef::from_aabbs(&boxes).unwrap()
    }

    #[test]
    fn sorted_row_keeps_order() {
        let config = BuildConfig {
            max_leaf_size: 1,
            ..BuildConfig::default()
        };
        let bvh = LinearBuilder::new(config).build(&row(16)).unwrap();
        assert_eq!(bvh.prim_indices, (0..16).collect::<Vec<u32>>());
        assert_eq!(bvh.nodes.len(), 31);
        assert!(bvh
            .nodes
            .iter()
            .filter_map(|n| n.prim_range())
            .all(|r| r.len() == 1));
    }

    #[test]
    fn reversed_row_is_sorted_by_code() {
        let mut refs = row(8);
        refs.reverse();
        let bvh = LinearBuilder::new(BuildConfig::default()).build(&refs).unwrap();
        assert_eq!(bvh.prim_indices, (0..8).collect::<Vec<u32>>());
    }

    #[test]
    fn identical_codes_form_one_leaf() {
        let bb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let refs: Vec<PrimitiveRef> = (0..12).map(|i| PrimitiveRef::new(i, bb)).collect();
        let bvh = LinearBuilder::new(BuildConfig::default()).build(&refs).unwrap();
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.nodes[0].kind, NodeKind::Leaf { first: 0, count: 12 });
        assert_eq!(bvh.prim_indices, (0..12).collect::<Vec<u32>>());
    }

    #[test]
    fn internal_bounds_are_tight() {
        let bvh = LinearBuilder::new(BuildConfig {
            max_leaf_size: 2,
            ..BuildConfig::default()
        })
        .build(&row(10))
        .unwrap();
        for node in &bvh.nodes {
            if let Some((l, r)) = node.children() {
                assert_eq!(
                    node.bounds,
                    bvh.nodes[l].bounds.union_of(&bvh.nodes[r].bounds)
                );
            }
        }
    }

    #[test]
    fn cancelled_build_fails() {
        let flag = Arc::new(AtomicBool::new(true));
        let builder = LinearBuilder::new(BuildConfig::default()).with_cancellation(flag);
        assert_eq!(builder.build(&row(4)).unwrap_err(), Error::Cancelled);
    }
}
