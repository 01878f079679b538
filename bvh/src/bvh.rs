use serde::{Deserialize, Serialize};

use crate::aabb::Bounds;
use crate::build::{build_with_quality, BuildConfig, BuildQuality};
use crate::traversal::{traverse_all, traverse_any, traverse_closest, AllHits, Hit};
use crate::{Aabb, BvhNode, Error, NodeKind, PrimitiveRef, Ray, Result};

/// A built hierarchy: the node arena (root at index 0), the permuted primitive
/// indices referenced by leaves, and the children-before-parents node order
/// used by refit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bvh {
    pub nodes: Vec<BvhNode>,
    pub prim_indices: Vec<u32>,
    pub build_order: Vec<u32>,
}

impl Default for Bvh {
    fn default() -> Self {
        Self::empty()
    }
}

impl Bvh {
    pub fn empty() -> Bvh {
        Bvh {
            nodes: Vec::new(),
            prim_indices: Vec::new(),
            build_order: Vec::new(),
        }
    }

    /// Binned SAH build over `aabbs` with default settings. Primitive `i` is
    /// `aabbs[i]`.
    pub fn construct(aabbs: &[Aabb]) -> Result<Self> {
        Self::construct_with(aabbs, BuildQuality::High, &BuildConfig::default())
    }

    pub fn construct_with(
        aabbs: &[Aabb],
        quality: BuildQuality,
        config: &BuildConfig,
    ) -> Result<Self> {
        let refs = PrimitiveRef::from_aabbs(aabbs)?;
        build_with_quality(&refs, quality, config)
    }

    /// Reassembles a tree from its stored parts.
    ///
    /// Child indices and leaf ranges are checked against the array sizes. An
    /// empty `build_order` is accepted; such a tree can be traversed but not
    /// refit.
    pub fn from_parts(
        nodes: Vec<BvhNode>,
        prim_indices: Vec<u32>,
        build_order: Vec<u32>,
    ) -> Result<Self> {
        let bvh = Bvh {
            nodes,
            prim_indices,
            build_order,
        };
        bvh.check_references()?;
        bvh.pre_order()?;
        Ok(bvh)
    }

    pub fn prim_count(&self) -> usize {
        self.prim_indices.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn root(&self) -> Option<&BvhNode> {
        self.nodes.first()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Number of levels, root included. Zero for an empty tree.
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }

        let mut depth = 0;
        let mut stack = vec![(0_usize, 1_usize)];
        while let Some((index, level)) = stack.pop() {
            depth = depth.max(level);
            if let Some((left, right)) = self.nodes[index].children() {
                stack.push((left, level + 1));
                stack.push((right, level + 1));
            }
        }
        depth
    }

    /// Refits against new boxes, `aabbs[i]` being the box of primitive `i`.
    pub fn refit(&mut self, aabbs: &[Aabb]) -> Result<()> {
        crate::refit::refit(
            &mut self.nodes,
            &self.prim_indices,
            &self.build_order,
            |i| {
                aabbs.get(i).copied().ok_or(Error::IndexOutOfRange {
                    index: i,
                    len: aabbs.len(),
                })
            },
        )
    }

    /// Refits with boxes computed on demand by `box_of(primitive_index)`.
    pub fn refit_with<F>(&mut self, mut box_of: F) -> Result<()>
    where
        F: FnMut(usize) -> Aabb,
    {
        crate::refit::refit(
            &mut self.nodes,
            &self.prim_indices,
            &self.build_order,
            |i| Ok(box_of(i)),
        )
    }

    #[inline(always)]
    pub fn traverse_closest<F, P>(&self, ray: &Ray, test: F) -> Option<Hit<P>>
    where
        F: FnMut(&Ray, usize) -> Option<(f32, P)>,
    {
        traverse_closest(&self.nodes, &self.prim_indices, ray, test)
    }

    #[inline(always)]
    pub fn occludes<F, P>(&self, ray: &Ray, test: F) -> bool
    where
        F: FnMut(&Ray, usize) -> Option<(f32, P)>,
    {
        traverse_any(&self.nodes, &self.prim_indices, ray, test)
    }

    pub fn traverse_all<F, P>(&self, ray: &Ray, test: F) -> AllHits<'_, F, P>
    where
        F: FnMut(&Ray, usize) -> Option<(f32, P)>,
    {
        traverse_all(&self.nodes, &self.prim_indices, ray, test)
    }

    /// Checks the tree against the primitive boxes it was built from.
    ///
    /// Every node must be reachable from the root exactly once, leaves must
    /// cover a permutation of `0..aabbs.len()`, and every node box must equal
    /// the union of the boxes below it.
    pub fn validate(&self, aabbs: &[Aabb]) -> Result<()> {
        self.check_references()?;
        if self.nodes.is_empty() {
            return if aabbs.is_empty() && self.prim_indices.is_empty() {
                Ok(())
            } else {
                Err(Error::InvalidTopology(
                    "empty tree over a non-empty primitive set".to_string(),
                ))
            };
        }

        if self.prim_indices.len() != aabbs.len() {
            return Err(Error::InvalidTopology(format!(
                "{} primitive indices for {} primitives",
                self.prim_indices.len(),
                aabbs.len()
            )));
        }
        let mut seen = vec![false; aabbs.len()];
        for &prim in &self.prim_indices {
            let prim = prim as usize;
            match seen.get_mut(prim) {
                None => {
                    return Err(Error::IndexOutOfRange {
                        index: prim,
                        len: aabbs.len(),
                    })
                }
                Some(true) => {
                    return Err(Error::InvalidTopology(format!(
                        "primitive {} is referenced twice",
                        prim
                    )))
                }
                Some(s) => *s = true,
            }
        }

        let order = self.pre_order()?;
        let mut covered = vec![false; self.prim_indices.len()];
        for &index in &order {
            for slot in self.leaf_range(index) {
                if covered[slot] {
                    return Err(Error::InvalidTopology(format!(
                        "index slot {} is covered by more than one leaf",
                        slot
                    )));
                }
                covered[slot] = true;
            }
        }
        if let Some(slot) = covered.iter().position(|c| !c) {
            return Err(Error::InvalidTopology(format!(
                "index slot {} is not covered by any leaf",
                slot
            )));
        }

        let mut expected = vec![Aabb::empty(); self.nodes.len()];
        for &index in order.iter().rev() {
            let bounds = match self.nodes[index].kind {
                NodeKind::Internal { left, right } => {
                    expected[left as usize].union_of(&expected[right as usize])
                }
                NodeKind::Leaf { .. } => self
                    .leaf_range(index)
                    .fold(Aabb::empty(), |acc, slot| {
                        acc.union_of(&aabbs[self.prim_indices[slot] as usize])
                    }),
            };
            if self.nodes[index].bounds != bounds {
                return Err(Error::InvalidTopology(format!(
                    "node {} has bounds {}, its subtree spans {}",
                    index, self.nodes[index].bounds, bounds
                )));
            }
            expected[index] = bounds;
        }

        Ok(())
    }

    /// Depth-first pre-order of the nodes. Fails unless every node is
    /// reachable from the root exactly once.
    fn pre_order(&self) -> Result<Vec<usize>> {
        if self.nodes.is_empty() {
            return Ok(Vec::new());
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![0_usize];
        while let Some(index) = stack.pop() {
            if visited[index] {
                return Err(Error::InvalidTopology(format!(
                    "node {} is reachable more than once",
                    index
                )));
            }
            visited[index] = true;
            order.push(index);
            if let Some((left, right)) = self.nodes[index].children() {
                stack.push(right);
                stack.push(left);
            }
        }
        if let Some(index) = visited.iter().position(|v| !v) {
            return Err(Error::InvalidTopology(format!(
                "node {} is unreachable from the root",
                index
            )));
        }
        Ok(order)
    }

    fn leaf_range(&self, index: usize) -> std::ops::Range<usize> {
        self.nodes[index].prim_range().unwrap_or(0..0)
    }

    /// Child indices, leaf ranges and build order entries must lie inside the
    /// arrays they address.
    fn check_references(&self) -> Result<()> {
        let node_count = self.nodes.len();
        for (i, node) in self.nodes.iter().enumerate() {
            match node.kind {
                NodeKind::Internal { left, right } => {
                    for child in [left, right] {
                        if child as usize >= node_count || child as usize == i {
                            return Err(Error::InvalidTopology(format!(
                                "node {} references child {} of {}",
                                i, child, node_count
                            )));
                        }
                    }
                }
                NodeKind::Leaf { first, count } => {
                    let end = first as u64 + count as u64;
                    if count == 0 || end > self.prim_indices.len() as u64 {
                        return Err(Error::InvalidTopology(format!(
                            "leaf {} covers [{}, {}) of {} primitive indices",
                            i,
                            first,
                            end,
                            self.prim_indices.len()
                        )));
                    }
                }
            }
        }

        if !self.build_order.is_empty() {
            if self.build_order.len() != node_count {
                return Err(Error::InvalidTopology(format!(
                    "build order lists {} nodes, tree has {}",
                    self.build_order.len(),
                    node_count
                )));
            }
            if let Some(&i) = self.build_order.iter().find(|&&i| i as usize >= node_count) {
                return Err(Error::InvalidTopology(format!(
                    "build order references node {} of {}",
                    i, node_count
                )));
            }
        }
        Ok(())
    }
}

impl Bounds for Bvh {
    fn bounds(&self) -> Aabb {
        self.root().map_or_else(Aabb::empty, |root| root.bounds)
    }
}
