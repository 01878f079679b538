use crossbeam::thread::Scope;
use log::debug;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::build::{check_cancelled, check_input, finish, reserved_len};
use crate::{Aabb, Builder, BuildConfig, Bvh, BvhNode, CostModel, PrimitiveRef, Result, SahCost};

/// Top-down builder that picks splits with a binned surface area heuristic.
///
/// Subtrees above `parallel_threshold` primitives are forked onto scoped
/// threads. Every subtree owns a disjoint slice of the primitive references and
/// a pre-reserved node region, so threads never share writable memory and the
/// resulting tree does not depend on how many threads took part.
pub struct BinnedSahBuilder<C: CostModel = SahCost> {
    config: BuildConfig,
    cost: C,
    cancel: Option<Arc<AtomicBool>>,
}

/// A contiguous primitive range and the node region reserved for its subtree.
struct Task<'a> {
    refs: &'a mut [PrimitiveRef],
    /// Offset of `refs[0]` in the full reference array.
    first: usize,
    /// `nodes[0]` is the subtree root.
    nodes: &'a mut [BvhNode],
    /// Global index of `nodes[0]`.
    base: usize,
    depth: usize,
}

struct BuildContext {
    threads: AtomicUsize,
    max_threads: usize,
}

impl BuildContext {
    fn try_acquire_thread(&self) -> bool {
        self.threads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < self.max_threads {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    fn release_thread(&self) {
        self.threads.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Copy, Clone, Default)]
struct Bin {
    bounds: Aabb,
    count: usize,
}

/// Chosen split: centroids whose bin on `axis` is below `boundary` go left.
#[derive(Debug, Copy, Clone)]
struct Split {
    axis: usize,
    boundary: usize,
    min: f32,
    scale: f32,
    cost: f32,
}

#[inline]
fn bin_index(centroid: f32, min: f32, scale: f32, bins: usize) -> usize {
    (((centroid - min) * scale) as usize).min(bins - 1)
}

impl BinnedSahBuilder<SahCost> {
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config: config.sanitized(),
            cost: SahCost::default(),
            cancel: None,
        }
    }
}

impl<C: CostModel> BinnedSahBuilder<C> {
    pub fn with_cost<D: CostModel>(self, cost: D) -> BinnedSahBuilder<D> {
        BinnedSahBuilder {
            config: self.config,
            cost,
            cancel: self.cancel,
        }
    }

    /// Stops the build with [`crate::Error::Cancelled`] once `flag` is set.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    fn subdivide<'env>(
        &'env self,
        task: Task<'env>,
        ctx: &'env BuildContext,
        scope: &Scope<'env>,
    ) -> Result<()> {
        check_cancelled(&self.cancel)?;

        let Task {
            refs,
            first,
            nodes,
            base,
            depth,
        } = task;
        let count = refs.len();
        let bounds = refs
            .iter()
            .fold(Aabb::empty(), |acc, r| acc.union_of(&r.bounds));

        let split = if count <= self.config.min_leaf_size || depth + 1 >= self.config.max_depth {
            None
        } else {
            self.find_split(refs, &bounds).filter(|split| {
                count > self.config.max_leaf_size
                    || split.cost < self.cost.intersection_cost(count)
            })
        };

        let split = match split {
            Some(split) => split,
            None => {
                nodes[0] = BvhNode::leaf(bounds, first as u32, count as u32);
                return Ok(());
            }
        };

        let left_count = self.partition(refs, &split);
        let (left_refs, right_refs) = refs.split_at_mut(left_count);
        let (root, rest) = nodes.split_at_mut(1);
        let (left_nodes, right_nodes) = rest.split_at_mut(reserved_len(left_count));

        let left_base = base + 1;
        let right_base = base + 1 + reserved_len(left_count);
        root[0] = BvhNode::internal(bounds, left_base as u32, right_base as u32);

        let left = Task {
            refs: left_refs,
            first,
            nodes: left_nodes,
            base: left_base,
            depth: depth + 1,
        };
        let right = Task {
            refs: right_refs,
            first: first + left_count,
            nodes: right_nodes,
            base: right_base,
            depth: depth + 1,
        };

        if count > self.config.parallel_threshold && ctx.try_acquire_thread() {
            let handle = scope.spawn(move |s| self.subdivide(left, ctx, s));
            let right_result = self.subdivide(right, ctx, scope);
            let left_result = handle
                .join()
                .unwrap_or_else(|e| std::panic::resume_unwind(e));
            ctx.release_thread();
            left_result?;
            right_result
        } else {
            self.subdivide(left, ctx, scope)?;
            self.subdivide(right, ctx, scope)
        }
    }

    /// Cheapest split over all axes and bin boundaries. Axes are scanned x, y, z
    /// and boundaries left to right; only a strictly cheaper candidate replaces
    /// the current best, so the first of equal candidates wins.
    fn find_split(&self, refs: &[PrimitiveRef], bounds: &Aabb) -> Option<Split> {
        let bins = self.config.bins;
        let centroid_bounds = refs
            .iter()
            .fold(Aabb::empty(), |acc, r| acc.extended(r.centroid()));

        // Flat parents have zero area; compare perimeters instead so the
        // child/parent ratios stay finite.
        let measure: fn(&Aabb) -> f32 = if bounds.surface_area() > 0.0 {
            Aabb::surface_area
        } else {
            Aabb::half_perimeter
        };
        let parent = measure(bounds);
        if !(parent > 0.0) {
            return None;
        }
        let inv_parent = 1.0 / parent;
        let traversal = self.cost.traversal_cost();

        let mut best: Option<Split> = None;
        let mut bin_data: SmallVec<[Bin; 32]> = SmallVec::from_elem(Bin::default(), bins);
        let mut right_measure: SmallVec<[f32; 32]> = SmallVec::from_elem(0.0, bins);
        let mut right_count: SmallVec<[usize; 32]> = SmallVec::from_elem(0, bins);

        for axis in 0..3 {
            let min = centroid_bounds.min[axis];
            let extent = centroid_bounds.extent(axis);
            if !(extent > 0.0) {
                continue;
            }
            let scale = bins as f32 / extent;

            bin_data.iter_mut().for_each(|bin| *bin = Bin::default());
            for r in refs {
                let bin = &mut bin_data[bin_index(r.centroid[axis], min, scale, bins)];
                bin.bounds.grow_bb(&r.bounds);
                bin.count += 1;
            }

            // right_*[i] describe bins i..bins
            let mut acc = Aabb::empty();
            let mut n = 0;
            for i in (1..bins).rev() {
                acc.grow_bb(&bin_data[i].bounds);
                n += bin_data[i].count;
                right_measure[i] = measure(&acc);
                right_count[i] = n;
            }

            let mut acc = Aabb::empty();
            let mut n = 0;
            for i in 1..bins {
                acc.grow_bb(&bin_data[i - 1].bounds);
                n += bin_data[i - 1].count;
                if n == 0 || right_count[i] == 0 {
                    continue;
                }

                let cost = traversal
                    + measure(&acc) * inv_parent * self.cost.intersection_cost(n)
                    + right_measure[i] * inv_parent * self.cost.intersection_cost(right_count[i]);

                if best.map_or(true, |b| cost < b.cost) {
                    best = Some(Split {
                        axis,
                        boundary: i,
                        min,
                        scale,
                        cost,
                    });
                }
            }
        }

        best
    }

    /// In-place partition around `split`, returns the size of the left part.
    fn partition(&self, refs: &mut [PrimitiveRef], split: &Split) -> usize {
        let bins = self.config.bins;
        let mut left_count = 0;
        for i in 0..refs.len() {
            let centroid = refs[i].centroid[split.axis];
            if bin_index(centroid, split.min, split.scale, bins) < split.boundary {
                refs.swap(i, left_count);
                left_count += 1;
            }
        }
        left_count
    }
}

impl<C: CostModel> Builder for BinnedSahBuilder<C> {
    fn build(&self, primitives: &[PrimitiveRef]) -> Result<Bvh> {
        check_input(primitives)?;
        let instant = std::time::Instant::now();

        let mut refs = primitives.to_vec();
        let mut reserved = vec![BvhNode::default(); reserved_len(refs.len())];
        let ctx = BuildContext {
            threads: AtomicUsize::new(1),
            max_threads: self.config.max_threads,
        };

        let task = Task {
            refs: refs.as_mut_slice(),
            first: 0,
            nodes: reserved.as_mut_slice(),
            base: 0,
            depth: 0,
        };
        crossbeam::scope(|s| self.subdivide(task, &ctx, s))
            .unwrap_or_else(|e| std::panic::resume_unwind(e))?;

        let bvh = finish(&reserved, &refs);
        debug!(
            "binned SAH build: {} primitives -> {} nodes in {} ms",
            primitives.len(),
            bvh.nodes.len(),
            instant.elapsed().as_millis()
        );
        Ok(bvh)
    }
}
