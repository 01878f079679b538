//! Stack based depth-first traversal over a flat node array.
//!
//! All three queries share the same walk: pop a node, skip it if its entry
//! distance lies beyond the current interval, test every primitive of a leaf,
//! and push the children of an internal node far-first so the nearer child is
//! popped next. Primitive/ray intersection is delegated to a host closure
//! `test(&ray, primitive_index) -> Option<(distance, payload)>`.

use smallvec::SmallVec;
use std::iter::FusedIterator;
use std::ops::Range;

use crate::{BvhNode, NodeKind, Ray};

/// Inline capacity of the traversal stack. Deeper trees spill to the heap.
pub const STACK_SIZE: usize = 64;

type Stack = SmallVec<[(u32, f32); STACK_SIZE]>;

/// A primitive intersection reported by a traversal.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Hit<P> {
    pub distance: f32,
    pub primitive: usize,
    pub payload: P,
}

fn push_root(tree: &[BvhNode], ray: &Ray, stack: &mut Stack) {
    if let Some(root) = tree.first() {
        if let Some((entry, _)) = root.bounds.intersect(ray) {
            stack.push((0, entry));
        }
    }
}

/// Pushes the children of an internal node that `ray` enters, nearer child last.
fn push_children(tree: &[BvhNode], ray: &Ray, left: u32, right: u32, stack: &mut Stack) {
    let hit_left = tree[left as usize].bounds.intersect(ray);
    let hit_right = tree[right as usize].bounds.intersect(ray);

    match (hit_left, hit_right) {
        (Some((t_left, _)), Some((t_right, _))) => {
            if t_right < t_left {
                stack.push((left, t_left));
                stack.push((right, t_right));
            } else {
                stack.push((right, t_right));
                stack.push((left, t_left));
            }
        }
        (Some((t_left, _)), None) => stack.push((left, t_left)),
        (None, Some((t_right, _))) => stack.push((right, t_right)),
        (None, None) => {}
    }
}

/// Closest hit within `[ray.t_min, ray.t_max]`.
///
/// The ray handed to `test` has its `t_max` narrowed to the closest hit so far.
/// A reported distance outside the interval is ignored, as is one that does not
/// strictly improve on the current closest hit.
pub fn traverse_closest<F, P>(
    tree: &[BvhNode],
    prim_indices: &[u32],
    ray: &Ray,
    mut test: F,
) -> Option<Hit<P>>
where
    F: FnMut(&Ray, usize) -> Option<(f32, P)>,
{
    let mut ray = *ray;
    let mut closest: Option<Hit<P>> = None;
    let mut stack = Stack::new();
    push_root(tree, &ray, &mut stack);

    while let Some((index, entry)) = stack.pop() {
        if entry > ray.t_max {
            continue;
        }

        let node = &tree[index as usize];
        match node.kind {
            NodeKind::Leaf { first, count } => {
                let range = first as usize..first as usize + count as usize;
                for &prim_id in &prim_indices[range] {
                    if let Some((t, payload)) = test(&ray, prim_id as usize) {
                        let closer = closest.as_ref().map_or(true, |c| t < c.distance);
                        if closer && ray.contains(t) {
                            ray.t_max = t;
                            closest = Some(Hit {
                                distance: t,
                                primitive: prim_id as usize,
                                payload,
                            });
                        }
                    }
                }
            }
            NodeKind::Internal { left, right } => {
                push_children(tree, &ray, left, right, &mut stack);
            }
        }
    }

    closest
}

/// Returns `true` as soon as any primitive reports a hit within the ray interval.
pub fn traverse_any<F, P>(tree: &[BvhNode], prim_indices: &[u32], ray: &Ray, mut test: F) -> bool
where
    F: FnMut(&Ray, usize) -> Option<(f32, P)>,
{
    let mut stack = Stack::new();
    push_root(tree, ray, &mut stack);

    while let Some((index, _)) = stack.pop() {
        let node = &tree[index as usize];
        match node.kind {
            NodeKind::Leaf { first, count } => {
                let range = first as usize..first as usize + count as usize;
                for &prim_id in &prim_indices[range] {
                    if let Some((t, _)) = test(ray, prim_id as usize) {
                        if ray.contains(t) {
                            return true;
                        }
                    }
                }
            }
            NodeKind::Internal { left, right } => {
                push_children(tree, ray, left, right, &mut stack);
            }
        }
    }

    false
}

/// Lazy sequence of every hit within `[ray.t_min, ray.t_max]`, see [`AllHits`].
pub fn traverse_all<'a, F, P>(
    tree: &'a [BvhNode],
    prim_indices: &'a [u32],
    ray: &Ray,
    test: F,
) -> AllHits<'a, F, P>
where
    F: FnMut(&Ray, usize) -> Option<(f32, P)>,
{
    AllHits::new(tree, prim_indices, *ray, test)
}

/// Every hit within the ray interval, produced lazily in traversal order.
///
/// Hits are not sorted by distance. The sequence is finite: each primitive
/// reachable by the ray is tested at most once per pass. [`AllHits::restart`]
/// begins a fresh pass over the same tree.
pub struct AllHits<'a, F, P> {
    tree: &'a [BvhNode],
    prim_indices: &'a [u32],
    ray: Ray,
    test: F,
    stack: Stack,
    leaf: Range<usize>,
    _payload: std::marker::PhantomData<fn() -> P>,
}

impl<'a, F, P> AllHits<'a, F, P>
where
    F: FnMut(&Ray, usize) -> Option<(f32, P)>,
{
    pub fn new(tree: &'a [BvhNode], prim_indices: &'a [u32], ray: Ray, test: F) -> Self {
        let mut hits = Self {
            tree,
            prim_indices,
            ray,
            test,
            stack: Stack::new(),
            leaf: 0..0,
            _payload: std::marker::PhantomData,
        };
        hits.restart();
        hits
    }

    pub fn restart(&mut self) {
        self.stack.clear();
        self.leaf = 0..0;
        push_root(self.tree, &self.ray, &mut self.stack);
    }

    pub fn ray(&self) -> &Ray {
        &self.ray
    }
}

impl<'a, F, P> Iterator for AllHits<'a, F, P>
where
    F: FnMut(&Ray, usize) -> Option<(f32, P)>,
{
    type Item = Hit<P>;

    fn next(&mut self) -> Option<Hit<P>> {
        loop {
            while let Some(i) = self.leaf.next() {
                let prim_id = self.prim_indices[i] as usize;
                if let Some((t, payload)) = (self.test)(&self.ray, prim_id) {
                    if self.ray.contains(t) {
                        return Some(Hit {
                            distance: t,
                            primitive: prim_id,
                            payload,
                        });
                    }
                }
            }

            let (index, _) = self.stack.pop()?;
            match self.tree[index as usize].kind {
                NodeKind::Leaf { first, count } => {
                    self.leaf = first as usize..first as usize + count as usize;
                }
                NodeKind::Internal { left, right } => {
                    push_children(self.tree, &self.ray, left, right, &mut self.stack);
                }
            }
        }
    }
}

impl<'a, F, P> FusedIterator for AllHits<'a, F, P> where F: FnMut(&Ray, usize) -> Option<(f32, P)> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Aabb;
    use glam::Vec3;

    fn slab(x: f32) -> Aabb {
        Aabb::new(Vec3::new(x, -1.0, -1.0), Vec3::new(x + 0.5, 1.0, 1.0))
    }

    /// Hand made tree: root -> (leaf {0, 1}, internal -> (leaf {2}, leaf {3}))
    fn fixture() -> (Vec<BvhNode>, Vec<u32>, Vec<Aabb>) {
        let boxes = vec![slab(0.0), slab(2.0), slab(4.0), slab(6.0)];
        let prim_indices = vec![1, 0, 2, 3];
        let all = boxes.iter().fold(Aabb::empty(), |acc, b| acc.union_of(b));
        let near = boxes[0].union_of(&boxes[1]);
        let far = boxes[2].union_of(&boxes[3]);
        let nodes = vec![
            BvhNode::internal(all, 1, 2),
            BvhNode::leaf(near, 0, 2),
            BvhNode::internal(far, 3, 4),
            BvhNode::leaf(boxes[2], 2, 1),
            BvhNode::leaf(boxes[3], 3, 1),
        ];
        (nodes, prim_indices, boxes)
    }

    fn box_test<'a>(boxes: &'a [Aabb]) -> impl FnMut(&Ray, usize) -> Option<(f32, ())> + 'a {
        move |ray, prim| boxes[prim].intersect(ray).map(|(t, _)| (t, ()))
    }

    #[test]
    fn closest_hit_from_both_sides() {
        let (nodes, prim_indices, boxes) = fixture();

        let ray = Ray::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::X, 0.0, 100.0);
        let hit = traverse_closest(&nodes, &prim_indices, &ray, box_test(&boxes)).unwrap();
        assert_eq!(hit.primitive, 0);
        assert_eq!(hit.distance, 1.0);

        let back = Ray::new(Vec3::new(10.0, 0.0, 0.0), -Vec3::X, 0.0, 100.0);
        let hit = traverse_closest(&nodes, &prim_indices, &back, box_test(&boxes)).unwrap();
        assert_eq!(hit.primitive, 3);
        assert_eq!(hit.distance, 3.5);
    }

    #[test]
    fn closest_hit_respects_interval() {
        let (nodes, prim_indices, boxes) = fixture();
        let ray = Ray::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::X, 2.0, 5.5);
        let hit = traverse_closest(&nodes, &prim_indices, &ray, box_test(&boxes)).unwrap();
        // Primitive 0 spans t = [1, 1.5] and lies before t_min.
        assert_eq!(hit.primitive, 1);

        let short = Ray::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::X, 0.0, 0.5);
        assert!(traverse_closest(&nodes, &prim_indices, &short, box_test(&boxes)).is_none());
    }

    #[test]
    fn test_sees_narrowed_interval() {
        let (nodes, prim_indices, boxes) = fixture();
        let ray = Ray::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::X, 0.0, 100.0);
        let mut seen = Vec::new();
        traverse_closest(&nodes, &prim_indices, &ray, |r: &Ray, prim| {
            seen.push(r.t_max);
            boxes[prim].intersect(r).map(|(t, _)| (t, ()))
        });
        // Primitive 1 (t = 3) is tested first, then primitive 0 under the narrowed bound.
        assert_eq!(seen, vec![100.0, 3.0]);
    }

    #[test]
    fn ties_keep_first_hit() {
        let (nodes, prim_indices, _) = fixture();
        let ray = Ray::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::X, 0.0, 100.0);
        let hit = traverse_closest(&nodes, &prim_indices, &ray, |_: &Ray, prim| Some((5.0, prim)))
            .unwrap();
        // Leaf {1, 0} is visited first and primitive 1 sits first in it.
        assert_eq!(hit.primitive, 1);
        assert_eq!(hit.payload, 1);
    }

    #[test]
    fn occlusion() {
        let (nodes, prim_indices, boxes) = fixture();
        let ray = Ray::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::X, 0.0, 100.0);
        assert!(traverse_any(&nodes, &prim_indices, &ray, box_test(&boxes)));

        let miss = Ray::new(Vec3::new(-1.0, 5.0, 0.0), Vec3::X, 0.0, 100.0);
        assert!(!traverse_any(&nodes, &prim_indices, &miss, box_test(&boxes)));
    }

    #[test]
    fn all_hits_in_traversal_order() {
        let (nodes, prim_indices, boxes) = fixture();
        let ray = Ray::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::X, 0.0, 100.0);
        let mut hits = AllHits::new(&nodes, &prim_indices, ray, box_test(&boxes));
        let order: Vec<usize> = hits.by_ref().map(|h| h.primitive).collect();
        assert_eq!(order, vec![1, 0, 2, 3]);
        assert!(hits.next().is_none());

        hits.restart();
        assert_eq!(hits.count(), 4);
    }

    #[test]
    fn all_hits_is_lazy() {
        let (nodes, prim_indices, boxes) = fixture();
        let ray = Ray::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::X, 0.0, 100.0);
        let mut calls = 0;
        let first = AllHits::new(&nodes, &prim_indices, ray, |r: &Ray, prim| {
            calls += 1;
            boxes[prim].intersect(r).map(|(t, _)| (t, ()))
        })
        .next();
        assert!(first.is_some());
        assert_eq!(calls, 1);
    }

    #[test]
    #[should_panic(expected = "out of range for slice")]
    fn leaf_range_is_widened_before_adding() {
        let bb = slab(0.0);
        let nodes = vec![BvhNode::leaf(bb, u32::MAX, 1)];
        let ray = Ray::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::X, 0.0, 100.0);
        traverse_any(&nodes, &[0], &ray, |_: &Ray, _| Some((1.0, ())));
    }

    #[test]
    fn empty_tree_yields_nothing() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X, 0.0, 100.0);
        let test = |_: &Ray, _: usize| Some((1.0, ()));
        assert!(traverse_closest(&[], &[], &ray, test).is_none());
        assert!(!traverse_any(&[], &[], &ray, test));
        assert_eq!(AllHits::new(&[], &[], ray, test).count(), 0);
    }
}
