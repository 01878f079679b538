use log::trace;

use crate::{Aabb, BvhNode, Error, NodeKind, Result};

/// Recomputes every node box bottom-up without touching the topology.
///
/// `build_order` lists node indices children-before-parents, as recorded by the
/// builders. Leaf boxes are rebuilt from `box_of` over the leaf's slice of
/// `prim_indices`; internal boxes become the union of their children. The tree
/// is left untouched if any step fails.
pub fn refit<F>(
    nodes: &mut [BvhNode],
    prim_indices: &[u32],
    build_order: &[u32],
    mut box_of: F,
) -> Result<()>
where
    F: FnMut(usize) -> Result<Aabb>,
{
    if build_order.is_empty() {
        return Err(Error::InvalidTopology(
            "tree has no recorded build order".to_string(),
        ));
    }
    if build_order.len() != nodes.len() {
        return Err(Error::InvalidTopology(format!(
            "build order lists {} nodes, tree has {}",
            build_order.len(),
            nodes.len()
        )));
    }

    let mut boxes: Vec<Option<Aabb>> = vec![None; nodes.len()];
    for &i in build_order {
        let i = i as usize;
        if i >= nodes.len() {
            return Err(Error::InvalidTopology(format!(
                "build order references node {} of {}",
                i,
                nodes.len()
            )));
        }
        if boxes[i].is_some() {
            return Err(Error::InvalidTopology(format!(
                "node {} appears twice in the build order",
                i
            )));
        }

        let bounds = match nodes[i].kind {
            NodeKind::Leaf { first, count } => {
                let range = first as usize..first as usize + count as usize;
                let slice = prim_indices.get(range).ok_or_else(|| {
                    Error::InvalidTopology(format!(
                        "leaf {} covers [{}, {}) of {} primitive indices",
                        i,
                        first,
                        first as usize + count as usize,
                        prim_indices.len()
                    ))
                })?;
                let mut bounds = Aabb::empty();
                for &prim in slice {
                    bounds.grow_bb(&box_of(prim as usize)?);
                }
                bounds
            }
            NodeKind::Internal { left, right } => {
                let child = |c: u32| -> Result<Aabb> {
                    boxes.get(c as usize).copied().flatten().ok_or_else(|| {
                        Error::InvalidTopology(format!(
                            "node {} is refit before its child {}",
                            i, c
                        ))
                    })
                };
                child(left)?.union_of(&child(right)?)
            }
        };
        boxes[i] = Some(bounds);
    }

    for (node, bounds) in nodes.iter_mut().zip(boxes) {
        if let Some(bounds) = bounds {
            node.bounds = bounds;
        }
    }
    trace!("refit {} nodes", build_order.len());
    Ok(())
}
