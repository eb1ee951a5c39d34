//! Range query engine.
//!
//! Exact mode walks every node whose rectangle intersects the query and
//! filters leaf coordinates point by point. Level-of-detail mode spends a
//! point budget top-down: a node either answers with its own points inside
//! the query, with its precomputed representatives, or hands parts of its
//! budget to its children.
//!
//! # Budget split
//!
//! At node N with budget b, let c be N's points inside the query and r its
//! representatives inside the query:
//! - c <= b: read N's subtree exactly
//! - N is a leaf, or r >= b: answer with the r representatives
//! - otherwise N's representatives are grouped by the child they came from
//!   (p_j for child j). Children with points inside the query are considered
//!   in descending in-query count c_j (ties by child order). Child j is
//!   expanded when the unspent budget covers the growth from p_j to its own
//!   r_j representatives. The budget left after that is split among
//!   expanded children proportionally to c_j (largest remainder), never
//!   past c_j; what a capped child cannot use goes to the others.
//!   Unexpanded children keep their p_j.
//!
//! In-query counts come from stored subtree counts where the query covers a
//! node, and from the leaf coordinate pages along its border.
//!
//! Every visit returns at most max(b, r) points, so a query with budget B
//! returns at most max(B, root representatives in the query), and a budget
//! covering every point in the query returns exactly those points.

use std::collections::HashMap;
use std::sync::Arc;

use super::node_storage::NodeStorage;
use super::page_cache::PageCache;
use super::page_store::{CoordinatePage, PointReader};
use super::tree_types::{ChildRef, Node, NodeId};
use crate::errors::MzTreeResult;
use crate::point::{MsPoint, PointId, PointRange};
use crate::rect::Rect;

/// A point located by the traversal before its payload is attached.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Hit {
    id: PointId,
    mz: f64,
    rt: f32,
}

/// Everything a traversal reads through. The reader's shared lock is held
/// for the whole query, so labels are read from one consistent state.
pub(crate) struct QueryEngine<'a> {
    storage: &'a NodeStorage,
    cache: &'a PageCache,
    reader: &'a PointReader<'a>,
}

impl<'a> QueryEngine<'a> {
    pub fn new(storage: &'a NodeStorage, cache: &'a PageCache, reader: &'a PointReader<'a>) -> Self {
        Self {
            storage,
            cache,
            reader,
        }
    }

    fn node(&self, id: NodeId) -> MzTreeResult<Arc<Node>> {
        self.cache.node(id, || self.storage.read_node(id))
    }

    fn leaf_coordinates(&self, id: NodeId, range: PointRange) -> MzTreeResult<Arc<CoordinatePage>> {
        self.cache
            .coordinates(id, || self.reader.read_coordinates(range))
    }

    fn materialize(&self, hits: Vec<Hit>) -> MzTreeResult<Vec<MsPoint>> {
        hits.into_iter()
            .map(|hit| {
                let (intensity, label) = self.reader.payload(hit.id)?;
                Ok(MsPoint {
                    id: hit.id,
                    mz: hit.mz,
                    rt: hit.rt,
                    intensity,
                    label,
                })
            })
            .collect()
    }

    /// Every point inside `rect`.
    pub fn exact(&self, root: NodeId, rect: &Rect) -> MzTreeResult<Vec<MsPoint>> {
        let mut hits = Vec::new();
        self.collect_exact(root, rect, &mut |hit| {
            hits.push(hit);
            Ok(())
        })?;
        self.materialize(hits)
    }

    /// Streams every point inside `rect` to `sink` without collecting them.
    pub fn for_each_exact<F>(&self, root: NodeId, rect: &Rect, mut sink: F) -> MzTreeResult<u64>
    where
        F: FnMut(MsPoint) -> MzTreeResult<()>,
    {
        let mut count = 0u64;
        self.collect_exact(root, rect, &mut |hit| {
            let (intensity, label) = self.reader.payload(hit.id)?;
            count += 1;
            sink(MsPoint {
                id: hit.id,
                mz: hit.mz,
                rt: hit.rt,
                intensity,
                label,
            })
        })?;
        Ok(count)
    }

    /// Number of points inside `rect`, reading only coordinates.
    pub fn count(&self, root: NodeId, rect: &Rect) -> MzTreeResult<u64> {
        let mut count = 0u64;
        self.collect_exact(root, rect, &mut |_| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    fn collect_exact(
        &self,
        start: NodeId,
        rect: &Rect,
        sink: &mut dyn FnMut(Hit) -> MzTreeResult<()>,
    ) -> MzTreeResult<()> {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let node = self.node(id)?;
            if !node.bbox.intersects(rect) {
                continue;
            }
            match node.range() {
                Some(range) => {
                    let page = self.leaf_coordinates(id, range)?;
                    let whole = rect.contains(&node.bbox);
                    for (pid, mz, rt) in page.iter() {
                        if whole || rect.contains_point(mz, rt) {
                            sink(Hit { id: pid, mz, rt })?;
                        }
                    }
                }
                None => {
                    // reversed so children are visited in stored order
                    stack.extend(
                        node.children()
                            .iter()
                            .rev()
                            .filter(|child| child.bbox.intersects(rect))
                            .map(|child| child.node_id),
                    );
                }
            }
        }
        Ok(())
    }

    /// At most max(`budget`, root representatives in `rect`) points inside
    /// `rect`, drawn from precomputed representatives and exact reads.
    pub fn level_of_detail(&self, root: NodeId, rect: &Rect, budget: u64) -> MzTreeResult<Vec<MsPoint>> {
        let node = self.node(root)?;
        let mut counts = HashMap::new();
        let mut hits = Vec::new();
        let in_window = self.window_count(&node.as_child(root), rect, &mut counts)?;
        if in_window > 0 {
            self.visit(root, &node, rect, budget, in_window, &mut counts, &mut hits)?;
        }
        self.materialize(hits)
    }

    /// Points under `child` inside `rect`. Covered subtrees answer from their
    /// stored counts, so only border leaves are read.
    fn window_count(&self, child: &ChildRef, rect: &Rect, counts: &mut HashMap<NodeId, u64>) -> MzTreeResult<u64> {
        if !child.bbox.intersects(rect) {
            return Ok(0);
        }
        if rect.contains(&child.bbox) {
            return Ok(child.point_count);
        }
        if let Some(&count) = counts.get(&child.node_id) {
            return Ok(count);
        }

        let node = self.node(child.node_id)?;
        let count = match node.range() {
            Some(range) => self
                .leaf_coordinates(child.node_id, range)?
                .iter()
                .filter(|&(_, mz, rt)| rect.contains_point(mz, rt))
                .count() as u64,
            None => {
                let mut total = 0;
                for grandchild in node.children() {
                    total += self.window_count(grandchild, rect, counts)?;
                }
                total
            }
        };
        counts.insert(child.node_id, count);
        Ok(count)
    }

    #[allow(clippy::too_many_arguments)]
    fn visit(
        &self,
        id: NodeId,
        node: &Node,
        rect: &Rect,
        budget: u64,
        in_window: u64,
        counts: &mut HashMap<NodeId, u64>,
        out: &mut Vec<Hit>,
    ) -> MzTreeResult<()> {
        if in_window <= budget {
            return self.collect_exact(id, rect, &mut |hit| {
                out.push(hit);
                Ok(())
            });
        }

        let own: Vec<_> = node.representatives_in(rect).collect();
        if node.is_leaf() || own.len() as u64 >= budget {
            out.extend(own.iter().map(|rep| Hit {
                id: rep.id,
                mz: rep.mz,
                rt: rep.rt,
            }));
            return Ok(());
        }

        let children = node.children();
        let mut inherited: Vec<Vec<Hit>> = vec![Vec::new(); children.len()];
        for rep in &own {
            if let Some(slot) = inherited.get_mut(rep.child as usize) {
                slot.push(Hit {
                    id: rep.id,
                    mz: rep.mz,
                    rt: rep.rt,
                });
            }
        }

        let mut candidates = Vec::new();
        for (index, child) in children.iter().enumerate() {
            let count = self.window_count(child, rect, counts)?;
            if count > 0 {
                candidates.push((index, count));
            }
        }
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut slack = budget - own.len() as u64;
        let mut expanded: Vec<Expansion> = Vec::new();
        for (index, count) in candidates {
            let child = self.node(children[index].node_id)?;
            let reps = child.representatives_in(rect).count() as u64;
            let growth = reps.saturating_sub(inherited[index].len() as u64);
            if growth <= slack {
                slack -= growth;
                expanded.push(Expansion {
                    index,
                    count,
                    budget: reps,
                    node: child,
                });
            }
        }

        distribute(&mut expanded, slack);

        for (index, hits) in inherited.into_iter().enumerate() {
            if !expanded.iter().any(|e| e.index == index) {
                out.extend(hits);
            }
        }
        for expansion in &expanded {
            self.visit(
                children[expansion.index].node_id,
                &expansion.node,
                rect,
                expansion.budget,
                expansion.count,
                counts,
                out,
            )?;
        }
        Ok(())
    }
}

struct Expansion {
    index: usize,
    /// Points of the child inside the query
    count: u64,
    budget: u64,
    node: Arc<Node>,
}

/// Adds `slack` to the expansions' budgets proportionally to their in-query
/// counts using largest remainders, ties to the earlier child. No budget
/// grows past its count; the excess is split again among the rest.
fn distribute(expanded: &mut [Expansion], mut slack: u64) {
    let mut open: Vec<usize> = (0..expanded.len())
        .filter(|&i| expanded[i].budget < expanded[i].count)
        .collect();

    while slack > 0 && !open.is_empty() {
        let total: u64 = open.iter().map(|&i| expanded[i].count).sum();
        let mut shares = Vec::with_capacity(open.len());
        let mut remainders = Vec::with_capacity(open.len());
        let mut assigned = 0u64;
        for (slot, &i) in open.iter().enumerate() {
            let quota = slack as f64 * expanded[i].count as f64 / total as f64;
            let whole = (quota.floor() as u64).min(slack - assigned);
            shares.push(whole);
            assigned += whole;
            remainders.push((slot, quota - quota.floor(), expanded[i].index));
        }

        remainders.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.2.cmp(&b.2)));
        let mut left = slack - assigned;
        for (slot, _, _) in remainders {
            if left == 0 {
                break;
            }
            shares[slot] += 1;
            left -= 1;
        }

        let mut returned = left;
        for (slot, &i) in open.iter().enumerate() {
            let room = expanded[i].count - expanded[i].budget;
            let given = shares[slot].min(room);
            expanded[i].budget += given;
            returned += shares[slot] - given;
        }
        slack = returned;
        open.retain(|&i| expanded[i].budget < expanded[i].count);
    }
}
