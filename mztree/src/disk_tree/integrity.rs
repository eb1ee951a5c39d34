//! Integrity checking of a finished index.
//!
//! The check walks the tree from the root, reading every node straight from
//! the index file so each record's checksum is verified, and validates the
//! structural invariants the query engine relies on:
//! - every child lies within its parent's rectangle
//! - child references agree with the child's own rectangle and count
//! - internal counts equal the sum of their children
//! - leaf ranges lie inside the page store and tile it exactly once
//! - leaf coordinates lie inside the leaf rectangle
//! - representatives lie inside their node and name an existing child

use std::collections::HashSet;

use super::node_storage::NodeStorage;
use super::page_store::PointReader;
use super::tree_types::{ChildRef, FileHeader, Node, NodeId};
use crate::errors::MzTreeResult;
use crate::point::PointRange;

/// Result of an integrity check
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    /// Nodes read and decoded successfully
    pub nodes_checked: u64,
    /// Nodes whose record failed checksum or decoding
    pub corrupted_nodes: Vec<NodeId>,
    /// Nodes present in the node table but unreachable from the root
    pub orphaned_nodes: Vec<NodeId>,
    /// Points covered by the leaves reached
    pub points_covered: u64,
    /// Detailed error messages
    pub errors: Vec<String>,
    pub is_valid: bool,
}

impl IntegrityReport {
    pub fn new() -> Self {
        Self {
            nodes_checked: 0,
            corrupted_nodes: Vec::new(),
            orphaned_nodes: Vec::new(),
            points_covered: 0,
            errors: Vec::new(),
            is_valid: true,
        }
    }

    fn fail(&mut self, message: String) {
        self.errors.push(message);
        self.is_valid = false;
    }
}

impl Default for IntegrityReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks the whole tree. Only I/O on the page store aborts the check;
/// every inconsistency found is recorded in the report.
pub(crate) fn check_tree(
    storage: &NodeStorage,
    header: &FileHeader,
    reader: &PointReader<'_>,
) -> MzTreeResult<IntegrityReport> {
    let mut report = IntegrityReport::new();
    let mut visited = HashSet::new();
    let mut leaf_ranges: Vec<PointRange> = Vec::new();

    // (node id, reference held by the parent)
    let mut stack: Vec<(NodeId, Option<ChildRef>)> = vec![(header.root, None)];
    while let Some((id, parent_ref)) = stack.pop() {
        if !visited.insert(id) {
            report.fail(format!("Node {} is referenced more than once", id));
            continue;
        }
        let node = match storage.read_node(id) {
            Ok(node) => node,
            Err(e) => {
                report.corrupted_nodes.push(id);
                report.fail(format!("Node {}: {}", id, e));
                continue;
            }
        };
        report.nodes_checked += 1;

        if let Some(child_ref) = parent_ref {
            check_reference(&mut report, id, &child_ref, &node);
        } else if node.point_count != header.point_count {
            report.fail(format!(
                "Root holds {} points, header records {}",
                node.point_count, header.point_count
            ));
        }
        check_representatives(&mut report, id, &node);

        match node.range() {
            Some(range) => {
                check_leaf(&mut report, id, &node, range, reader)?;
                leaf_ranges.push(range);
            }
            None => {
                let children = node.children();
                if children.is_empty() {
                    report.fail(format!("Internal node {} has no children", id));
                }
                let sum: u64 = children.iter().map(|c| c.point_count).sum();
                if sum != node.point_count {
                    report.fail(format!(
                        "Node {} holds {} points but its children sum to {}",
                        id, node.point_count, sum
                    ));
                }
                for child in children {
                    if !node.bbox.contains(&child.bbox) && child.point_count > 0 {
                        report.fail(format!(
                            "Child {} of node {} extends beyond its parent",
                            child.node_id, id
                        ));
                    }
                    if child.node_id >= storage.node_count() {
                        report.fail(format!(
                            "Node {} references missing node {}",
                            id, child.node_id
                        ));
                        continue;
                    }
                    stack.push((child.node_id, Some(*child)));
                }
            }
        }
    }

    check_coverage(&mut report, &mut leaf_ranges, reader.len());

    report.orphaned_nodes = (0..storage.node_count())
        .filter(|id| !visited.contains(id))
        .collect();
    if !report.orphaned_nodes.is_empty() {
        report.fail(format!(
            "{} nodes are unreachable from the root",
            report.orphaned_nodes.len()
        ));
    }
    Ok(report)
}

fn check_reference(report: &mut IntegrityReport, id: NodeId, child_ref: &ChildRef, node: &Node) {
    if child_ref.bbox != node.bbox {
        report.fail(format!(
            "Node {} rectangle {:?} differs from its parent's reference {:?}",
            id, node.bbox, child_ref.bbox
        ));
    }
    if child_ref.point_count != node.point_count {
        report.fail(format!(
            "Node {} holds {} points, its parent records {}",
            id, node.point_count, child_ref.point_count
        ));
    }
}

fn check_representatives(report: &mut IntegrityReport, id: NodeId, node: &Node) {
    let children = node.children().len();
    for rep in &node.representatives {
        if !node.bbox.contains_point(rep.mz, rep.rt) {
            report.fail(format!(
                "Representative {} of node {} lies outside the node",
                rep.id, id
            ));
        }
        if !node.is_leaf() && rep.child as usize >= children {
            report.fail(format!(
                "Representative {} of node {} names missing child {}",
                rep.id, id, rep.child
            ));
        }
    }
}

fn check_leaf(
    report: &mut IntegrityReport,
    id: NodeId,
    node: &Node,
    range: PointRange,
    reader: &PointReader<'_>,
) -> MzTreeResult<()> {
    if range.count != node.point_count {
        report.fail(format!(
            "Leaf {} holds {} points but references a range of {}",
            id, node.point_count, range.count
        ));
    }
    if range.end() > reader.len() {
        report.fail(format!(
            "Leaf {} range {}..{} exceeds the {} stored points",
            id,
            range.offset,
            range.end(),
            reader.len()
        ));
        return Ok(());
    }

    let page = reader.read_coordinates(range)?;
    let outside = page
        .iter()
        .filter(|(_, mz, rt)| !node.bbox.contains_point(*mz, *rt))
        .count();
    if outside > 0 {
        report.fail(format!("Leaf {} has {} points outside its rectangle", id, outside));
    }
    report.points_covered += range.count;
    Ok(())
}

fn check_coverage(report: &mut IntegrityReport, ranges: &mut [PointRange], len: u64) {
    ranges.sort_by_key(|r| r.offset);
    let mut next = 0u64;
    for range in ranges.iter().filter(|r| !r.is_empty()) {
        if range.offset != next {
            report.fail(format!(
                "Leaf ranges leave a gap or overlap at point {} (next range starts at {})",
                next, range.offset
            ));
        }
        next = next.max(range.end());
    }
    if next != len {
        report.fail(format!(
            "Leaves cover points up to {}, page store holds {}",
            next, len
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_defaults_to_valid() {
        let report = IntegrityReport::default();
        assert!(report.is_valid);
        assert_eq!(report.nodes_checked, 0);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_fail_marks_invalid() {
        let mut report = IntegrityReport::new();
        report.fail("Node 3: checksum mismatch".into());
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_coverage_detects_gap_and_overlap() {
        let mut report = IntegrityReport::new();
        let mut ranges = vec![PointRange::new(10, 5), PointRange::new(0, 10)];
        check_coverage(&mut report, &mut ranges, 15);
        assert!(report.is_valid);

        let mut ranges = vec![PointRange::new(0, 10), PointRange::new(12, 3)];
        check_coverage(&mut report, &mut ranges, 15);
        assert!(!report.is_valid);

        let mut report = IntegrityReport::new();
        let mut ranges = vec![PointRange::new(0, 10), PointRange::new(8, 7)];
        check_coverage(&mut report, &mut ranges, 15);
        assert!(!report.is_valid);
    }

    #[test]
    fn test_coverage_short_of_store() {
        let mut report = IntegrityReport::new();
        let mut ranges = vec![PointRange::new(0, 10)];
        check_coverage(&mut report, &mut ranges, 11);
        assert!(!report.is_valid);
        assert!(report.errors[0].contains("11"));
    }
}
