//! Core types and data structures for the disk-based index.
//!
//! This module defines:
//! - Node types (Leaf and Internal) and child references
//! - Checksummed node records as stored in the index file
//! - The index file header
//! - Statistics structures

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::tree_constants::{MAGIC, VERSION};
use crate::errors::{MzTreeError, MzTreeResult};
use crate::point::PointRange;
use crate::rect::Rect;
use crate::summarization::{Representative, StrategyKind};

/// Node ID - position of a node record in the index file's node table
pub type NodeId = u64;

// ============================================================================
// Statistics
// ============================================================================

/// Statistics about an open tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeStats {
    pub point_count: u64,
    pub node_count: u64,
    pub leaf_count: u64,
    pub height: u32,
    pub cached_pages: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub disk_reads: u64,
}

impl TreeStats {
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

// ============================================================================
// Node Types
// ============================================================================

/// A child reference in an internal node.
///
/// Carries the child's rectangle and point count so traversal can prune
/// and split budgets without loading the child.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChildRef {
    pub node_id: NodeId,
    pub bbox: Rect,
    pub point_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Leaf node owning a contiguous run of the page store
    Leaf { range: PointRange },
    /// Internal node with ordered child references
    Internal { children: Vec<ChildRef> },
}

/// A node of the tree. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Tight bounds of every point under this node
    pub bbox: Rect,
    pub point_count: u64,
    /// Height from leaf level (leaves are 0)
    pub level: u32,
    pub representatives: Vec<Representative>,
    pub kind: NodeKind,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    pub fn children(&self) -> &[ChildRef] {
        match &self.kind {
            NodeKind::Internal { children } => children,
            NodeKind::Leaf { .. } => &[],
        }
    }

    pub fn range(&self) -> Option<PointRange> {
        match self.kind {
            NodeKind::Leaf { range } => Some(range),
            NodeKind::Internal { .. } => None,
        }
    }

    /// Representatives lying inside `rect`.
    pub fn representatives_in<'a>(
        &'a self,
        rect: &'a Rect,
    ) -> impl Iterator<Item = &'a Representative> + 'a {
        self.representatives
            .iter()
            .filter(move |r| rect.contains_point(r.mz, r.rt))
    }

    /// Reference to this node as seen from its parent.
    pub fn as_child(&self, node_id: NodeId) -> ChildRef {
        ChildRef {
            node_id,
            bbox: self.bbox,
            point_count: self.point_count,
        }
    }
}

// ============================================================================
// Node Record with Checksum
// ============================================================================

/// Encoding of a node in the index file: `[u32 len][u32 crc][payload]`.
///
/// The CRC32 covers the bincode payload and is verified on every read.
pub struct NodeRecord;

impl NodeRecord {
    pub const PREFIX_LEN: usize = 8;

    pub fn encode(node: &Node) -> MzTreeResult<Vec<u8>> {
        let payload = bincode::serde::encode_to_vec(node, bincode::config::legacy())
            .map_err(MzTreeError::serialization)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            MzTreeError::Serialization(format!("node of {} bytes is too large", payload.len()))
        })?;

        let mut record = Vec::with_capacity(Self::PREFIX_LEN + payload.len());
        record.extend_from_slice(&len.to_le_bytes());
        record.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        record.extend_from_slice(&payload);
        Ok(record)
    }

    /// Splits a record prefix into (payload length, checksum).
    pub fn parse_prefix(prefix: &[u8; Self::PREFIX_LEN]) -> (usize, u32) {
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        let crc = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
        (len as usize, crc)
    }

    /// Verifies the checksum and decodes the payload.
    pub fn decode(payload: &[u8], expected_crc: u32, file: &Path, node_id: NodeId) -> MzTreeResult<Node> {
        let actual = crc32fast::hash(payload);
        if actual != expected_crc {
            return Err(MzTreeError::corruption(
                file,
                format!(
                    "node {} checksum mismatch (expected: {:x}, got: {:x})",
                    node_id, expected_crc, actual
                ),
            ));
        }
        bincode::serde::decode_from_slice(payload, bincode::config::legacy())
            .map(|(node, _)| node)
            .map_err(|e| MzTreeError::corruption(file, format!("node {} undecodable: {}", node_id, e)))
    }
}

// ============================================================================
// File Header
// ============================================================================

/// File header stored at the beginning of the index file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub root: NodeId,
    pub height: u32,
    pub node_count: u64,
    pub leaf_count: u64,
    pub point_count: u64,
    pub bounds: Rect,
    pub leaf_capacity: u32,
    pub fan_out: u32,
    pub representative_size: u32,
    pub strategy: StrategyKind,
    pub has_payload: bool,
    pub has_ranking: bool,
    pub node_table_offset: u64,
    /// Written last; an index without it was never finished
    pub complete: bool,
}

impl FileHeader {
    pub fn new(strategy: StrategyKind) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            root: 0,
            height: 0,
            node_count: 0,
            leaf_count: 0,
            point_count: 0,
            bounds: Rect::empty(),
            leaf_capacity: 0,
            fan_out: 0,
            representative_size: 0,
            strategy,
            has_payload: false,
            has_ranking: false,
            node_table_offset: 0,
            complete: false,
        }
    }

    pub fn validate(&self, file: &Path) -> MzTreeResult<()> {
        if self.magic != MAGIC {
            return Err(MzTreeError::corruption(
                file,
                format!("invalid file format (bad magic {:#x})", self.magic),
            ));
        }
        if self.version != VERSION {
            return Err(MzTreeError::corruption(
                file,
                format!("unsupported file format version {}", self.version),
            ));
        }
        if !self.complete {
            return Err(MzTreeError::corruption(
                file,
                "index was never completed (interrupted or failed build)",
            ));
        }
        if self.root >= self.node_count {
            return Err(MzTreeError::corruption(
                file,
                format!("root node {} outside node table of {}", self.root, self.node_count),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn leaf(offset: u64, count: u64) -> Node {
        Node {
            bbox: Rect::new(100.0, 200.0, 1.0, 2.0),
            point_count: count,
            level: 0,
            representatives: vec![Representative {
                id: offset,
                mz: 150.0,
                rt: 1.5,
                intensity: 10.0,
                child: 0,
            }],
            kind: NodeKind::Leaf {
                range: PointRange::new(offset, count),
            },
        }
    }

    #[test]
    fn test_record_round_trip() {
        let node = leaf(5, 10);
        let record = NodeRecord::encode(&node).unwrap();
        let prefix: [u8; 8] = record[..8].try_into().unwrap();
        let (len, crc) = NodeRecord::parse_prefix(&prefix);
        assert_eq!(len, record.len() - 8);
        let decoded = NodeRecord::decode(&record[8..], crc, &PathBuf::from("idx"), 0).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_record_detects_corruption() {
        let mut record = NodeRecord::encode(&leaf(5, 10)).unwrap();
        let prefix: [u8; 8] = record[..8].try_into().unwrap();
        let (_, crc) = NodeRecord::parse_prefix(&prefix);
        let last = record.len() - 1;
        record[last] ^= 0xFF;
        let err = NodeRecord::decode(&record[8..], crc, &PathBuf::from("idx"), 3).unwrap_err();
        assert!(err.is_corruption());
        assert!(err.to_string().contains("node 3"));
    }

    #[test]
    fn test_node_accessors() {
        let node = leaf(0, 4);
        assert!(node.is_leaf());
        assert!(node.children().is_empty());
        assert_eq!(node.range(), Some(PointRange::new(0, 4)));
        assert_eq!(node.representatives_in(&Rect::new(0.0, 149.0, 0.0, 9.0)).count(), 0);
        assert_eq!(node.representatives_in(&Rect::new(0.0, 151.0, 0.0, 9.0)).count(), 1);

        let child = node.as_child(9);
        assert_eq!(child.node_id, 9);
        assert_eq!(child.point_count, 4);
    }

    #[test]
    fn test_header_validation() {
        let path = PathBuf::from("idx");
        let mut header = FileHeader::new(StrategyKind::WeightedStriding);
        header.node_count = 1;
        assert!(header.validate(&path).is_err(), "incomplete header must be rejected");

        header.complete = true;
        assert!(header.validate(&path).is_ok());

        header.magic = 0;
        assert!(header.validate(&path).unwrap_err().is_corruption());
    }

    #[test]
    fn test_cache_hit_ratio() {
        let stats = TreeStats {
            cache_hits: 3,
            cache_misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.cache_hit_ratio(), 0.75);
        assert_eq!(TreeStats::default().cache_hit_ratio(), 0.0);
    }
}
