//! Bulk build of an index from a stream of points.
//!
//! # Algorithm
//! 1. Buffer up to `partition_points` points from the stream
//! 2. Tile the partition into leaves with Sort-Tile-Recursive packing
//!    (rt slices, each sorted by m/z, cut at `leaf_capacity`)
//! 3. Append each leaf's points to the page store, summarize them and
//!    write the leaf node; write the partition's intensity ranking run
//! 4. Once the stream is exhausted, group nodes level by level in Hilbert
//!    order (`fan_out` per parent), merging the children's representatives
//!    through the summarization strategy, until one root remains
//! 5. Write the node table and finally the completed header
//!
//! Only one partition is held in memory at a time. Leaves of different
//! partitions may overlap; the upper levels group them spatially.

use std::fmt::Display;
use std::path::Path;

use log::{debug, error, info};

use super::intensity_ranking::RankingWriter;
use super::node_storage::NodeStorage;
use super::page_store::PointStoreWriter;
use super::tree_types::{ChildRef, FileHeader, Node, NodeKind};
use crate::config::MzTreeConfig;
use crate::errors::{MzTreeError, MzTreeResult};
use crate::hilbert::{HilbertCurve, DEFAULT_ORDER};
use crate::import_state::{ImportPhase, ImportTracker, IndexPaths};
use crate::point::{MsPoint, PointRange, MAX_LABEL};
use crate::rect::Rect;
use crate::summarization::{Representative, SummarizationStrategy};

/// Builds a complete index at `paths` from `source`.
///
/// The tracker must already be in progress. On any failure the tracker is
/// marked failed, every partially written file is removed and the error is
/// reported as [`MzTreeError::BuildFailure`] carrying the root cause.
pub(crate) fn build_index<I, E>(
    paths: &IndexPaths,
    config: &MzTreeConfig,
    source: I,
    tracker: &ImportTracker,
) -> MzTreeResult<FileHeader>
where
    I: IntoIterator<Item = Result<MsPoint, E>>,
    E: Display,
{
    info!(
        "Building index {:?} with strategy '{}'",
        paths.index,
        config.strategy()
    );

    let result = TreeBuilder::new(paths, config, tracker).and_then(|builder| builder.run(source));
    match result {
        Ok(header) => {
            info!(
                "Built index {:?}: {} points, {} nodes, height {}",
                paths.index, header.point_count, header.node_count, header.height
            );
            Ok(header)
        }
        Err(err) => {
            let reason = match err {
                MzTreeError::BuildFailure { reason, .. } => reason,
                other => other.to_string(),
            };
            error!("Build of {:?} failed: {}", paths.index, reason);
            tracker.fail(reason.clone());
            paths.remove_all();
            Err(MzTreeError::BuildFailure {
                path: paths.index.clone(),
                reason,
            })
        }
    }
}

struct TreeBuilder<'a> {
    config: &'a MzTreeConfig,
    tracker: &'a ImportTracker,
    strategy: Box<dyn SummarizationStrategy>,
    storage: NodeStorage,
    points: PointStoreWriter,
    ranking: Option<RankingWriter>,
    leaves: Vec<ChildRef>,
    bounds: Rect,
}

impl<'a> TreeBuilder<'a> {
    fn new(paths: &IndexPaths, config: &'a MzTreeConfig, tracker: &'a ImportTracker) -> MzTreeResult<Self> {
        config.validate()?;
        let ranking = if config.track_intensity_ranking() {
            Some(RankingWriter::create(&paths.ranking)?)
        } else {
            None
        };
        Ok(Self {
            config,
            tracker,
            strategy: config.strategy().strategy(),
            storage: NodeStorage::create(&paths.index)?,
            points: PointStoreWriter::create(paths, config.store_payload())?,
            ranking,
            leaves: Vec::new(),
            bounds: Rect::empty(),
        })
    }

    fn run<I, E>(mut self, source: I) -> MzTreeResult<FileHeader>
    where
        I: IntoIterator<Item = Result<MsPoint, E>>,
        E: Display,
    {
        self.tracker.set_phase(ImportPhase::Partitioning);

        let capacity = self.config.partition_points();
        let mut partition: Vec<MsPoint> = Vec::with_capacity(capacity.min(1 << 20));
        let source = source.into_iter();
        if let (low, Some(high)) = source.size_hint() {
            if low == high {
                self.tracker.set_total_work(Some(low as u64));
            }
        }
        for (record, item) in source.enumerate() {
            let point = item.map_err(|e| build_failure(self.storage.path(), format!("point source failed at record {}: {}", record, e)))?;
            validate_point(&point, record, self.storage.path())?;
            partition.push(point);
            if partition.len() >= capacity {
                self.flush_partition(&mut partition)?;
            }
        }
        if !partition.is_empty() {
            self.flush_partition(&mut partition)?;
        }

        self.finish()
    }

    fn flush_partition(&mut self, partition: &mut Vec<MsPoint>) -> MzTreeResult<()> {
        let leaf_capacity = self.config.leaf_capacity();
        let tiles = tile_partition(partition, leaf_capacity);
        debug!(
            "Flushing partition of {} points into {} leaves",
            partition.len(),
            tiles.len()
        );

        for tile in tiles {
            let leaf_points = &mut partition[tile];
            let range = self.points.append(leaf_points)?;
            let node = self.leaf_node(leaf_points, range);
            let node_id = self.storage.append_node(&node)?;
            self.bounds.expand(&node.bbox);
            self.leaves.push(node.as_child(node_id));
        }

        if let Some(ranking) = self.ranking.as_mut() {
            ranking.append_run(partition)?;
        }
        self.tracker.add_work(partition.len() as u64);
        partition.clear();
        Ok(())
    }

    fn leaf_node(&self, points: &[MsPoint], range: PointRange) -> Node {
        let mut bbox = Rect::empty();
        let candidates: Vec<Representative> = points
            .iter()
            .map(|p| {
                bbox.expand_point(p.mz, p.rt);
                Representative {
                    id: p.id,
                    mz: p.mz,
                    rt: p.rt,
                    intensity: p.intensity,
                    child: 0,
                }
            })
            .collect();

        Node {
            bbox,
            point_count: range.count,
            level: 0,
            representatives: self
                .strategy
                .reduce(candidates, self.config.representative_size()),
            kind: NodeKind::Leaf { range },
        }
    }

    fn finish(mut self) -> MzTreeResult<FileHeader> {
        self.tracker.set_phase(ImportPhase::Summarizing);

        let leaf_count = self.leaves.len() as u64;
        let mut level_nodes = std::mem::take(&mut self.leaves);
        if level_nodes.is_empty() {
            let empty = Node {
                bbox: Rect::empty(),
                point_count: 0,
                level: 0,
                representatives: Vec::new(),
                kind: NodeKind::Leaf {
                    range: PointRange::new(0, 0),
                },
            };
            let node_id = self.storage.append_node(&empty)?;
            level_nodes.push(empty.as_child(node_id));
        }

        let mut height = 1u32;
        while level_nodes.len() > 1 {
            level_nodes = self.build_level(level_nodes, height)?;
            height += 1;
        }
        let root = level_nodes[0];

        self.tracker.set_phase(ImportPhase::Finalizing);
        let point_count = self.points.finish()?;
        if let Some(ranking) = self.ranking.take() {
            ranking.finish()?;
        }

        let mut header = FileHeader::new(self.config.strategy());
        header.root = root.node_id;
        header.height = height;
        header.leaf_count = leaf_count.max(1);
        header.point_count = point_count;
        header.bounds = self.bounds;
        header.leaf_capacity = self.config.leaf_capacity() as u32;
        header.fan_out = self.config.fan_out() as u32;
        header.representative_size = self.config.representative_size() as u32;
        header.has_payload = self.config.store_payload();
        header.has_ranking = self.config.track_intensity_ranking();
        self.storage.finish(&mut header)?;
        Ok(header)
    }

    /// Groups one level into parents at `level`.
    fn build_level(&self, mut nodes: Vec<ChildRef>, level: u32) -> MzTreeResult<Vec<ChildRef>> {
        let curve = HilbertCurve::new(self.bounds, DEFAULT_ORDER);
        nodes.sort_by_cached_key(|child| (curve.key(&child.bbox), child.node_id));

        let mut parents = Vec::with_capacity(nodes.len().div_ceil(self.config.fan_out()));
        for group in nodes.chunks(self.config.fan_out()) {
            let mut bbox = Rect::empty();
            let mut point_count = 0u64;
            let mut candidates = Vec::new();
            for (index, child) in group.iter().enumerate() {
                let node = self.storage.read_node(child.node_id)?;
                bbox.expand(&child.bbox);
                point_count += child.point_count;
                candidates.extend(node.representatives.into_iter().map(|rep| Representative {
                    child: index as u16,
                    ..rep
                }));
            }

            let parent = Node {
                bbox,
                point_count,
                level,
                representatives: self
                    .strategy
                    .reduce(candidates, self.config.representative_size()),
                kind: NodeKind::Internal {
                    children: group.to_vec(),
                },
            };
            let node_id = self.storage.append_node(&parent)?;
            parents.push(parent.as_child(node_id));
        }

        debug!(
            "Built level {} with {} nodes from {} children",
            level,
            parents.len(),
            nodes.len()
        );
        Ok(parents)
    }
}

fn build_failure(path: &Path, reason: String) -> MzTreeError {
    MzTreeError::BuildFailure {
        path: path.to_path_buf(),
        reason,
    }
}

fn validate_point(point: &MsPoint, record: usize, path: &Path) -> MzTreeResult<()> {
    let field = if !point.mz.is_finite() {
        Some("m/z")
    } else if !point.rt.is_finite() {
        Some("rt")
    } else if !point.intensity.is_finite() {
        Some("intensity")
    } else {
        None
    };
    if let Some(field) = field {
        return Err(build_failure(
            path,
            format!("record {} has a non-finite {}", record, field),
        ));
    }
    if matches!(point.label, Some(label) if label > MAX_LABEL) {
        return Err(build_failure(
            path,
            format!("record {} has label above {}", record, MAX_LABEL),
        ));
    }
    Ok(())
}

/// Sort-Tile-Recursive packing of one partition.
///
/// Reorders `points` in place and returns the index ranges of the leaves.
/// Sort keys include every coordinate so the layout does not depend on the
/// arrival order within the partition.
fn tile_partition(points: &mut [MsPoint], leaf_capacity: usize) -> Vec<std::ops::Range<usize>> {
    let n = points.len();
    if n == 0 {
        return Vec::new();
    }

    let leaf_count = n.div_ceil(leaf_capacity);
    let slice_count = (leaf_count as f64).sqrt().ceil() as usize;
    let slice_size = slice_count.max(1) * leaf_capacity;

    points.sort_by(|a, b| {
        a.rt.total_cmp(&b.rt)
            .then(a.mz.total_cmp(&b.mz))
            .then(a.intensity.total_cmp(&b.intensity))
    });

    let mut tiles = Vec::with_capacity(leaf_count);
    let mut start = 0;
    while start < n {
        let end = (start + slice_size).min(n);
        points[start..end].sort_by(|a, b| {
            a.mz.total_cmp(&b.mz)
                .then(a.rt.total_cmp(&b.rt))
                .then(a.intensity.total_cmp(&b.intensity))
        });
        let mut leaf_start = start;
        while leaf_start < end {
            let leaf_end = (leaf_start + leaf_capacity).min(end);
            tiles.push(leaf_start..leaf_end);
            leaf_start = leaf_end;
        }
        start = end;
    }
    tiles
}
