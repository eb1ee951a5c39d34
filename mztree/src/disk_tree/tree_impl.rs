//! MzTree implementation.

use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use parking_lot::RwLock;

use super::annotation::AnnotationChannel;
use super::builder::build_index;
use super::integrity::{check_tree, IntegrityReport};
use super::intensity_ranking::IntensityRanking;
use super::node_storage::NodeStorage;
use super::page_cache::PageCache;
use super::page_store::PointStore;
use super::query::QueryEngine;
use super::tree_types::{FileHeader, TreeStats};
use crate::config::{MzTreeBuilder, MzTreeConfig};
use crate::errors::{MzTreeError, MzTreeResult};
use crate::import_state::{ImportEvent, ImportPhase, ImportState, ImportTracker, IndexPaths};
use crate::io::{is_csv_source, CsvExporter, CsvPointSource};
use crate::point::MsPoint;
use crate::rect::Rect;
use crate::summarization::StrategyKind;

/// Handle to an (m/z, rt) index.
///
/// A handle starts unloaded; [`MzTree::load`] opens an existing index or
/// builds one from a raw source, after which any number of threads may
/// query it concurrently. [`MzTree::close`] waits for in-flight queries,
/// flushes labels and releases the files; the handle is unusable afterwards.
///
/// # Example
///
/// ```rust,no_run
/// use mztree::{MzTree, StrategyKind};
///
/// # fn main() -> mztree::MzTreeResult<()> {
/// let tree = MzTree::builder().build()?;
/// tree.load("/data/run42.csv", StrategyKind::WeightedStriding)?;
///
/// // full resolution
/// let exact = tree.query(200.0, 300.0, 10.0, 20.0, 0)?;
/// // about 500 points spread over the whole run
/// let overview = tree.query(100.0, 1000.0, 0.0, 60.0, 500)?;
///
/// tree.close()?;
/// # Ok(())
/// # }
/// ```
pub struct MzTree {
    inner: Arc<MzTreeInner>,
}

struct MzTreeInner {
    config: RwLock<MzTreeConfig>,
    state: RwLock<TreeState>,
    tracker: ImportTracker,
    cache: Arc<PageCache>,
}

enum TreeState {
    Unloaded,
    Loading,
    Ready(Arc<TreeCore>),
    Failed,
    Closed,
}

/// Everything an open index reads through. Shared by the handle and any
/// annotation channel.
pub(crate) struct TreeCore {
    pub paths: IndexPaths,
    pub header: FileHeader,
    pub storage: NodeStorage,
    pub store: PointStore,
    pub ranking: Option<IntensityRanking>,
    pub cache: Arc<PageCache>,
    pub writer_active: AtomicBool,
}

impl TreeCore {
    fn open(paths: IndexPaths, cache: Arc<PageCache>) -> MzTreeResult<Self> {
        let (storage, header) = NodeStorage::open(&paths.index)?;
        let store = PointStore::open(&paths, header.point_count, header.has_payload)?;
        let ranking = if header.has_ranking {
            Some(IntensityRanking::open(&paths.ranking, header.point_count)?)
        } else {
            None
        };
        cache.invalidate_all();

        Ok(Self {
            paths,
            header,
            storage,
            store,
            ranking,
            cache,
            writer_active: AtomicBool::new(false),
        })
    }

    fn close(&self) -> MzTreeResult<()> {
        self.store.close()?;
        self.cache.invalidate_all();
        Ok(())
    }
}

impl MzTree {
    /// Creates an unloaded handle. Queries fail with `NotReady` until
    /// [`MzTree::load`] succeeds.
    pub fn new(config: MzTreeConfig) -> Self {
        let cache = Arc::new(PageCache::new(config.cache_pages()));
        Self {
            inner: Arc::new(MzTreeInner {
                config: RwLock::new(config),
                state: RwLock::new(TreeState::Unloaded),
                tracker: ImportTracker::new(),
                cache,
            }),
        }
    }

    pub fn builder() -> MzTreeBuilder {
        MzTreeBuilder::new()
    }

    /// Opens the existing index at `base` with the default configuration.
    pub fn open(base: impl AsRef<Path>) -> MzTreeResult<Self> {
        let tree = Self::new(MzTreeConfig::default());
        tree.open_existing(base.as_ref(), None)?;
        Ok(tree)
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Opens an existing index or builds one from a recognized source.
    ///
    /// - an index file (detected by its header) is opened; the strategy it
    ///   was built with wins over `strategy`
    /// - a `.csv` file is built into an index at the configured
    ///   destination, or `<source>.mztree` next to it
    /// - anything else fails with `BuildFailure`
    pub fn load(&self, path: impl AsRef<Path>, strategy: StrategyKind) -> MzTreeResult<()> {
        let path = path.as_ref();
        if NodeStorage::is_index_file(path) {
            return self.open_existing(path, Some(strategy));
        }
        if !is_csv_source(path) {
            return Err(MzTreeError::BuildFailure {
                path: path.to_path_buf(),
                reason: "unrecognized input format (expected an index or a .csv file)".into(),
            });
        }

        let base = {
            let mut config = self.inner.config.write();
            config.set_strategy(strategy);
            config
                .destination()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| default_destination(path))
        };
        match CsvPointSource::open(path) {
            Ok(source) => self.build(&base, Some(path), source),
            Err(e) => {
                self.begin_loading()?;
                let paths = IndexPaths::new(&base);
                self.begin_import(&paths, Some(path));
                let reason = format!("cannot read source {}: {}", path.display(), e);
                self.inner.tracker.fail(reason.clone());
                self.mark_failed();
                Err(MzTreeError::BuildFailure {
                    path: paths.index,
                    reason,
                })
            }
        }
    }

    /// Builds an index at `base` from points produced by an external parser
    /// and opens it. A source error aborts the build.
    pub fn build_from<I, E>(&self, base: impl AsRef<Path>, source: I) -> MzTreeResult<()>
    where
        I: IntoIterator<Item = Result<MsPoint, E>>,
        E: Display,
    {
        self.build(base.as_ref(), None, source)
    }

    fn build<I, E>(&self, base: &Path, source_path: Option<&Path>, source: I) -> MzTreeResult<()>
    where
        I: IntoIterator<Item = Result<MsPoint, E>>,
        E: Display,
    {
        self.begin_loading()?;
        let config = self.inner.config.read().clone();
        let paths = IndexPaths::new(base);
        self.begin_import(&paths, source_path);

        if let Err(e) = build_index(&paths, &config, source, &self.inner.tracker) {
            self.mark_failed();
            return Err(e);
        }

        self.inner.tracker.set_phase(ImportPhase::Opening);
        match TreeCore::open(paths.clone(), Arc::clone(&self.inner.cache)) {
            Ok(core) => self.finish_loading(core),
            Err(e) => {
                let reason = format!("built index could not be opened: {}", e);
                self.inner.tracker.fail(reason.clone());
                paths.remove_all();
                self.mark_failed();
                Err(MzTreeError::BuildFailure {
                    path: paths.index,
                    reason,
                })
            }
        }
    }

    fn open_existing(&self, base: &Path, requested: Option<StrategyKind>) -> MzTreeResult<()> {
        self.begin_loading()?;
        let paths = IndexPaths::new(base);
        info!("Opening index {:?}", paths.index);

        match TreeCore::open(paths.clone(), Arc::clone(&self.inner.cache)) {
            Ok(core) => {
                let stored = core.header.strategy;
                if let Some(requested) = requested {
                    if requested != stored {
                        warn!(
                            "Index {:?} was built with '{}'; ignoring requested strategy '{}'",
                            paths.index, stored, requested
                        );
                    }
                }
                self.inner.config.write().set_strategy(stored);
                self.inner.tracker.begin(
                    &paths,
                    None,
                    stored,
                    core.header.has_payload,
                    core.header.has_ranking,
                    ImportPhase::Opening,
                );
                self.finish_loading(core)
            }
            Err(e) => {
                self.begin_import(&paths, None);
                self.inner.tracker.fail(e.to_string());
                self.mark_failed();
                Err(e)
            }
        }
    }

    fn begin_loading(&self) -> MzTreeResult<()> {
        let mut state = self.inner.state.write();
        match *state {
            TreeState::Unloaded | TreeState::Failed => {
                *state = TreeState::Loading;
                Ok(())
            }
            TreeState::Loading => Err(MzTreeError::InvalidOperation(
                "an import is already running on this tree".into(),
            )),
            TreeState::Ready(_) => Err(MzTreeError::InvalidOperation(
                "tree is already loaded; use a new handle for another index".into(),
            )),
            TreeState::Closed => Err(MzTreeError::Closed),
        }
    }

    fn begin_import(&self, paths: &IndexPaths, source: Option<&Path>) {
        let config = self.inner.config.read();
        self.inner.tracker.begin(
            paths,
            source,
            config.strategy(),
            config.store_payload(),
            config.track_intensity_ranking(),
            ImportPhase::Partitioning,
        );
    }

    fn mark_failed(&self) {
        let mut state = self.inner.state.write();
        if !matches!(*state, TreeState::Closed) {
            *state = TreeState::Failed;
        }
    }

    fn finish_loading(&self, core: TreeCore) -> MzTreeResult<()> {
        let mut state = self.inner.state.write();
        if matches!(*state, TreeState::Closed) {
            // closed while loading
            core.close()?;
            self.inner.tracker.fail("tree was closed during import".into());
            return Err(MzTreeError::Closed);
        }
        info!(
            "Index {:?} ready: {} points, {} nodes, strategy '{}'",
            core.paths.index, core.header.point_count, core.header.node_count, core.header.strategy
        );
        self.inner
            .tracker
            .complete(core.header.point_count, core.header.strategy);
        *state = TreeState::Ready(Arc::new(core));
        Ok(())
    }

    /// The open index, or why there is none.
    fn core(&self) -> MzTreeResult<Arc<TreeCore>> {
        match &*self.inner.state.read() {
            TreeState::Ready(core) => Ok(Arc::clone(core)),
            TreeState::Closed => Err(MzTreeError::Closed),
            _ => Err(MzTreeError::NotReady(self.inner.tracker.status())),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Points inside `[mzmin, mzmax] x [rtmin, rtmax]`.
    ///
    /// `budget = 0` returns every point (exact mode). `budget > 0` returns
    /// a level-of-detail sample of real points, at most `budget` plus one
    /// node's representatives.
    pub fn query(
        &self,
        mzmin: f64,
        mzmax: f64,
        rtmin: f32,
        rtmax: f32,
        budget: i64,
    ) -> MzTreeResult<Vec<MsPoint>> {
        let rect = Rect::try_new(mzmin, mzmax, rtmin, rtmax)?;
        let budget = check_budget(budget)?;
        self.query_rect(&rect, budget)
    }

    /// [`MzTree::query`] over an already validated rectangle.
    pub fn query_rect(&self, rect: &Rect, budget: u64) -> MzTreeResult<Vec<MsPoint>> {
        let core = self.core()?;
        let reader = core.store.reader()?;
        let engine = QueryEngine::new(&core.storage, &core.cache, &reader);
        if budget == 0 {
            engine.exact(core.header.root, rect)
        } else {
            engine.level_of_detail(core.header.root, rect, budget)
        }
    }

    /// Number of points inside the rectangle, without reading payload.
    pub fn count(&self, mzmin: f64, mzmax: f64, rtmin: f32, rtmax: f32) -> MzTreeResult<u64> {
        let rect = Rect::try_new(mzmin, mzmax, rtmin, rtmax)?;
        let core = self.core()?;
        let reader = core.store.reader()?;
        QueryEngine::new(&core.storage, &core.cache, &reader).count(core.header.root, &rect)
    }

    /// Streams the exact query over `rect` to `writer` as CSV, returning
    /// the number of rows.
    pub fn export_csv<W: Write>(&self, rect: &Rect, writer: W) -> MzTreeResult<u64> {
        let core = self.core()?;
        let reader = core.store.reader()?;
        let engine = QueryEngine::new(&core.storage, &core.cache, &reader);
        let mut exporter = CsvExporter::new(writer)?;
        engine.for_each_exact(core.header.root, rect, |point| exporter.write_point(&point))?;
        let rows = exporter.finish()?;
        info!("Exported {} points from {:?}", rows, core.paths.index);
        Ok(rows)
    }

    // ========================================================================
    // State and statistics
    // ========================================================================

    /// Snapshot of the current or last import.
    pub fn import_state(&self) -> ImportState {
        self.inner.tracker.snapshot()
    }

    /// Receives every subsequent import event.
    pub fn subscribe(&self) -> Receiver<ImportEvent> {
        self.inner.tracker.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.inner.state.read(), TreeState::Ready(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.inner.state.read(), TreeState::Closed)
    }

    pub fn config(&self) -> MzTreeConfig {
        self.inner.config.read().clone()
    }

    /// Strategy that produced the open index's representatives.
    pub fn strategy(&self) -> MzTreeResult<StrategyKind> {
        Ok(self.core()?.header.strategy)
    }

    /// Tight bounds of all indexed points (empty for an empty index).
    pub fn data_bounds(&self) -> MzTreeResult<Rect> {
        Ok(self.core()?.header.bounds)
    }

    pub fn point_count(&self) -> MzTreeResult<u64> {
        Ok(self.core()?.header.point_count)
    }

    pub fn index_path(&self) -> MzTreeResult<PathBuf> {
        Ok(self.core()?.paths.index.clone())
    }

    pub fn stats(&self) -> MzTreeResult<TreeStats> {
        let core = self.core()?;
        let cache = &core.cache;
        Ok(TreeStats {
            point_count: core.header.point_count,
            node_count: core.header.node_count,
            leaf_count: core.header.leaf_count,
            height: core.header.height,
            cached_pages: cache.len() as u64,
            cache_hits: cache.hits(),
            cache_misses: cache.misses(),
            disk_reads: cache.disk_reads(),
        })
    }

    /// The page cache shared by every query on this handle.
    pub fn page_cache(&self) -> Arc<PageCache> {
        Arc::clone(&self.inner.cache)
    }

    /// Drops all cached pages. Affects performance only.
    pub fn invalidate_cache(&self) {
        self.inner.cache.invalidate_all();
        debug!("Page cache invalidated");
    }

    /// Zeroes the cache hit, miss and disk-read counters reported by
    /// [`MzTree::stats`].
    pub fn reset_stats(&self) {
        self.inner.cache.reset_counters();
    }

    /// Verifies checksums and structural invariants of the whole index.
    pub fn check_integrity(&self) -> MzTreeResult<IntegrityReport> {
        let core = self.core()?;
        let reader = core.store.reader()?;
        let report = check_tree(&core.storage, &core.header, &reader)?;
        if !report.is_valid {
            warn!(
                "Integrity check of {:?} found {} problems",
                core.paths.index,
                report.errors.len()
            );
        }
        Ok(report)
    }

    // ========================================================================
    // Annotation
    // ========================================================================

    /// The single label writer. Fails with `InvalidOperation` while another
    /// channel is alive or when the index has no payload column.
    pub fn annotation_channel(&self) -> MzTreeResult<AnnotationChannel> {
        AnnotationChannel::acquire(self.core()?)
    }

    /// The most intense point that carries no label yet.
    pub fn highest_unlabeled(&self) -> MzTreeResult<Option<MsPoint>> {
        let core = self.core()?;
        let ranking = ranking_of(&core)?;
        let reader = core.store.reader()?;
        ranking.highest_unlabeled(&reader)
    }

    /// Fraction of points labeled, counted from the intense end of the
    /// ranking.
    pub fn labeling_progress(&self) -> MzTreeResult<f64> {
        let core = self.core()?;
        let ranking = ranking_of(&core)?;
        let reader = core.store.reader()?;
        ranking.labeling_progress(&reader)
    }

    // ========================================================================
    // Close
    // ========================================================================

    /// Waits for in-flight queries, flushes labels, drops the cache and
    /// releases the files. Idempotent.
    pub fn close(&self) -> MzTreeResult<()> {
        let previous = std::mem::replace(&mut *self.inner.state.write(), TreeState::Closed);
        if let TreeState::Ready(core) = previous {
            core.close()?;
            info!("Closed index {:?}", core.paths.index);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MzTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.inner.state.read() {
            TreeState::Unloaded => "unloaded",
            TreeState::Loading => "loading",
            TreeState::Ready(_) => "ready",
            TreeState::Failed => "failed",
            TreeState::Closed => "closed",
        };
        f.debug_struct("MzTree")
            .field("state", &state)
            .field("import", &self.inner.tracker.status())
            .finish()
    }
}

fn ranking_of(core: &TreeCore) -> MzTreeResult<&IntensityRanking> {
    core.ranking.as_ref().ok_or_else(|| {
        MzTreeError::InvalidOperation(
            "index was built without an intensity ranking".into(),
        )
    })
}

fn check_budget(budget: i64) -> MzTreeResult<u64> {
    u64::try_from(budget).map_err(|_| {
        MzTreeError::InvalidParameter(format!("budget must be non-negative, got {}", budget))
    })
}

/// `<source>.mztree` next to the source file.
fn default_destination(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_os_string();
    name.push(".mztree");
    PathBuf::from(name)
}

// ============================================================================
// Drop Implementation
// ============================================================================

impl Drop for MzTree {
    fn drop(&mut self) {
        // Best effort close on drop
        if let Err(e) = self.close() {
            warn!("Failed to close index on drop: {}", e);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Axis;
    use crate::import_state::ImportStatus;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::convert::Infallible;
    use tempfile::tempdir;

    fn points(n: usize, seed: u64) -> Vec<MsPoint> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                MsPoint::new(
                    rng.gen_range(100.0..=1000.0),
                    rng.gen_range(0.0..=60.0),
                    rng.gen_range(1.0..1.0e5),
                )
            })
            .collect()
    }

    fn small_tree() -> MzTree {
        let _ = env_logger::builder().is_test(true).try_init();
        MzTree::builder()
            .leaf_capacity(128)
            .fan_out(4)
            .representative_size(32)
            .partition_points(1000)
            .cache_pages(256)
            .build()
            .unwrap()
    }

    fn built(base: &Path, n: usize) -> MzTree {
        let tree = small_tree();
        tree.build_from(base, points(n, 42).into_iter().map(Ok::<_, Infallible>))
            .unwrap();
        tree
    }

    #[test]
    fn test_query_before_load_is_not_ready() {
        let tree = small_tree();
        let err = tree.query(100.0, 1000.0, 0.0, 60.0, 0).unwrap_err();
        assert!(matches!(err, MzTreeError::NotReady(ImportStatus::NotStarted)));
        assert!(matches!(tree.point_count(), Err(MzTreeError::NotReady(_))));
    }

    #[test]
    fn test_exact_query_returns_everything() {
        let dir = tempdir().unwrap();
        let tree = built(&dir.path().join("run"), 3000);
        let all = tree.query(100.0, 1000.0, 0.0, 60.0, 0).unwrap();
        assert_eq!(all.len(), 3000);
        assert_eq!(tree.point_count().unwrap(), 3000);
        assert_eq!(tree.count(100.0, 1000.0, 0.0, 60.0).unwrap(), 3000);
    }

    #[test]
    fn test_sub_box_containment() {
        let dir = tempdir().unwrap();
        let tree = built(&dir.path().join("run"), 3000);
        let result = tree.query(200.0, 300.0, 10.0, 20.0, 0).unwrap();
        assert!(!result.is_empty());
        assert!(result
            .iter()
            .all(|p| (200.0..=300.0).contains(&p.mz) && (10.0..=20.0).contains(&p.rt)));
    }

    #[test]
    fn test_lod_query_soft_cap() {
        let dir = tempdir().unwrap();
        let tree = built(&dir.path().join("run"), 3000);
        let result = tree.query(100.0, 1000.0, 0.0, 60.0, 500).unwrap();
        assert!(result.len() <= 500 + 32);
        assert!(result.len() > 32);
    }

    #[test]
    fn test_validation_errors() {
        let dir = tempdir().unwrap();
        let tree = built(&dir.path().join("run"), 100);

        let err = tree.query(50.0, 10.0, 0.0, 60.0, 0).unwrap_err();
        assert!(matches!(err, MzTreeError::InvalidRange { axis: Axis::Mz, .. }));
        let err = tree.query(10.0, 50.0, 30.0, 20.0, 0).unwrap_err();
        assert!(matches!(err, MzTreeError::InvalidRange { axis: Axis::Rt, .. }));
        let err = tree.query(10.0, 50.0, 0.0, 60.0, -1).unwrap_err();
        assert!(matches!(err, MzTreeError::InvalidParameter(_)));
        assert!(err.to_string().contains("-1"));
    }

    #[test]
    fn test_validation_does_not_touch_cache() {
        let dir = tempdir().unwrap();
        let tree = built(&dir.path().join("run"), 100);
        let before = tree.stats().unwrap();
        let _ = tree.query(50.0, 10.0, 0.0, 60.0, 0);
        let _ = tree.query(10.0, 50.0, 0.0, 60.0, -3);
        let after = tree.stats().unwrap();
        assert_eq!(before.cache_hits + before.cache_misses, after.cache_hits + after.cache_misses);
    }

    #[test]
    fn test_closed_tree_rejects_operations() {
        let dir = tempdir().unwrap();
        let tree = built(&dir.path().join("run"), 100);
        tree.close().unwrap();
        tree.close().unwrap();
        assert!(tree.is_closed());
        assert!(matches!(tree.query(100.0, 1000.0, 0.0, 60.0, 0), Err(MzTreeError::Closed)));
        assert!(matches!(tree.stats(), Err(MzTreeError::Closed)));
        assert!(matches!(
            tree.load(dir.path().join("run"), StrategyKind::WeightedStriding),
            Err(MzTreeError::Closed)
        ));
        assert!(tree.page_cache().is_empty());
        // the import record survives close
        assert!(tree.import_state().is_ready());
    }

    #[test]
    fn test_round_trip_through_reopen() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("run");
        let tree = built(&base, 2000);
        let exact = tree.query(300.0, 700.0, 10.0, 50.0, 0).unwrap();
        let lod = tree.query(100.0, 1000.0, 0.0, 60.0, 300).unwrap();
        tree.close().unwrap();

        let reopened = MzTree::open(&base).unwrap();
        assert_eq!(reopened.query(300.0, 700.0, 10.0, 50.0, 0).unwrap(), exact);
        assert_eq!(reopened.query(100.0, 1000.0, 0.0, 60.0, 300).unwrap(), lod);
    }

    #[test]
    fn test_stored_strategy_wins_on_reopen() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("run");
        built(&base, 200).close().unwrap();

        let tree = small_tree();
        tree.load(&base, StrategyKind::IntensityCutoff).unwrap();
        assert_eq!(tree.strategy().unwrap(), StrategyKind::WeightedStriding);
        assert_eq!(tree.import_state().strategy, StrategyKind::WeightedStriding);
    }

    #[test]
    fn test_load_csv_builds_next_to_source() {
        let dir = tempdir().unwrap();
        let csv = dir.path().join("scan.csv");
        let mut text = String::from("mz,rt,intensity\n");
        for p in points(500, 9) {
            text.push_str(&format!("{},{},{}\n", p.mz, p.rt, p.intensity));
        }
        std::fs::write(&csv, text).unwrap();

        let tree = small_tree();
        tree.load(&csv, StrategyKind::UniformStriding).unwrap();
        assert_eq!(tree.point_count().unwrap(), 500);
        assert_eq!(tree.strategy().unwrap(), StrategyKind::UniformStriding);
        assert_eq!(tree.index_path().unwrap(), dir.path().join("scan.csv.mztree"));

        let state = tree.import_state();
        assert_eq!(state.status, ImportStatus::Completed);
        assert_eq!(state.source_path.as_deref(), Some(csv.as_path()));
        assert_eq!(state.work_done, 500);
        assert_eq!(state.total_work, Some(500));
    }

    #[test]
    fn test_load_rejects_unknown_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scan.mzML");
        std::fs::write(&path, b"<mzML/>").unwrap();
        let tree = small_tree();
        let err = tree.load(&path, StrategyKind::WeightedStriding).unwrap_err();
        assert!(matches!(err, MzTreeError::BuildFailure { .. }));
        assert!(err.to_string().contains("unrecognized input format"));
    }

    #[test]
    fn test_malformed_csv_fails_build() {
        let dir = tempdir().unwrap();
        let csv = dir.path().join("bad.csv");
        std::fs::write(&csv, "100,1,5\n101,oops,6\n").unwrap();

        let tree = small_tree();
        let err = tree.load(&csv, StrategyKind::WeightedStriding).unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert_eq!(tree.import_state().status, ImportStatus::Failed);
        assert!(!dir.path().join("bad.csv.mztree").exists());
        assert!(matches!(
            tree.query(100.0, 200.0, 0.0, 1.0, 0),
            Err(MzTreeError::NotReady(ImportStatus::Failed))
        ));
    }

    #[test]
    fn test_second_load_is_rejected() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("run");
        let tree = built(&base, 50);
        let err = tree.load(&base, StrategyKind::WeightedStriding).unwrap_err();
        assert!(matches!(err, MzTreeError::InvalidOperation(_)));
    }

    #[test]
    fn test_empty_index() {
        let dir = tempdir().unwrap();
        let tree = built(&dir.path().join("run"), 0);
        assert_eq!(tree.point_count().unwrap(), 0);
        assert!(tree.data_bounds().unwrap().is_empty());
        assert!(tree.query(0.0, 1.0e9, 0.0, 1.0e9, 0).unwrap().is_empty());
        assert!(tree.query(0.0, 1.0e9, 0.0, 1.0e9, 10).unwrap().is_empty());
        assert!(tree.check_integrity().unwrap().is_valid);
    }

    #[test]
    fn test_stats_and_invalidate() {
        let dir = tempdir().unwrap();
        let tree = built(&dir.path().join("run"), 1500);
        tree.query(100.0, 1000.0, 0.0, 60.0, 0).unwrap();
        let stats = tree.stats().unwrap();
        assert_eq!(stats.point_count, 1500);
        assert!(stats.height >= 2);
        assert!(stats.cached_pages > 0);
        assert!(stats.disk_reads > 0);

        tree.invalidate_cache();
        tree.reset_stats();
        let stats = tree.stats().unwrap();
        assert_eq!(stats.cached_pages, 0);
        assert_eq!(stats.cache_hits + stats.cache_misses + stats.disk_reads, 0);
        assert_eq!(tree.query(100.0, 1000.0, 0.0, 60.0, 0).unwrap().len(), 1500);
        assert!(tree.stats().unwrap().cache_misses > 0);
    }

    #[test]
    fn test_integrity_of_fresh_index() {
        let dir = tempdir().unwrap();
        let tree = built(&dir.path().join("run"), 2500);
        let report = tree.check_integrity().unwrap();
        assert!(report.is_valid, "{:?}", report.errors);
        assert_eq!(report.points_covered, 2500);
        assert_eq!(report.nodes_checked, tree.stats().unwrap().node_count);
        assert!(report.orphaned_nodes.is_empty());
    }

    #[test]
    fn test_export_csv() {
        let dir = tempdir().unwrap();
        let tree = built(&dir.path().join("run"), 400);
        let mut out = Vec::new();
        let rect = Rect::new(100.0, 500.0, 0.0, 60.0);
        let rows = tree.export_csv(&rect, &mut out).unwrap();
        assert_eq!(rows, tree.count(100.0, 500.0, 0.0, 60.0).unwrap());
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("mz,rt,intensity,label\n"));
        assert_eq!(text.lines().count() as u64, rows + 1);
    }

    #[test]
    fn test_highest_unlabeled_follows_labels() {
        let dir = tempdir().unwrap();
        let tree = built(&dir.path().join("run"), 300);
        let all = tree.query(100.0, 1000.0, 0.0, 60.0, 0).unwrap();
        let max = all
            .iter()
            .max_by(|a, b| a.intensity.total_cmp(&b.intensity))
            .unwrap();

        let top = tree.highest_unlabeled().unwrap().unwrap();
        assert_eq!(top.id, max.id);

        let mut channel = tree.annotation_channel().unwrap();
        channel.write_label(top.id, 1).unwrap();
        let next = tree.highest_unlabeled().unwrap().unwrap();
        assert_ne!(next.id, top.id);
        assert!(next.intensity <= top.intensity);
        assert!(tree.labeling_progress().unwrap() > 0.0);
    }

    #[test]
    fn test_coordinate_only_index() {
        let dir = tempdir().unwrap();
        let tree = MzTree::builder()
            .leaf_capacity(64)
            .partition_points(256)
            .strategy(StrategyKind::UniformStriding)
            .store_payload(false)
            .track_intensity_ranking(false)
            .build()
            .unwrap();
        tree.build_from(dir.path().join("run"), points(300, 5).into_iter().map(Ok::<_, Infallible>))
            .unwrap();

        let all = tree.query(100.0, 1000.0, 0.0, 60.0, 0).unwrap();
        assert_eq!(all.len(), 300);
        assert!(all.iter().all(|p| p.intensity == 0.0 && p.label.is_none()));
        assert!(matches!(
            tree.annotation_channel(),
            Err(MzTreeError::InvalidOperation(_))
        ));
        assert!(matches!(
            tree.highest_unlabeled(),
            Err(MzTreeError::InvalidOperation(_))
        ));
    }
}
