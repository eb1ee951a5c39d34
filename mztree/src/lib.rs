//! # mztree - out-of-core spatial index for mass-spectrometry data
//!
//! `mztree` indexes LC-MS point clouds, (m/z, retention time, intensity)
//! triples numbering in the hundreds of millions, in files on disk and
//! answers rectangular window queries without loading the data set.
//!
//! ## Features
//!
//! - **Out-of-core build**: points are streamed and partitioned; memory is
//!   bounded by the partition size, not the data set
//! - **Exact queries**: every point inside a window
//! - **Level-of-detail queries**: a budget-bounded sample of real points
//!   spread over the window, for fast overview rendering
//! - **Pluggable summarization**: how representatives are chosen per node
//! - **Annotation**: atomic batches of point labels, visible to queries
//!   immediately
//! - **Intensity ranking**: the most intense unlabeled point on demand
//! - **Persistent**: indexes are reopened without rebuilding
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mztree::{MzTree, StrategyKind};
//!
//! # fn main() -> mztree::MzTreeResult<()> {
//! let tree = MzTree::builder()
//!     .visualization_preset()
//!     .build()?;
//! tree.load("/data/run42.csv", StrategyKind::WeightedStriding)?;
//!
//! let overview = tree.query(100.0, 2000.0, 0.0, 90.0, 2000)?;
//! let window = tree.query(445.1, 445.3, 30.0, 31.5, 0)?;
//!
//! let mut channel = tree.annotation_channel()?;
//! let ids: Vec<_> = window.iter().map(|p| (p.id, Some(7))).collect();
//! channel.write_labels(&ids)?;
//! # Ok(())
//! # }
//! ```
//!
//! Points from any other parser can be indexed with [`MzTree::build_from`]:
//!
//! ```rust,no_run
//! use mztree::{MsPoint, MzTree};
//!
//! # fn main() -> mztree::MzTreeResult<()> {
//! let tree = MzTree::builder().build()?;
//! let points = (0..1000).map(|i| Ok::<_, std::io::Error>(MsPoint::new(100.0 + i as f64, 1.0, 5.0)));
//! tree.build_from("/tmp/ladder", points)?;
//! assert_eq!(tree.point_count()?, 1000);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod disk_tree;
pub mod errors;
pub mod hilbert;
pub mod import_state;
pub mod io;
pub mod point;
pub mod rect;
pub mod summarization;

pub use config::{MzTreeBuilder, MzTreeConfig};
pub use disk_tree::{AnnotationChannel, IntegrityReport, MzTree, PageCache, TreeStats};
pub use errors::{Axis, MzTreeError, MzTreeResult};
pub use import_state::{ImportEvent, ImportPhase, ImportState, ImportStatus, IndexPaths};
pub use io::{CsvExporter, CsvPointSource};
pub use point::{Label, MsPoint, PointId, PointRange, MAX_LABEL};
pub use rect::Rect;
pub use summarization::{
    IntensityCutoff, Representative, StrategyKind, SummarizationStrategy, UniformStriding,
    WeightedStriding,
};
