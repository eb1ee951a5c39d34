//! Out-of-core tree over (m/z, rt) points.
//!
//! The index is split across files that are never loaded whole:
//! - a node file holding checksummed node records and a header page
//! - a coordinate column (m/z, rt) in leaf order
//! - an optional payload column (intensity, label)
//! - an optional intensity ranking of every leaf's points
//!
//! Nodes and leaf coordinate pages are read on demand through a shared LRU
//! [`PageCache`]. Every node carries a small set of representative points,
//! which lets a query with a point budget stop descending once the budget
//! is spent.

pub mod tree_constants;
pub mod tree_types;
mod annotation;
mod builder;
mod integrity;
mod intensity_ranking;
mod node_storage;
mod page_cache;
mod page_store;
mod query;
mod tree_impl;

pub use annotation::AnnotationChannel;
pub use integrity::IntegrityReport;
pub use page_cache::{CachedPage, PageCache, PageKey};
pub use page_store::CoordinatePage;
pub use tree_constants::{DEFAULT_CACHE_PAGES, DEFAULT_FAN_OUT, DEFAULT_LEAF_CAPACITY};
pub use tree_impl::MzTree;
pub use tree_types::{ChildRef, FileHeader, Node, NodeId, NodeKind, TreeStats};
