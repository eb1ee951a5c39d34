//! Build and open configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::disk_tree::tree_constants::{
    DEFAULT_CACHE_PAGES, DEFAULT_FAN_OUT, DEFAULT_LEAF_CAPACITY, DEFAULT_PARTITION_POINTS,
    DEFAULT_REPRESENTATIVE_SIZE, MAX_FAN_OUT,
};
use crate::disk_tree::MzTree;
use crate::errors::{MzTreeError, MzTreeResult};
use crate::summarization::StrategyKind;

/// Parameters of an index build plus the runtime cache size.
///
/// Leaf capacity, fan-out and representative size are fixed at build time
/// and recorded in the index header; reopening an index uses the recorded
/// values and only honours `cache_pages` from the config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MzTreeConfig {
    leaf_capacity: usize,
    fan_out: usize,
    representative_size: usize,
    cache_pages: usize,
    partition_points: usize,
    strategy: StrategyKind,
    store_payload: bool,
    track_intensity_ranking: bool,
    destination: Option<PathBuf>,
}

impl MzTreeConfig {
    /// Creates a configuration with default values:
    /// - 4096 points per leaf, 16 children per internal node
    /// - 512 representatives per node
    /// - 1024 cached pages
    /// - 2,000,000 points buffered per partition
    /// - weighted striding, payload and intensity ranking stored
    pub fn new() -> Self {
        Self {
            leaf_capacity: DEFAULT_LEAF_CAPACITY,
            fan_out: DEFAULT_FAN_OUT,
            representative_size: DEFAULT_REPRESENTATIVE_SIZE,
            cache_pages: DEFAULT_CACHE_PAGES,
            partition_points: DEFAULT_PARTITION_POINTS,
            strategy: StrategyKind::default(),
            store_payload: true,
            track_intensity_ranking: true,
            destination: None,
        }
    }

    pub fn leaf_capacity(&self) -> usize {
        self.leaf_capacity
    }

    pub fn fan_out(&self) -> usize {
        self.fan_out
    }

    pub fn representative_size(&self) -> usize {
        self.representative_size
    }

    pub fn cache_pages(&self) -> usize {
        self.cache_pages
    }

    pub fn partition_points(&self) -> usize {
        self.partition_points
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn store_payload(&self) -> bool {
        self.store_payload
    }

    pub fn track_intensity_ranking(&self) -> bool {
        self.track_intensity_ranking
    }

    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    pub(crate) fn set_strategy(&mut self, strategy: StrategyKind) {
        self.strategy = strategy;
    }

    /// Checks every parameter, naming the first offending one.
    pub fn validate(&self) -> MzTreeResult<()> {
        if self.leaf_capacity == 0 {
            return Err(invalid("leaf_capacity must be at least 1"));
        }
        if self.fan_out < 2 || self.fan_out > MAX_FAN_OUT {
            return Err(invalid(format!(
                "fan_out must be between 2 and {}, got {}",
                MAX_FAN_OUT, self.fan_out
            )));
        }
        if self.representative_size == 0 {
            return Err(invalid("representative_size must be at least 1"));
        }
        if self.cache_pages == 0 {
            return Err(invalid("cache_pages must be at least 1"));
        }
        if self.partition_points < self.leaf_capacity {
            return Err(invalid(format!(
                "partition_points ({}) must be at least leaf_capacity ({})",
                self.partition_points, self.leaf_capacity
            )));
        }
        if !self.store_payload && self.strategy.strategy().needs_payload() {
            return Err(invalid(format!(
                "strategy '{}' needs the payload column; enable store_payload",
                self.strategy
            )));
        }
        if !self.store_payload && self.track_intensity_ranking {
            return Err(invalid(
                "track_intensity_ranking needs the payload column; enable store_payload",
            ));
        }
        Ok(())
    }
}

impl Default for MzTreeConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(msg: impl Into<String>) -> MzTreeError {
    MzTreeError::InvalidParameter(msg.into())
}

/// Fluent builder for [`MzTree`] handles.
///
/// Presets set several parameters at once; later calls override them.
///
/// # Example
///
/// ```rust,no_run
/// use mztree::{MzTree, StrategyKind};
///
/// # fn main() -> mztree::MzTreeResult<()> {
/// let tree = MzTree::builder()
///     .visualization_preset()
///     .strategy(StrategyKind::WeightedStriding)
///     .cache_pages(2048)
///     .build()?;
/// tree.load("/data/run42.csv", StrategyKind::WeightedStriding)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MzTreeBuilder {
    config: MzTreeConfig,
}

impl MzTreeBuilder {
    pub fn new() -> Self {
        Self {
            config: MzTreeConfig::new(),
        }
    }

    /// Small partitions, leaves and cache for memory-constrained machines.
    pub fn low_memory_preset(self) -> Self {
        self.leaf_capacity(2048)
            .representative_size(256)
            .cache_pages(64)
            .partition_points(250_000)
    }

    /// Larger representative subsets and cache for interactive viewers,
    /// trading index size for smoother level-of-detail views.
    pub fn visualization_preset(self) -> Self {
        self.leaf_capacity(8192)
            .representative_size(2048)
            .cache_pages(4096)
    }

    pub fn leaf_capacity(mut self, leaf_capacity: usize) -> Self {
        self.config.leaf_capacity = leaf_capacity;
        self
    }

    pub fn fan_out(mut self, fan_out: usize) -> Self {
        self.config.fan_out = fan_out;
        self
    }

    pub fn representative_size(mut self, representative_size: usize) -> Self {
        self.config.representative_size = representative_size;
        self
    }

    pub fn cache_pages(mut self, cache_pages: usize) -> Self {
        self.config.cache_pages = cache_pages;
        self
    }

    pub fn partition_points(mut self, partition_points: usize) -> Self {
        self.config.partition_points = partition_points;
        self
    }

    pub fn strategy(mut self, strategy: StrategyKind) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn store_payload(mut self, store_payload: bool) -> Self {
        self.config.store_payload = store_payload;
        self
    }

    pub fn track_intensity_ranking(mut self, track: bool) -> Self {
        self.config.track_intensity_ranking = track;
        self
    }

    /// Base path of the index built when `load` is given a raw input file.
    pub fn destination(mut self, path: impl AsRef<Path>) -> Self {
        self.config.destination = Some(path.as_ref().to_path_buf());
        self
    }

    /// Validates and returns the configuration.
    pub fn config(self) -> MzTreeResult<MzTreeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Creates an unloaded tree handle with this configuration.
    pub fn build(self) -> MzTreeResult<MzTree> {
        Ok(MzTree::new(self.config()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MzTreeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.leaf_capacity(), DEFAULT_LEAF_CAPACITY);
        assert_eq!(config.fan_out(), DEFAULT_FAN_OUT);
        assert_eq!(config.strategy(), StrategyKind::WeightedStriding);
        assert!(config.store_payload());
        assert!(config.destination().is_none());
    }

    #[test]
    fn test_low_memory_preset() {
        let config = MzTreeBuilder::new().low_memory_preset().config().unwrap();
        assert_eq!(config.leaf_capacity(), 2048);
        assert_eq!(config.representative_size(), 256);
        assert_eq!(config.cache_pages(), 64);
        assert_eq!(config.partition_points(), 250_000);
    }

    #[test]
    fn test_preset_override() {
        let config = MzTreeBuilder::new()
            .visualization_preset()
            .cache_pages(10)
            .config()
            .unwrap();
        assert_eq!(config.cache_pages(), 10);
        assert_eq!(config.representative_size(), 2048);
    }

    #[test]
    fn test_rejects_zero_leaf_capacity() {
        let err = MzTreeBuilder::new().leaf_capacity(0).config().unwrap_err();
        assert!(err.to_string().contains("leaf_capacity"));
    }

    #[test]
    fn test_rejects_degenerate_fan_out() {
        assert!(MzTreeBuilder::new().fan_out(1).config().is_err());
        assert!(MzTreeBuilder::new().fan_out(MAX_FAN_OUT + 1).config().is_err());
        assert!(MzTreeBuilder::new().fan_out(2).config().is_ok());
    }

    #[test]
    fn test_rejects_small_partitions() {
        let err = MzTreeBuilder::new()
            .leaf_capacity(1000)
            .partition_points(999)
            .config()
            .unwrap_err();
        assert!(matches!(err, MzTreeError::InvalidParameter(_)));
    }

    #[test]
    fn test_payload_requirements() {
        let err = MzTreeBuilder::new()
            .store_payload(false)
            .track_intensity_ranking(false)
            .strategy(StrategyKind::WeightedStriding)
            .config()
            .unwrap_err();
        assert!(err.to_string().contains("weighted-striding"));

        let err = MzTreeBuilder::new()
            .store_payload(false)
            .strategy(StrategyKind::UniformStriding)
            .config()
            .unwrap_err();
        assert!(err.to_string().contains("track_intensity_ranking"));

        assert!(MzTreeBuilder::new()
            .store_payload(false)
            .track_intensity_ranking(false)
            .strategy(StrategyKind::UniformStriding)
            .config()
            .is_ok());
    }
}
