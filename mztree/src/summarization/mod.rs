//! Summarization strategies that reduce a point set to a bounded,
//! representative subset.
//!
//! A strategy runs once per leaf (over the leaf's raw points) and once per
//! internal node (over the union of its children's representatives) while
//! the tree is built. Every strategy here is deterministic and only ever
//! selects among its input, so representatives are always real points.

mod intensity_cutoff;
mod uniform_striding;
mod weighted_striding;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::MzTreeError;
use crate::point::PointId;

pub use intensity_cutoff::IntensityCutoff;
pub use uniform_striding::UniformStriding;
pub use weighted_striding::WeightedStriding;

/// A point chosen to stand in for a node's contents.
///
/// `child` records which child of an internal node the point came from,
/// letting a query reuse a parent's representatives for the children it
/// decides not to expand. It is zero for leaf representatives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Representative {
    pub id: PointId,
    pub mz: f64,
    pub rt: f32,
    pub intensity: f32,
    pub child: u16,
}

impl Representative {
    pub(crate) fn weight(&self) -> f64 {
        if self.intensity.is_finite() && self.intensity > 0.0 {
            self.intensity as f64
        } else {
            0.0
        }
    }
}

/// Capability interface for representative-subset selection.
pub trait SummarizationStrategy: Send + Sync + fmt::Debug {
    /// Tag persisted in the index header.
    fn kind(&self) -> StrategyKind;

    /// Returns at most `target` points drawn from `points`.
    ///
    /// Must be deterministic for identical input and must never invent
    /// points. Inputs no larger than `target` are returned whole.
    fn reduce(&self, points: Vec<Representative>, target: usize) -> Vec<Representative>;

    /// Whether the strategy's output depends on intensity, which makes the
    /// payload column mandatory.
    fn needs_payload(&self) -> bool {
        true
    }
}

/// Serializable identifier of a summarization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StrategyKind {
    #[default]
    WeightedStriding,
    UniformStriding,
    IntensityCutoff,
}

impl StrategyKind {
    pub fn strategy(&self) -> Box<dyn SummarizationStrategy> {
        match self {
            StrategyKind::WeightedStriding => Box::new(WeightedStriding::default()),
            StrategyKind::UniformStriding => Box::new(UniformStriding),
            StrategyKind::IntensityCutoff => Box::new(IntensityCutoff),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::WeightedStriding => "weighted-striding",
            StrategyKind::UniformStriding => "uniform-striding",
            StrategyKind::IntensityCutoff => "intensity-cutoff",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = MzTreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weighted-striding" | "weighted_striding" | "weighted" => {
                Ok(StrategyKind::WeightedStriding)
            }
            "uniform-striding" | "uniform_striding" | "uniform" => Ok(StrategyKind::UniformStriding),
            "intensity-cutoff" | "intensity_cutoff" | "cutoff" => Ok(StrategyKind::IntensityCutoff),
            other => Err(MzTreeError::InvalidParameter(format!(
                "unknown summarization strategy '{}'",
                other
            ))),
        }
    }
}

/// Sorts points along the axis with the larger relative extent, breaking
/// ties on the other axis and then on address so the order is total.
pub(crate) fn sort_along_dominant_axis(points: &mut [Representative]) {
    if points.len() < 2 {
        return;
    }

    let (mut mz_min, mut mz_max) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut rt_min, mut rt_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for p in points.iter() {
        mz_min = mz_min.min(p.mz);
        mz_max = mz_max.max(p.mz);
        rt_min = rt_min.min(p.rt as f64);
        rt_max = rt_max.max(p.rt as f64);
    }
    let mz_extent = (mz_max - mz_min) / mz_max.abs().max(1.0);
    let rt_extent = (rt_max - rt_min) / rt_max.abs().max(1.0);

    if rt_extent > mz_extent {
        points.sort_by(|a, b| {
            a.rt.total_cmp(&b.rt)
                .then(a.mz.total_cmp(&b.mz))
                .then(a.id.cmp(&b.id))
        });
    } else {
        points.sort_by(|a, b| {
            a.mz.total_cmp(&b.mz)
                .then(a.rt.total_cmp(&b.rt))
                .then(a.id.cmp(&b.id))
        });
    }
}

/// Picks `count` evenly spaced positions out of `len` (`count <= len`).
pub(crate) fn even_positions(len: usize, count: usize) -> impl Iterator<Item = usize> {
    (0..count).map(move |k| k * len / count)
}

pub(crate) fn by_intensity_desc(a: &Representative, b: &Representative) -> Ordering {
    b.intensity.total_cmp(&a.intensity).then(a.id.cmp(&b.id))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_strategy_kind_round_trips_through_name() {
        for kind in [
            StrategyKind::WeightedStriding,
            StrategyKind::UniformStriding,
            StrategyKind::IntensityCutoff,
        ] {
            assert_eq!(kind.name().parse::<StrategyKind>().unwrap(), kind);
            assert_eq!(kind.strategy().kind(), kind);
        }
        assert!("reservoir".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_dominant_axis_prefers_wider_extent() {
        // narrow m/z window, long gradient: ordering follows rt
        let mut points = vec![
            rep(0, 500.2, 40.0, 1.0),
            rep(1, 500.1, 10.0, 1.0),
            rep(2, 500.3, 25.0, 1.0),
        ];
        sort_along_dominant_axis(&mut points);
        let ids: Vec<u64> = points.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 0]);

        // single scan: ordering follows m/z
        let mut points = vec![rep(0, 900.0, 5.0, 1.0), rep(1, 150.0, 5.0, 1.0)];
        sort_along_dominant_axis(&mut points);
        assert_eq!(points[0].id, 1);
    }

    #[test]
    fn test_even_positions_are_distinct_and_in_range() {
        let picks: Vec<usize> = even_positions(10, 4).collect();
        assert_eq!(picks, vec![0, 2, 5, 7]);
        let picks: Vec<usize> = even_positions(5, 5).collect();
        assert_eq!(picks, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_all_strategies_are_valid_and_deterministic() {
        let input = random_reps(2000, 7);
        for kind in [
            StrategyKind::WeightedStriding,
            StrategyKind::UniformStriding,
            StrategyKind::IntensityCutoff,
        ] {
            let strategy = kind.strategy();
            let a = strategy.reduce(input.clone(), 128);
            let b = strategy.reduce(input.clone(), 128);
            assert_eq!(a.len(), 128, "{kind}");
            assert_eq!(a, b, "{kind} must be deterministic");
            assert_valid_subset(&input, &a, 128);
        }
    }

    #[test]
    fn test_small_input_returned_whole() {
        let input = random_reps(10, 1);
        for kind in [
            StrategyKind::WeightedStriding,
            StrategyKind::UniformStriding,
            StrategyKind::IntensityCutoff,
        ] {
            let out = kind.strategy().reduce(input.clone(), 10);
            assert_eq!(out.len(), 10);
        }
    }

    #[test]
    fn test_zero_target_yields_nothing() {
        let input = random_reps(10, 1);
        assert!(WeightedStriding::default().reduce(input.clone(), 0).is_empty());
        assert!(UniformStriding.reduce(input.clone(), 0).is_empty());
        assert!(IntensityCutoff.reduce(input, 0).is_empty());
    }
}
