use serde::{Deserialize, Serialize};

use crate::errors::{Axis, MzTreeError, MzTreeResult};

/// A bounding rectangle in (m/z, retention time) space.
///
/// Bounds are inclusive on both ends. An empty rectangle has inverted
/// bounds and intersects nothing; expanding it by a point yields the
/// degenerate rectangle around that point.
///
/// # Examples
///
/// ```rust
/// use mztree::Rect;
///
/// let viewport = Rect::new(100.0, 1000.0, 0.0, 60.0);
/// assert!(viewport.contains_point(400.0, 12.5));
/// assert!(!viewport.contains_point(1200.0, 12.5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub mz_min: f64,
    pub mz_max: f64,
    pub rt_min: f32,
    pub rt_max: f32,
}

impl Rect {
    pub fn new(mz_min: f64, mz_max: f64, rt_min: f32, rt_max: f32) -> Self {
        Self {
            mz_min,
            mz_max,
            rt_min,
            rt_max,
        }
    }

    /// Builds a query rectangle, rejecting reversed or non-finite bounds.
    pub fn try_new(mz_min: f64, mz_max: f64, rt_min: f32, rt_max: f32) -> MzTreeResult<Self> {
        if mz_min.is_nan() || mz_max.is_nan() || rt_min.is_nan() || rt_max.is_nan() {
            return Err(MzTreeError::InvalidParameter(format!(
                "query bounds must not be NaN (m/z {}..{}, rt {}..{})",
                mz_min, mz_max, rt_min, rt_max
            )));
        }
        if mz_min > mz_max {
            return Err(MzTreeError::InvalidRange {
                axis: Axis::Mz,
                min: mz_min,
                max: mz_max,
            });
        }
        if rt_min > rt_max {
            return Err(MzTreeError::InvalidRange {
                axis: Axis::Rt,
                min: rt_min as f64,
                max: rt_max as f64,
            });
        }
        Ok(Self::new(mz_min, mz_max, rt_min, rt_max))
    }

    /// The rectangle covering all of (m/z, rt) space.
    pub fn everything() -> Self {
        Self::new(f64::NEG_INFINITY, f64::INFINITY, f32::NEG_INFINITY, f32::INFINITY)
    }

    pub fn empty() -> Self {
        Self::new(f64::INFINITY, f64::NEG_INFINITY, f32::INFINITY, f32::NEG_INFINITY)
    }

    pub fn is_empty(&self) -> bool {
        self.mz_min > self.mz_max || self.rt_min > self.rt_max
    }

    pub fn contains_point(&self, mz: f64, rt: f32) -> bool {
        mz >= self.mz_min && mz <= self.mz_max && rt >= self.rt_min && rt <= self.rt_max
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !(self.is_empty()
            || other.is_empty()
            || self.mz_max < other.mz_min
            || self.mz_min > other.mz_max
            || self.rt_max < other.rt_min
            || self.rt_min > other.rt_max)
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.is_empty()
            || (self.mz_min <= other.mz_min
                && self.mz_max >= other.mz_max
                && self.rt_min <= other.rt_min
                && self.rt_max >= other.rt_max)
    }

    pub fn expand_point(&mut self, mz: f64, rt: f32) {
        self.mz_min = self.mz_min.min(mz);
        self.mz_max = self.mz_max.max(mz);
        self.rt_min = self.rt_min.min(rt);
        self.rt_max = self.rt_max.max(rt);
    }

    pub fn expand(&mut self, other: &Rect) {
        if other.is_empty() {
            return;
        }
        self.mz_min = self.mz_min.min(other.mz_min);
        self.mz_max = self.mz_max.max(other.mz_max);
        self.rt_min = self.rt_min.min(other.rt_min);
        self.rt_max = self.rt_max.max(other.rt_max);
    }

    pub fn merge(&self, other: &Rect) -> Rect {
        let mut merged = *self;
        merged.expand(other);
        merged
    }

    pub fn mz_span(&self) -> f64 {
        (self.mz_max - self.mz_min).max(0.0)
    }

    pub fn rt_span(&self) -> f64 {
        (self.rt_max as f64 - self.rt_min as f64).max(0.0)
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.mz_min + self.mz_max) / 2.0,
            (self.rt_min as f64 + self.rt_max as f64) / 2.0,
        )
    }
}

impl Default for Rect {
    fn default() -> Self {
        Self::empty()
    }
}
