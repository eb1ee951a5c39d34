//! Hilbert-curve ordering of node rectangles.
//!
//! Sibling grouping during the bottom-up build sorts nodes by the Hilbert
//! key of their rectangle centers, so nodes adjacent in (m/z, rt) space
//! tend to land under the same parent.

use crate::rect::Rect;

/// Curve order used for node keys (2^16 cells per axis).
pub const DEFAULT_ORDER: u32 = 16;

const MAX_ORDER: u32 = 32;

/// Maps positions inside a fixed extent onto a Hilbert curve.
#[derive(Debug, Clone, Copy)]
pub struct HilbertCurve {
    extent: Rect,
    order: u32,
}

impl HilbertCurve {
    pub fn new(extent: Rect, order: u32) -> Self {
        debug_assert!(order > 0 && order <= MAX_ORDER, "order must be 1-32");
        Self { extent, order }
    }

    /// Key of the rectangle's center.
    pub fn key(&self, rect: &Rect) -> u64 {
        let (mz, rt) = rect.center();
        self.key_of(mz, rt)
    }

    /// Key of an absolute (m/z, rt) position; positions outside the extent
    /// are clamped onto its border.
    pub fn key_of(&self, mz: f64, rt: f64) -> u64 {
        let x = normalize(mz, self.extent.mz_min, self.extent.mz_max);
        let y = normalize(rt, self.extent.rt_min as f64, self.extent.rt_max as f64);
        unit_key(x, y, self.order)
    }
}

fn normalize(value: f64, min: f64, max: f64) -> f64 {
    let range = max - min;
    if range > 0.0 && range.is_finite() {
        ((value - min) / range).clamp(0.0, 1.0)
    } else {
        0.5
    }
}

/// Key of a position in the unit square.
fn unit_key(x: f64, y: f64, order: u32) -> u64 {
    let n = 1u64 << order;
    let xi = ((x * (n as f64 - 0.5)) as u64).min(n - 1);
    let yi = ((y * (n as f64 - 0.5)) as u64).min(n - 1);
    xy2d(n, xi, yi)
}

/// Grid cell to distance along the curve.
fn xy2d(n: u64, mut x: u64, mut y: u64) -> u64 {
    let mut d = 0u64;
    let mut s = n / 2;

    while s > 0 {
        let rx = ((x & s) > 0) as u64;
        let ry = ((y & s) > 0) as u64;
        d += s * s * ((3 * rx) ^ ry);
        if ry == 0 {
            if rx == 1 {
                x = n.wrapping_sub(1).wrapping_sub(x);
                y = n.wrapping_sub(1).wrapping_sub(y);
            }
            std::mem::swap(&mut x, &mut y);
        }
        s /= 2;
    }

    d
}
