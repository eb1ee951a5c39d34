//! The point record and its on-disk address.

use serde::{Deserialize, Serialize};

/// Address of a point in the page store: its position in append order.
pub type PointId = u64;

/// Label attached to a point by an annotation pass (trace, cluster, ...).
pub type Label = u32;

/// Largest label value that can be stored; the encoding reserves one slot
/// for "unlabeled".
pub const MAX_LABEL: Label = u32::MAX - 1;

/// A single mass-spectrometry observation.
///
/// `id` is assigned by the page store when the point is appended during a
/// build; points handed to the builder may carry any value there.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MsPoint {
    pub id: PointId,
    pub mz: f64,
    pub rt: f32,
    pub intensity: f32,
    pub label: Option<Label>,
}

impl MsPoint {
    /// Creates an unlabeled point awaiting an address.
    pub fn new(mz: f64, rt: f32, intensity: f32) -> Self {
        Self {
            id: 0,
            mz,
            rt,
            intensity,
            label: None,
        }
    }

    pub fn with_label(mut self, label: Option<Label>) -> Self {
        self.label = label;
        self
    }

    /// Key used to compare point multisets independent of address and label.
    pub fn geometry_key(&self) -> (u64, u32, u32) {
        (self.mz.to_bits(), self.rt.to_bits(), self.intensity.to_bits())
    }
}

/// Contiguous run of records in the page store, referenced by a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointRange {
    pub offset: PointId,
    pub count: u64,
}

impl PointRange {
    pub fn new(offset: PointId, count: u64) -> Self {
        Self { offset, count }
    }

    pub fn end(&self) -> PointId {
        self.offset + self.count
    }

    pub fn contains(&self, id: PointId) -> bool {
        id >= self.offset && id < self.end()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

pub(crate) fn encode_label(label: Option<Label>) -> u32 {
    match label {
        Some(value) => value + 1,
        None => 0,
    }
}

pub(crate) fn decode_label(raw: u32) -> Option<Label> {
    raw.checked_sub(1)
}
