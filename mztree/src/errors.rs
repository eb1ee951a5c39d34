//! Error types shared by every component of the index.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::import_state::ImportStatus;

/// Spatial axis named in range validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Mz,
    Rt,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Mz => write!(f, "m/z"),
            Axis::Rt => write!(f, "rt"),
        }
    }
}

/// Errors that can occur while building, opening, querying or annotating an index
#[derive(Debug, Error)]
pub enum MzTreeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Build failed for {}: {reason}", path.display())]
    BuildFailure { path: PathBuf, reason: String },

    #[error("Invalid range on {axis}: min {min} is greater than max {max}")]
    InvalidRange { axis: Axis, min: f64, max: f64 },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Index is not ready (import status: {0})")]
    NotReady(ImportStatus),

    #[error("Tree is closed")]
    Closed,

    #[error("Corruption detected in {}: {detail}", file.display())]
    Corruption { file: PathBuf, detail: String },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Malformed input at line {line}: {detail}")]
    MalformedInput { line: u64, detail: String },
}

impl MzTreeError {
    pub(crate) fn corruption(file: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        let err = MzTreeError::Corruption {
            file: file.into(),
            detail: detail.into(),
        };
        log::error!("{}", err);
        err
    }

    pub(crate) fn serialization(err: impl fmt::Display) -> Self {
        MzTreeError::Serialization(err.to_string())
    }

    /// Whether the error signals on-disk inconsistency rather than a caller mistake
    pub fn is_corruption(&self) -> bool {
        matches!(self, MzTreeError::Corruption { .. })
    }
}

/// Result type for index operations
pub type MzTreeResult<T> = Result<T, MzTreeError>;
