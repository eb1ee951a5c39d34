//! CSV input and output.

mod csv_export;
mod csv_source;

pub use csv_export::{CsvExporter, CSV_HEADER};
pub use csv_source::CsvPointSource;

use std::path::Path;

/// Whether `path` names a CSV point source.
pub fn is_csv_source(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}
