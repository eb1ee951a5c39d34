//! Export of query results as CSV rows `mz,rt,intensity,label`.

use std::io::Write;

use csv::WriterBuilder;

use crate::errors::{MzTreeError, MzTreeResult};
use crate::point::MsPoint;

pub const CSV_HEADER: [&str; 4] = ["mz", "rt", "intensity", "label"];

/// Streaming CSV writer for points. Unlabeled points get an empty label
/// field, so an export can be loaded again as an index source.
pub struct CsvExporter<W: Write> {
    writer: csv::Writer<W>,
    rows: u64,
}

impl<W: Write> CsvExporter<W> {
    /// Creates the exporter and writes the header row.
    pub fn new(writer: W) -> MzTreeResult<Self> {
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(writer);
        writer.write_record(CSV_HEADER)?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn write_point(&mut self, point: &MsPoint) -> MzTreeResult<()> {
        let label = point.label.map(|l| l.to_string()).unwrap_or_default();
        self.writer.write_record([
            point.mz.to_string(),
            point.rt.to_string(),
            point.intensity.to_string(),
            label,
        ])?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flushes and returns the number of rows written.
    pub fn finish(mut self) -> MzTreeResult<u64> {
        self.writer.flush().map_err(MzTreeError::Io)?;
        Ok(self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::CsvPointSource;

    #[test]
    fn test_writes_header_and_rows() {
        let mut out = Vec::new();
        {
            let mut exporter = CsvExporter::new(&mut out).unwrap();
            exporter.write_point(&MsPoint::new(100.5, 1.25, 300.0)).unwrap();
            exporter
                .write_point(&MsPoint::new(200.0, 2.5, 10.0).with_label(Some(4)))
                .unwrap();
            assert_eq!(exporter.finish().unwrap(), 2);
        }
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "mz,rt,intensity,label\n100.5,1.25,300,\n200,2.5,10,4\n");
    }

    #[test]
    fn test_export_reads_back() {
        let original = vec![
            MsPoint::new(123.456789, 0.001, 1e6),
            MsPoint::new(999.9, 59.75, 0.5).with_label(Some(0)),
        ];
        let mut out = Vec::new();
        {
            let mut exporter = CsvExporter::new(&mut out).unwrap();
            for point in &original {
                exporter.write_point(point).unwrap();
            }
            exporter.finish().unwrap();
        }
        let parsed: Vec<MsPoint> = CsvPointSource::from_reader(out.as_slice())
            .map(Result::unwrap)
            .collect();
        assert_eq!(parsed, original);
    }
}
