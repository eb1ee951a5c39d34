//! Point stream read from CSV rows `mz,rt,intensity[,label]`.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, Trim};

use crate::errors::{MzTreeError, MzTreeResult};
use crate::point::{Label, MsPoint};

/// Iterator of points parsed from CSV.
///
/// A first row whose first field is not a number is taken as a header and
/// skipped. An empty or missing label field means unlabeled. Malformed rows
/// yield [`MzTreeError::MalformedInput`] naming the line.
pub struct CsvPointSource<R: Read> {
    records: StringRecordsIntoIter<R>,
    line: u64,
    seen_row: bool,
    remaining: Option<u64>,
}

impl CsvPointSource<BufReader<File>> {
    /// Opens `path` after one counting pass, so the source reports its
    /// exact length. A file that cannot be fully scanned reports none.
    pub fn open(path: impl AsRef<Path>) -> MzTreeResult<Self> {
        let path = path.as_ref();
        let rows = Self::from_reader(BufReader::new(File::open(path)?)).count_rows();
        let mut source = Self::from_reader(BufReader::new(File::open(path)?));
        source.remaining = rows;
        Ok(source)
    }
}

impl<R: Read> CsvPointSource<R> {
    pub fn from_reader(reader: R) -> Self {
        let records = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .comment(Some(b'#'))
            .from_reader(reader)
            .into_records();
        Self {
            records,
            line: 0,
            seen_row: false,
            remaining: None,
        }
    }

    /// Next data row, skipping blank lines and a leading header.
    fn next_row(&mut self) -> Option<csv::Result<StringRecord>> {
        loop {
            let record = match self.records.next()? {
                Ok(record) => record,
                Err(err) => return Some(Err(err)),
            };
            self.line = record
                .position()
                .map(|p| p.line())
                .unwrap_or(self.line + 1);

            if record.iter().all(str::is_empty) {
                continue;
            }
            let first = !self.seen_row;
            self.seen_row = true;
            if first && looks_like_header(&record) {
                continue;
            }
            return Some(Ok(record));
        }
    }

    fn count_rows(mut self) -> Option<u64> {
        let mut rows = 0;
        while let Some(row) = self.next_row() {
            row.ok()?;
            rows += 1;
        }
        Some(rows)
    }

    fn parse(&self, record: &StringRecord) -> MzTreeResult<MsPoint> {
        if record.len() < 3 {
            return Err(self.malformed(format!(
                "expected at least 3 fields (mz,rt,intensity), found {}",
                record.len()
            )));
        }
        let mz: f64 = self.field(record, 0, "m/z")?;
        let rt: f32 = self.field(record, 1, "rt")?;
        let intensity: f32 = self.field(record, 2, "intensity")?;
        let label = match record.get(3) {
            Some(value) if !value.is_empty() => Some(
                value
                    .parse::<Label>()
                    .map_err(|_| self.malformed(format!("invalid label '{}'", value)))?,
            ),
            _ => None,
        };
        Ok(MsPoint::new(mz, rt, intensity).with_label(label))
    }

    fn field<T: std::str::FromStr>(&self, record: &StringRecord, index: usize, name: &str) -> MzTreeResult<T> {
        let value = record.get(index).unwrap_or_default();
        value
            .parse::<T>()
            .map_err(|_| self.malformed(format!("invalid {} '{}'", name, value)))
    }

    fn malformed(&self, detail: String) -> MzTreeError {
        MzTreeError::MalformedInput {
            line: self.line,
            detail,
        }
    }
}

fn looks_like_header(record: &StringRecord) -> bool {
    record
        .get(0)
        .map(|field| field.parse::<f64>().is_err())
        .unwrap_or(false)
}

impl<R: Read> Iterator for CsvPointSource<R> {
    type Item = MzTreeResult<MsPoint>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.next_row()?;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        Some(match row {
            Ok(record) => self.parse(&record),
            Err(err) => Err(err.into()),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.remaining.map(usize::try_from) {
            Some(Ok(remaining)) => (remaining, Some(remaining)),
            _ => (0, None),
        }
    }
}
