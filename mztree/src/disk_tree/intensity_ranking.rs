//! Intensity ranking: `<base>-ranking`.
//!
//! Annotation passes typically work from the most intense unlabeled point
//! downwards. The ranking file makes that cheap without a global sort: the
//! builder writes one run of point addresses per partition, each ordered by
//! descending intensity, and readers merge the run heads.
//!
//! Layout: `[u64 ids of run 0][u64 ids of run 1]...[bincode run table][u64 table offset]`

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::page_store::PointReader;
use crate::errors::{MzTreeError, MzTreeResult};
use crate::point::{MsPoint, PointId, PointRange};

const ENTRY_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct RankingRun {
    /// Index of the run's first entry
    start: u64,
    len: u64,
}

/// Build-time writer of the ranking file.
pub struct RankingWriter {
    file: BufWriter<File>,
    path: PathBuf,
    runs: Vec<RankingRun>,
    entries: u64,
}

impl RankingWriter {
    pub fn create(path: &Path) -> MzTreeResult<Self> {
        Ok(Self {
            file: BufWriter::new(File::create(path)?),
            path: path.to_path_buf(),
            runs: Vec::new(),
            entries: 0,
        })
    }

    /// Writes one run covering `points`, which must already carry their
    /// page-store addresses.
    pub fn append_run(&mut self, points: &[MsPoint]) -> MzTreeResult<()> {
        if points.is_empty() {
            return Ok(());
        }
        let mut order: Vec<(f32, PointId)> = points.iter().map(|p| (p.intensity, p.id)).collect();
        order.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        for (_, id) in &order {
            self.file.write_all(&id.to_le_bytes())?;
        }
        self.runs.push(RankingRun {
            start: self.entries,
            len: order.len() as u64,
        });
        self.entries += order.len() as u64;
        Ok(())
    }

    pub fn finish(mut self) -> MzTreeResult<()> {
        let table = bincode::serde::encode_to_vec(&self.runs, bincode::config::legacy())
            .map_err(MzTreeError::serialization)?;
        let table_offset = self.entries * ENTRY_SIZE as u64;
        self.file.write_all(&table)?;
        self.file.write_all(&table_offset.to_le_bytes())?;
        let file = self
            .file
            .into_inner()
            .map_err(|e| MzTreeError::Io(e.into_error()))?;
        file.sync_all()?;
        log::debug!(
            "Wrote intensity ranking {:?} ({} runs, {} entries)",
            self.path,
            self.runs.len(),
            self.entries
        );
        Ok(())
    }
}

/// Read side of the ranking file with per-run cursors.
///
/// A run's cursor only moves past points that were labeled when it was
/// last advanced. Anything that removes labels must call
/// [`IntensityRanking::reset_cursors`].
pub struct IntensityRanking {
    map: Mmap,
    runs: Vec<RankingRun>,
    entries: u64,
    cursors: Mutex<Vec<u64>>,
}

impl IntensityRanking {
    pub fn open(path: &Path, expected_points: u64) -> MzTreeResult<Self> {
        let file = File::open(path)?;
        // SAFETY: the ranking file is written once by the build and never
        // modified afterwards.
        let map = unsafe { Mmap::map(&file)? };
        if map.len() < ENTRY_SIZE {
            return Err(MzTreeError::corruption(path, "ranking file is truncated"));
        }

        let tail = map.len() - ENTRY_SIZE;
        let mut offset = [0u8; ENTRY_SIZE];
        offset.copy_from_slice(&map[tail..]);
        let table_offset = u64::from_le_bytes(offset) as usize;
        if table_offset > tail || table_offset % ENTRY_SIZE != 0 {
            return Err(MzTreeError::corruption(
                path,
                format!("run table offset {} is invalid", table_offset),
            ));
        }

        let (runs, _): (Vec<RankingRun>, usize) =
            bincode::serde::decode_from_slice(&map[table_offset..tail], bincode::config::legacy())
                .map_err(|e| MzTreeError::corruption(path, format!("run table undecodable: {}", e)))?;

        let entries = (table_offset / ENTRY_SIZE) as u64;
        let mut next = 0u64;
        for run in &runs {
            if run.start != next {
                return Err(MzTreeError::corruption(
                    path,
                    format!("run at entry {} does not follow entry {}", run.start, next),
                ));
            }
            next += run.len;
        }
        if next != entries || entries != expected_points {
            return Err(MzTreeError::corruption(
                path,
                format!(
                    "ranking covers {} points, index holds {}",
                    entries, expected_points
                ),
            ));
        }

        Ok(Self {
            map,
            cursors: Mutex::new(vec![0; runs.len()]),
            runs,
            entries,
        })
    }

    fn entry(&self, index: u64) -> PointId {
        let at = index as usize * ENTRY_SIZE;
        let mut buf = [0u8; ENTRY_SIZE];
        buf.copy_from_slice(&self.map[at..at + ENTRY_SIZE]);
        u64::from_le_bytes(buf)
    }

    /// The most intense unlabeled point, ties broken by lower address.
    pub fn highest_unlabeled(&self, reader: &PointReader<'_>) -> MzTreeResult<Option<MsPoint>> {
        let mut cursors = self.cursors.lock();
        let mut best: Option<(f32, PointId)> = None;

        for (run, cursor) in self.runs.iter().zip(cursors.iter_mut()) {
            while *cursor < run.len {
                let id = self.entry(run.start + *cursor);
                let (intensity, label) = reader.payload(id)?;
                if label.is_some() {
                    *cursor += 1;
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((top, top_id)) => intensity > top || (intensity == top && id < top_id),
                };
                if better {
                    best = Some((intensity, id));
                }
                break;
            }
        }
        drop(cursors);

        match best {
            Some((_, id)) => Ok(reader
                .read(PointRange::new(id, 1))?
                .into_iter()
                .next()),
            None => Ok(None),
        }
    }

    /// Fraction of points the cursors have moved past, i.e. labeled points
    /// at the intense end of every run. 1.0 for an empty index.
    pub fn labeling_progress(&self, reader: &PointReader<'_>) -> MzTreeResult<f64> {
        // advancing the cursors is a side effect of the search
        self.highest_unlabeled(reader)?;
        if self.entries == 0 {
            return Ok(1.0);
        }
        let passed: u64 = self.cursors.lock().iter().sum();
        Ok(passed as f64 / self.entries as f64)
    }

    pub fn reset_cursors(&self) {
        self.cursors.lock().iter_mut().for_each(|c| *c = 0);
    }
}
