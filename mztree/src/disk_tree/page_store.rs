//! Columnar page store: `<base>-points` and `<base>-intensity`.
//!
//! Coordinates and payload live in separate files so coordinate-only
//! scans never touch payload bytes. Both are written sequentially during
//! the build by [`PointStoreWriter`] and memory-mapped afterwards by
//! [`PointStore`].
//!
//! All readers go through a [`PointReader`], which holds the store's shared
//! lock for its lifetime. Label writes and close take the exclusive side of
//! the same lock, so a reader sees either none or all of a label batch and
//! close waits for in-flight reads.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::tree_constants::{COORD_RECORD_SIZE, PAYLOAD_RECORD_SIZE};
use crate::errors::{MzTreeError, MzTreeResult};
use crate::import_state::IndexPaths;
use crate::point::{decode_label, encode_label, Label, MsPoint, PointId, PointRange};

const WRITE_BUFFER_SIZE: usize = 1 << 20;

// ============================================================================
// Build-time writer
// ============================================================================

/// Append-only writer used while the tree is built.
pub struct PointStoreWriter {
    points: BufWriter<File>,
    payload: Option<BufWriter<File>>,
    next_id: PointId,
}

impl PointStoreWriter {
    pub fn create(paths: &IndexPaths, with_payload: bool) -> MzTreeResult<Self> {
        let points = BufWriter::with_capacity(WRITE_BUFFER_SIZE, File::create(&paths.points)?);
        let payload = if with_payload {
            Some(BufWriter::with_capacity(
                WRITE_BUFFER_SIZE,
                File::create(&paths.payload)?,
            ))
        } else {
            None
        };
        Ok(Self {
            points,
            payload,
            next_id: 0,
        })
    }

    /// Appends `points` contiguously, assigning their addresses.
    pub fn append(&mut self, points: &mut [MsPoint]) -> MzTreeResult<PointRange> {
        let range = PointRange::new(self.next_id, points.len() as u64);
        for point in points.iter_mut() {
            point.id = self.next_id;
            self.next_id += 1;

            self.points.write_all(&point.mz.to_le_bytes())?;
            self.points.write_all(&point.rt.to_le_bytes())?;
            if let Some(payload) = self.payload.as_mut() {
                payload.write_all(&point.intensity.to_le_bytes())?;
                payload.write_all(&encode_label(point.label).to_le_bytes())?;
            }
        }
        Ok(range)
    }

    /// Flushes and syncs both columns, returning the number of points.
    pub fn finish(self) -> MzTreeResult<u64> {
        sync_writer(self.points)?;
        if let Some(payload) = self.payload {
            sync_writer(payload)?;
        }
        Ok(self.next_id)
    }
}

fn sync_writer(writer: BufWriter<File>) -> MzTreeResult<()> {
    let file = writer
        .into_inner()
        .map_err(|e| MzTreeError::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

// ============================================================================
// Read-side store
// ============================================================================

/// Decoded coordinates of one contiguous range
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatePage {
    pub offset: PointId,
    pub mz: Vec<f64>,
    pub rt: Vec<f32>,
}

impl CoordinatePage {
    pub fn len(&self) -> usize {
        self.mz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }

    /// (address, m/z, rt) for every point in the page
    pub fn iter(&self) -> impl Iterator<Item = (PointId, f64, f32)> + '_ {
        self.mz
            .iter()
            .zip(self.rt.iter())
            .enumerate()
            .map(move |(i, (mz, rt))| (self.offset + i as u64, *mz, *rt))
    }

    /// Approximate heap footprint in bytes.
    pub fn weight(&self) -> usize {
        self.len() * COORD_RECORD_SIZE
    }
}

struct StoreState {
    coords: Option<Mmap>,
    payload: Option<MmapMut>,
    closed: bool,
}

/// Memory-mapped columnar store of a finished index.
pub struct PointStore {
    points_path: PathBuf,
    payload_path: Option<PathBuf>,
    len: u64,
    state: RwLock<StoreState>,
}

impl PointStore {
    /// Maps the columns of an index holding `expected_len` points.
    pub fn open(paths: &IndexPaths, expected_len: u64, with_payload: bool) -> MzTreeResult<Self> {
        let coords = map_column(&paths.points, expected_len, COORD_RECORD_SIZE)?;
        let payload = if with_payload {
            map_column_mut(&paths.payload, expected_len, PAYLOAD_RECORD_SIZE)?
        } else {
            None
        };

        Ok(Self {
            points_path: paths.points.clone(),
            payload_path: with_payload.then(|| paths.payload.clone()),
            len: expected_len,
            state: RwLock::new(StoreState {
                coords,
                payload,
                closed: false,
            }),
        })
    }

    pub fn has_payload(&self) -> bool {
        self.payload_path.is_some()
    }

    /// Shared access for reads. Blocks while a label batch is applied.
    pub fn reader(&self) -> MzTreeResult<PointReader<'_>> {
        let state = self.state.read();
        if state.closed {
            return Err(MzTreeError::Closed);
        }
        Ok(PointReader { store: self, state })
    }

    /// Exclusive access for label writes. Waits for in-flight readers.
    pub fn label_writer(&self) -> MzTreeResult<LabelWriter<'_>> {
        if !self.has_payload() {
            return Err(MzTreeError::InvalidOperation(
                "index was built without a payload column; labels cannot be stored".into(),
            ));
        }
        let state = self.state.write();
        if state.closed {
            return Err(MzTreeError::Closed);
        }
        Ok(LabelWriter { store: self, state })
    }

    /// Waits for readers and writers, flushes labels and unmaps both
    /// columns. Idempotent.
    pub fn close(&self) -> MzTreeResult<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        if let Some(payload) = state.payload.as_ref() {
            payload.flush()?;
        }
        state.coords = None;
        state.payload = None;
        state.closed = true;
        Ok(())
    }

    fn check_range(&self, range: PointRange) -> MzTreeResult<()> {
        if range.end() > self.len || range.end() < range.offset {
            return Err(MzTreeError::corruption(
                &self.points_path,
                format!(
                    "range {}..{} exceeds the {} stored points",
                    range.offset,
                    range.end(),
                    self.len
                ),
            ));
        }
        Ok(())
    }

    fn check_id(&self, id: PointId) -> MzTreeResult<()> {
        self.check_range(PointRange::new(id, 1))
    }
}

fn map_column(path: &Path, expected_len: u64, record: usize) -> MzTreeResult<Option<Mmap>> {
    let file = File::open(path)?;
    check_column_len(path, &file, expected_len, record)?;
    if expected_len == 0 {
        return Ok(None);
    }
    // SAFETY: column files belong to this index and are never resized
    // after the build.
    let map = unsafe { Mmap::map(&file)? };
    Ok(Some(map))
}

fn map_column_mut(path: &Path, expected_len: u64, record: usize) -> MzTreeResult<Option<MmapMut>> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    check_column_len(path, &file, expected_len, record)?;
    if expected_len == 0 {
        return Ok(None);
    }
    // SAFETY: as above; in-place label writes go through the store's
    // exclusive lock.
    let map = unsafe { MmapMut::map_mut(&file)? };
    Ok(Some(map))
}

fn check_column_len(path: &Path, file: &File, expected_len: u64, record: usize) -> MzTreeResult<()> {
    let actual = file.metadata()?.len();
    let expected = expected_len * record as u64;
    if actual != expected {
        return Err(MzTreeError::corruption(
            path,
            format!(
                "column holds {} bytes, expected {} ({} records of {} bytes)",
                actual, expected, expected_len, record
            ),
        ));
    }
    Ok(())
}

fn le_f64(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    f64::from_le_bytes(buf)
}

fn le_f32(bytes: &[u8]) -> f32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    f32::from_le_bytes(buf)
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

// ============================================================================
// Readers and writers
// ============================================================================

/// Shared read access to a [`PointStore`].
pub struct PointReader<'a> {
    store: &'a PointStore,
    state: RwLockReadGuard<'a, StoreState>,
}

impl PointReader<'_> {
    pub fn len(&self) -> u64 {
        self.store.len
    }

    /// Reads a contiguous range with coordinates and payload.
    pub fn read(&self, range: PointRange) -> MzTreeResult<Vec<MsPoint>> {
        self.read_coordinates(range)?
            .iter()
            .map(|(id, mz, rt)| {
                let (intensity, label) = self.payload(id)?;
                Ok(MsPoint {
                    id,
                    mz,
                    rt,
                    intensity,
                    label,
                })
            })
            .collect()
    }

    /// Decodes the coordinate column over `range`.
    pub fn read_coordinates(&self, range: PointRange) -> MzTreeResult<CoordinatePage> {
        self.store.check_range(range)?;
        let mut page = CoordinatePage {
            offset: range.offset,
            mz: Vec::with_capacity(range.count as usize),
            rt: Vec::with_capacity(range.count as usize),
        };
        if range.is_empty() {
            return Ok(page);
        }

        let coords = self.state.coords.as_ref().ok_or(MzTreeError::Closed)?;
        let start = range.offset as usize * COORD_RECORD_SIZE;
        let end = range.end() as usize * COORD_RECORD_SIZE;
        for record in coords[start..end].chunks_exact(COORD_RECORD_SIZE) {
            page.mz.push(le_f64(&record[0..8]));
            page.rt.push(le_f32(&record[8..12]));
        }
        Ok(page)
    }

    /// Intensity and label of one point. Coordinate-only stores report
    /// zero intensity and no label.
    pub fn payload(&self, id: PointId) -> MzTreeResult<(f32, Option<Label>)> {
        self.store.check_id(id)?;
        let Some(payload) = self.state.payload.as_ref() else {
            return Ok((0.0, None));
        };
        let at = id as usize * PAYLOAD_RECORD_SIZE;
        let record = &payload[at..at + PAYLOAD_RECORD_SIZE];
        Ok((le_f32(&record[0..4]), decode_label(le_u32(&record[4..8]))))
    }

}

/// Exclusive label access to a [`PointStore`].
pub struct LabelWriter<'a> {
    store: &'a PointStore,
    state: RwLockWriteGuard<'a, StoreState>,
}

impl LabelWriter<'_> {
    /// Fails with `InvalidParameter` when `id` is not a stored point.
    pub fn check_id(&self, id: PointId) -> MzTreeResult<()> {
        if id >= self.store.len {
            return Err(MzTreeError::InvalidParameter(format!(
                "point {} is outside the index ({} points)",
                id, self.store.len
            )));
        }
        Ok(())
    }

    pub fn set_label(&mut self, id: PointId, label: Option<Label>) -> MzTreeResult<()> {
        self.store.check_id(id)?;
        let payload = self.state.payload.as_mut().ok_or(MzTreeError::Closed)?;
        let at = id as usize * PAYLOAD_RECORD_SIZE + 4;
        payload[at..at + 4].copy_from_slice(&encode_label(label).to_le_bytes());
        Ok(())
    }

    /// Removes `label` from every point carrying it, returning how many
    /// points changed.
    pub fn clear_label(&mut self, label: Label) -> MzTreeResult<u64> {
        let Some(payload) = self.state.payload.as_mut() else {
            return Ok(0);
        };
        let target = encode_label(Some(label)).to_le_bytes();
        let unlabeled = encode_label(None).to_le_bytes();
        let mut cleared = 0u64;
        for record in payload.chunks_exact_mut(PAYLOAD_RECORD_SIZE) {
            if record[4..8] == target {
                record[4..8].copy_from_slice(&unlabeled);
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    /// Flushes label writes to disk.
    pub fn flush(&self) -> MzTreeResult<()> {
        if let Some(payload) = self.state.payload.as_ref() {
            payload.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(n: usize) -> Vec<MsPoint> {
        (0..n)
            .map(|i| MsPoint::new(100.0 + i as f64, i as f32 * 0.5, 10.0 * i as f32))
            .collect()
    }

    fn written(paths: &IndexPaths, n: usize, with_payload: bool) -> PointStore {
        let mut writer = PointStoreWriter::create(paths, with_payload).unwrap();
        let mut points = sample(n);
        let (head, tail) = points.split_at_mut(n / 2);
        assert_eq!(writer.append(head).unwrap(), PointRange::new(0, (n / 2) as u64));
        assert_eq!(
            writer.append(tail).unwrap(),
            PointRange::new((n / 2) as u64, (n - n / 2) as u64)
        );
        assert_eq!(writer.finish().unwrap(), n as u64);
        PointStore::open(paths, n as u64, with_payload).unwrap()
    }

    #[test]
    fn test_append_assigns_addresses() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path().join("run"));
        let mut writer = PointStoreWriter::create(&paths, true).unwrap();
        let mut points = sample(3);
        writer.append(&mut points).unwrap();
        assert_eq!(points.iter().map(|p| p.id).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(writer.finish().unwrap(), 3);
    }

    #[test]
    fn test_read_all_fields() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path().join("run"));
        let store = written(&paths, 10, true);

        let reader = store.reader().unwrap();
        let points = reader.read(PointRange::new(2, 3)).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].id, 2);
        assert_eq!(points[0].mz, 102.0);
        assert_eq!(points[0].rt, 1.0);
        assert_eq!(points[0].intensity, 20.0);
        assert_eq!(points[0].label, None);
    }

    #[test]
    fn test_coordinates_skip_payload() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path().join("run"));
        let store = written(&paths, 4, true);
        let reader = store.reader().unwrap();
        let page = reader.read_coordinates(PointRange::new(0, 4)).unwrap();
        assert_eq!(page.len(), 4);
        assert_eq!(page.mz[3], 103.0);
        assert_eq!(page.rt[3], 1.5);
    }

    #[test]
    fn test_store_without_payload() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path().join("run"));
        let store = written(&paths, 4, false);
        assert!(!paths.payload.exists());
        assert!(!store.has_payload());
        assert_eq!(store.reader().unwrap().payload(1).unwrap(), (0.0, None));
        assert!(matches!(
            store.label_writer().err().unwrap(),
            MzTreeError::InvalidOperation(_)
        ));
    }

    #[test]
    fn test_out_of_bounds_range_is_corruption() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path().join("run"));
        let store = written(&paths, 10, true);
        let reader = store.reader().unwrap();
        let err = reader.read(PointRange::new(8, 5)).unwrap_err();
        assert!(err.is_corruption());
        assert!(err.to_string().contains("8..13"));
        assert!(reader.payload(10).unwrap_err().is_corruption());
    }

    #[test]
    fn test_column_length_mismatch_is_corruption() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path().join("run"));
        drop(written(&paths, 10, true));
        let err = PointStore::open(&paths, 11, true).err().unwrap();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_labels_round_trip_and_persist() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path().join("run"));
        {
            let store = written(&paths, 10, true);
            {
                let mut writer = store.label_writer().unwrap();
                writer.set_label(3, Some(7)).unwrap();
                writer.set_label(4, Some(7)).unwrap();
                writer.set_label(5, Some(0)).unwrap();
                writer.flush().unwrap();
            }
            let reader = store.reader().unwrap();
            assert_eq!(reader.payload(3).unwrap().1, Some(7));
            assert_eq!(reader.payload(5).unwrap().1, Some(0));
            assert_eq!(reader.payload(6).unwrap().1, None);
            drop(reader);
            store.close().unwrap();
        }

        let store = PointStore::open(&paths, 10, true).unwrap();
        assert_eq!(store.reader().unwrap().payload(4).unwrap().1, Some(7));

        let cleared = store.label_writer().unwrap().clear_label(7).unwrap();
        assert_eq!(cleared, 2);
        assert_eq!(store.reader().unwrap().payload(4).unwrap().1, None);
        assert_eq!(store.reader().unwrap().payload(5).unwrap().1, Some(0));
    }

    #[test]
    fn test_label_writer_rejects_unknown_point() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path().join("run"));
        let store = written(&paths, 5, true);
        let writer = store.label_writer().unwrap();
        assert!(writer.check_id(4).is_ok());
        assert!(matches!(
            writer.check_id(5).unwrap_err(),
            MzTreeError::InvalidParameter(_)
        ));
    }

    #[test]
    fn test_closed_store_rejects_access() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path().join("run"));
        let store = written(&paths, 2, true);
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.reader().err().unwrap(), MzTreeError::Closed));
        assert!(matches!(store.label_writer().err().unwrap(), MzTreeError::Closed));
    }

    #[test]
    fn test_empty_store() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path().join("run"));
        let writer = PointStoreWriter::create(&paths, true).unwrap();
        assert_eq!(writer.finish().unwrap(), 0);
        let store = PointStore::open(&paths, 0, true).unwrap();
        let reader = store.reader().unwrap();
        assert_eq!(reader.len(), 0);
        assert!(reader.read(PointRange::new(0, 0)).unwrap().is_empty());
    }

    #[test]
    fn test_coordinate_page_iter() {
        let page = CoordinatePage {
            offset: 40,
            mz: vec![1.0, 2.0],
            rt: vec![0.5, 0.75],
        };
        let items: Vec<_> = page.iter().collect();
        assert_eq!(items, vec![(40, 1.0, 0.5), (41, 2.0, 0.75)]);
        assert_eq!(page.weight(), 24);
    }
}
