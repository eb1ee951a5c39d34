//! Disk storage for the index file (`<base>`).
//!
//! Layout: a fixed header page, then variable-length node records appended
//! during the build, then the node offset table. Nodes are read one at a
//! time on demand: each `read_node` is one seek plus two reads. Nothing is
//! preloaded except the offset table.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::tree_constants::HEADER_PAGE_SIZE;
use super::tree_types::{FileHeader, Node, NodeId, NodeRecord};
use crate::errors::{MzTreeError, MzTreeResult};

/// Handles reading/writing node records of the index file.
pub struct NodeStorage {
    file: RwLock<File>,
    path: PathBuf,
    /// Byte offset of each node record, indexed by node id
    offsets: RwLock<Vec<u64>>,
    /// End of the node record region
    records_end: AtomicU64,
}

impl NodeStorage {
    /// Create a new index file with a blank header page
    pub fn create(path: &Path) -> MzTreeResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&[0u8; HEADER_PAGE_SIZE])?;

        Ok(Self {
            file: RwLock::new(file),
            path: path.to_path_buf(),
            offsets: RwLock::new(Vec::new()),
            records_end: AtomicU64::new(HEADER_PAGE_SIZE as u64),
        })
    }

    /// Open a finished index file, validating the header and loading the
    /// node offset table.
    pub fn open(path: &Path) -> MzTreeResult<(Self, FileHeader)> {
        let file = OpenOptions::new().read(true).open(path)?;
        let storage = Self {
            file: RwLock::new(file),
            path: path.to_path_buf(),
            offsets: RwLock::new(Vec::new()),
            records_end: AtomicU64::new(HEADER_PAGE_SIZE as u64),
        };

        let header = storage.read_header()?;
        header.validate(path)?;
        let offsets = storage.read_offset_table(&header)?;
        *storage.offsets.write() = offsets;
        storage
            .records_end
            .store(header.node_table_offset, Ordering::Release);
        Ok((storage, header))
    }

    /// Whether `path` starts with a readable index header magic.
    pub fn is_index_file(path: &Path) -> bool {
        let Ok(mut file) = File::open(path) else {
            return false;
        };
        let mut buffer = vec![0u8; HEADER_PAGE_SIZE];
        if file.read_exact(&mut buffer).is_err() {
            return false;
        }
        bincode::serde::decode_from_slice::<FileHeader, _>(&buffer, bincode::config::legacy())
            .map(|(header, _)| header.magic == super::tree_constants::MAGIC)
            .unwrap_or(false)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn node_count(&self) -> u64 {
        self.offsets.read().len() as u64
    }

    /// Read header from disk (single read operation)
    pub fn read_header(&self) -> MzTreeResult<FileHeader> {
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0))?;
        let mut buffer = vec![0u8; HEADER_PAGE_SIZE];
        file.read_exact(&mut buffer)
            .map_err(|e| self.eof_as_corruption(e, "truncated header page"))?;
        bincode::serde::decode_from_slice(&buffer, bincode::config::legacy())
            .map(|(header, _)| header)
            .map_err(|e| MzTreeError::corruption(&self.path, format!("unreadable header: {}", e)))
    }

    /// Write header to disk
    pub fn write_header(&self, header: &FileHeader) -> MzTreeResult<()> {
        let mut bytes = bincode::serde::encode_to_vec(header, bincode::config::legacy())
            .map_err(MzTreeError::serialization)?;
        if bytes.len() > HEADER_PAGE_SIZE {
            return Err(MzTreeError::Serialization(format!(
                "header too large: {} bytes (max {})",
                bytes.len(),
                HEADER_PAGE_SIZE
            )));
        }
        bytes.resize(HEADER_PAGE_SIZE, 0);

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Append a node record at the end of the file, returning its id
    pub fn append_node(&self, node: &Node) -> MzTreeResult<NodeId> {
        let record = NodeRecord::encode(node)?;

        let mut file = self.file.write();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(&record)?;
        self.records_end
            .store(offset + record.len() as u64, Ordering::Release);

        let mut offsets = self.offsets.write();
        offsets.push(offset);
        Ok((offsets.len() - 1) as NodeId)
    }

    /// Read a SINGLE node from disk, verifying its checksum
    pub fn read_node(&self, node_id: NodeId) -> MzTreeResult<Node> {
        let offset = {
            let offsets = self.offsets.read();
            match offsets.get(node_id as usize) {
                Some(offset) => *offset,
                None => {
                    return Err(MzTreeError::corruption(
                        &self.path,
                        format!("node {} outside node table of {}", node_id, offsets.len()),
                    ))
                }
            }
        };

        let (payload, crc) = {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(offset))?;
            let mut prefix = [0u8; NodeRecord::PREFIX_LEN];
            file.read_exact(&mut prefix)
                .map_err(|e| self.eof_as_corruption(e, &format!("node {} truncated", node_id)))?;
            let (len, crc) = NodeRecord::parse_prefix(&prefix);
            let end = offset + (NodeRecord::PREFIX_LEN + len) as u64;
            let records_end = self.records_end.load(Ordering::Acquire);
            if end > records_end {
                return Err(MzTreeError::corruption(
                    &self.path,
                    format!(
                        "node {} of {} bytes extends past the node region ending at {}",
                        node_id, len, records_end
                    ),
                ));
            }
            let mut payload = vec![0u8; len];
            file.read_exact(&mut payload)
                .map_err(|e| self.eof_as_corruption(e, &format!("node {} truncated", node_id)))?;
            (payload, crc)
        };

        NodeRecord::decode(&payload, crc, &self.path, node_id)
    }

    /// Write the offset table and the completed header, then sync.
    pub fn finish(&self, header: &mut FileHeader) -> MzTreeResult<()> {
        let table = {
            let offsets = self.offsets.read();
            header.node_count = offsets.len() as u64;
            bincode::serde::encode_to_vec(&*offsets, bincode::config::legacy())
                .map_err(MzTreeError::serialization)?
        };

        {
            let mut file = self.file.write();
            header.node_table_offset = file.seek(SeekFrom::End(0))?;
            file.write_all(&table)?;
        }

        header.complete = true;
        self.write_header(header)?;
        self.sync()
    }

    /// Sync file to disk
    pub fn sync(&self) -> MzTreeResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn read_offset_table(&self, header: &FileHeader) -> MzTreeResult<Vec<u64>> {
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(header.node_table_offset))?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        drop(file);

        let offsets: Vec<u64> = bincode::serde::decode_from_slice(&buffer, bincode::config::legacy())
            .map(|(offsets, _)| offsets)
            .map_err(|e| MzTreeError::corruption(&self.path, format!("unreadable node table: {}", e)))?;

        if offsets.len() as u64 != header.node_count {
            return Err(MzTreeError::corruption(
                &self.path,
                format!(
                    "node table lists {} nodes, header expects {}",
                    offsets.len(),
                    header.node_count
                ),
            ));
        }
        if let Some(bad) = offsets
            .iter()
            .find(|o| **o < HEADER_PAGE_SIZE as u64 || **o >= header.node_table_offset)
        {
            return Err(MzTreeError::corruption(
                &self.path,
                format!("node offset {} outside the node region", bad),
            ));
        }
        Ok(offsets)
    }

    fn eof_as_corruption(&self, err: io::Error, detail: &str) -> MzTreeError {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            MzTreeError::corruption(&self.path, detail)
        } else {
            MzTreeError::Io(err)
        }
    }
}
