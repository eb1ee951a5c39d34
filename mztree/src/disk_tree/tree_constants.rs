//! Constants for the on-disk index layout and default build parameters.

/// Size of the header page at the start of the index file
pub const HEADER_PAGE_SIZE: usize = 4096;

/// Magic number for file format identification
pub const MAGIC: u32 = 0x4D5A5452; // "MZTR"

/// File format version
pub const VERSION: u32 = 1;

/// Bytes per record in the coordinate file: mz (f64) + rt (f32)
pub const COORD_RECORD_SIZE: usize = 12;

/// Bytes per record in the payload file: intensity (f32) + label (u32)
pub const PAYLOAD_RECORD_SIZE: usize = 8;

/// Default maximum number of raw points per leaf
pub const DEFAULT_LEAF_CAPACITY: usize = 4096;

/// Default number of children grouped under one internal node
pub const DEFAULT_FAN_OUT: usize = 16;

/// Default representative-subset size per node
pub const DEFAULT_REPRESENTATIVE_SIZE: usize = 512;

/// Default cache size in number of pages
pub const DEFAULT_CACHE_PAGES: usize = 1024;

/// Default number of points buffered in memory before a partition is
/// tiled into leaves
pub const DEFAULT_PARTITION_POINTS: usize = 2_000_000;

/// Largest supported fan-out (child indexes are stored as u16)
pub const MAX_FAN_OUT: usize = u16::MAX as usize + 1;
