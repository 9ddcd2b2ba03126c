//! Binary Layout Module
//!
//! Fixed on-disk structures of a container file. Everything is little-endian.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (64 bytes, offset 0)                                  │
//! │   Magic "PLXF" (4) | Version (4) | StreamCount (4)           │
//! │   ClusterSize (4) | ClustersPerGroup (4) | CRC32 (4) | pad   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Descriptor slot × StreamCount (1024 bytes each)              │
//! │   Name (64) | Size (8) | BlockCount (8)                      │
//! │   BlockRecord × 59: [PhysicalOffset (8)][LogicalStart (8)]   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Data region: blocks placed by the watermark allocator        │
//! │   ┌────────────────────────────┬───────────────────────────┐ │
//! │   │ ClusterEntry × capacity(i) │ Cluster × capacity(i)     │ │
//! │   └────────────────────────────┴───────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod cluster;

pub use cluster::{decode_entries, encode_entries, used_prefix, ClusterEntry, ClusterState};

use crate::config::validate_geometry;
use crate::error::{PlexError, Result};

// =============================================================================
// Shared Constants
// =============================================================================

/// Magic bytes identifying a container file
pub const MAGIC: &[u8; 4] = b"PLXF";

/// Current container format version
pub const FORMAT_VERSION: u32 = 1;

/// Fixed header size at offset 0
pub const HEADER_SIZE: usize = 64;

/// Hard cap on the number of streams in one container
pub const MAX_STREAMS: u32 = 10_000;

/// Fixed width of a stream name field (NUL padded)
pub const NAME_SIZE: usize = 64;

/// Size of one stream descriptor slot
pub const DESCRIPTOR_SIZE: usize = 1024;

/// Size of one block record: physical offset (8) + logical start (8)
pub const BLOCK_RECORD_SIZE: usize = 16;

/// Name + size + block count
const DESCRIPTOR_FIXED_SIZE: usize = NAME_SIZE + 8 + 8;

/// Block records that fit in the remainder of a descriptor slot
pub const MAX_BLOCKS: usize = (DESCRIPTOR_SIZE - DESCRIPTOR_FIXED_SIZE) / BLOCK_RECORD_SIZE;

/// Size of one cluster metadata entry: flags (4) + decoded clusters (4) + offset (8)
pub const CLUSTER_ENTRY_SIZE: usize = 16;

/// Low bits of the flag word holding a compressed run's byte length
pub const CLUSTER_LEN_MASK: u32 = (1 << 29) - 1;

/// Smallest supported cluster size
pub const MIN_CLUSTER_SIZE: u32 = 512;

/// Largest supported cluster size
pub const MAX_CLUSTER_SIZE: u32 = 1 << 20;

const _: () = assert!(DESCRIPTOR_FIXED_SIZE + MAX_BLOCKS * BLOCK_RECORD_SIZE == DESCRIPTOR_SIZE);
const _: () = assert!(MAX_BLOCKS == 59);
const _: () = assert!(HEADER_SIZE >= 24);

/// Byte offset where the descriptor table ends and the data region begins
pub fn descriptor_table_end(stream_count: usize) -> u64 {
    HEADER_SIZE as u64 + (DESCRIPTOR_SIZE * stream_count) as u64
}

/// Byte offset of a stream's descriptor slot
pub fn descriptor_offset(index: usize) -> u64 {
    HEADER_SIZE as u64 + (DESCRIPTOR_SIZE * index) as u64
}

// =============================================================================
// Header
// =============================================================================

/// Container header stored at offset 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub stream_count: u32,
    pub cluster_size: u32,
    pub clusters_per_group: u32,
}

impl ContainerHeader {
    /// Serialize to the fixed 64-byte layout
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        put_u32(&mut buf, 4, FORMAT_VERSION);
        put_u32(&mut buf, 8, self.stream_count);
        put_u32(&mut buf, 12, self.cluster_size);
        put_u32(&mut buf, 16, self.clusters_per_group);

        let crc = crc32fast::hash(&buf[0..20]);
        put_u32(&mut buf, 20, crc);
        buf
    }

    /// Parse and validate a header read from offset 0
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        if &buf[0..4] != MAGIC {
            return Err(PlexError::NotAContainer(format!(
                "bad signature {:?}",
                &buf[0..4]
            )));
        }

        let stored_crc = get_u32(buf, 20);
        let actual_crc = crc32fast::hash(&buf[0..20]);
        if stored_crc != actual_crc {
            return Err(PlexError::NotAContainer(format!(
                "header checksum mismatch: expected {:08x}, got {:08x}",
                stored_crc, actual_crc
            )));
        }

        let version = get_u32(buf, 4);
        if version != FORMAT_VERSION {
            return Err(PlexError::NotAContainer(format!(
                "unsupported format version {}",
                version
            )));
        }

        let header = Self {
            stream_count: get_u32(buf, 8),
            cluster_size: get_u32(buf, 12),
            clusters_per_group: get_u32(buf, 16),
        };

        if header.stream_count > MAX_STREAMS {
            return Err(PlexError::NotAContainer(format!(
                "stream count {} exceeds the limit of {}",
                header.stream_count, MAX_STREAMS
            )));
        }

        validate_geometry(header.cluster_size, header.clusters_per_group)
            .map_err(|e| PlexError::NotAContainer(e.to_string()))?;

        Ok(header)
    }
}

// =============================================================================
// Stream Descriptor
// =============================================================================

/// Placement of one block: where its cluster index lives in the file and
/// which logical stream offset its first cluster holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRecord {
    pub file_offset: u64,
    pub stream_offset: u64,
}

/// Persistent description of one stream
///
/// `blocks` holds only allocated records; the on-disk slot stores their
/// count explicitly instead of relying on zero offsets as a sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub name: String,
    pub size: u64,
    pub blocks: Vec<BlockRecord>,
}

impl StreamDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            size: 0,
            blocks: Vec::new(),
        }
    }

    /// Serialize to a fixed 1024-byte slot
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; DESCRIPTOR_SIZE];

        let name = self.name.as_bytes();
        let name_len = name.len().min(NAME_SIZE - 1);
        buf[..name_len].copy_from_slice(&name[..name_len]);

        put_u64(&mut buf, NAME_SIZE, self.size);
        put_u64(&mut buf, NAME_SIZE + 8, self.blocks.len() as u64);

        for (i, record) in self.blocks.iter().take(MAX_BLOCKS).enumerate() {
            let at = DESCRIPTOR_FIXED_SIZE + i * BLOCK_RECORD_SIZE;
            put_u64(&mut buf, at, record.file_offset);
            put_u64(&mut buf, at + 8, record.stream_offset);
        }

        buf
    }

    /// Parse a descriptor slot
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != DESCRIPTOR_SIZE {
            return Err(PlexError::NotAContainer(format!(
                "descriptor slot is {} bytes, expected {}",
                buf.len(),
                DESCRIPTOR_SIZE
            )));
        }

        let name_end = buf[..NAME_SIZE]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_SIZE);
        let name = std::str::from_utf8(&buf[..name_end])
            .map_err(|_| PlexError::NotAContainer("stream name is not UTF-8".to_string()))?
            .to_string();

        let size = get_u64(buf, NAME_SIZE);
        let block_count = get_u64(buf, NAME_SIZE + 8);

        if block_count == 0 || block_count > MAX_BLOCKS as u64 {
            return Err(PlexError::NotAContainer(format!(
                "stream '{}' has {} block records (expected 1..={})",
                name, block_count, MAX_BLOCKS
            )));
        }

        let mut blocks = Vec::with_capacity(block_count as usize);
        for i in 0..block_count as usize {
            let at = DESCRIPTOR_FIXED_SIZE + i * BLOCK_RECORD_SIZE;
            blocks.push(BlockRecord {
                file_offset: get_u64(buf, at),
                stream_offset: get_u64(buf, at + 8),
            });
        }

        // Block 0 starts the stream and starts must never go backwards
        if blocks[0].stream_offset != 0
            || blocks.windows(2).any(|w| w[1].stream_offset < w[0].stream_offset)
        {
            return Err(PlexError::NotAContainer(format!(
                "stream '{}' has unordered block records",
                name
            )));
        }

        Ok(Self { name, size, blocks })
    }
}

/// Check that a name fits the fixed-width field
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PlexError::InvalidStreamName("name is empty".to_string()));
    }
    if name.len() >= NAME_SIZE {
        return Err(PlexError::InvalidStreamName(format!(
            "'{}' is {} bytes, limit is {}",
            name,
            name.len(),
            NAME_SIZE - 1
        )));
    }
    if name.bytes().any(|b| b == 0) {
        return Err(PlexError::InvalidStreamName(format!(
            "'{}' contains a NUL byte",
            name.escape_default()
        )));
    }
    Ok(())
}

// =============================================================================
// Little-endian helpers
// =============================================================================

pub(crate) fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u64(buf: &mut [u8], at: usize, value: u64) {
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn get_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

pub(crate) fn get_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}
