//! Cluster metadata entries
//!
//! Each block starts with one entry per cluster slot. The packed flag word
//! only exists on disk; in memory an entry carries a [`ClusterState`].

use crate::error::{PlexError, Result};

use super::{get_u32, get_u64, put_u32, put_u64, CLUSTER_ENTRY_SIZE, CLUSTER_LEN_MASK};

const FLAG_COMPRESSED: u32 = 1 << 31;
const FLAG_PART_OF_COMPRESSED: u32 = 1 << 30;
const FLAG_PLAIN: u32 = 1 << 29;

/// What a cluster slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClusterState {
    /// Never committed. Slots at and after a block's write position.
    #[default]
    Free,

    /// Raw bytes occupy the whole cluster
    Plain,

    /// First cluster of a compressed run
    Compressed {
        /// Compressed payload length in bytes
        len: u32,
        /// Logical clusters the payload expands to
        clusters: u32,
    },

    /// Continuation of the preceding compressed run
    PartOfCompressed,
}

/// One cluster's state plus the logical stream offset it holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClusterEntry {
    pub state: ClusterState,
    pub offset: u64,
}

impl ClusterEntry {
    pub const fn free(offset: u64) -> Self {
        Self {
            state: ClusterState::Free,
            offset,
        }
    }

    pub const fn plain(offset: u64) -> Self {
        Self {
            state: ClusterState::Plain,
            offset,
        }
    }

    pub fn is_free(&self) -> bool {
        self.state == ClusterState::Free
    }

    /// Pack into the 16-byte on-disk form
    pub fn encode_into(&self, out: &mut [u8]) {
        let (flags, clusters) = match self.state {
            ClusterState::Free => (0, 0),
            ClusterState::Plain => (FLAG_PLAIN, 0),
            ClusterState::Compressed { len, clusters } => {
                (FLAG_COMPRESSED | (len & CLUSTER_LEN_MASK), clusters)
            }
            ClusterState::PartOfCompressed => (FLAG_PART_OF_COMPRESSED, 0),
        };

        put_u32(out, 0, flags);
        put_u32(out, 4, clusters);
        put_u64(out, 8, self.offset);
    }

    /// Unpack from the 16-byte on-disk form
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let flags = get_u32(buf, 0);
        let clusters = get_u32(buf, 4);
        let offset = get_u64(buf, 8);

        let state = match flags & !CLUSTER_LEN_MASK {
            0 if flags == 0 => ClusterState::Free,
            FLAG_PLAIN if flags == FLAG_PLAIN => ClusterState::Plain,
            FLAG_PART_OF_COMPRESSED if flags == FLAG_PART_OF_COMPRESSED => {
                ClusterState::PartOfCompressed
            }
            FLAG_COMPRESSED => ClusterState::Compressed {
                len: flags & CLUSTER_LEN_MASK,
                clusters,
            },
            _ => {
                return Err(PlexError::UnexpectedMetadata(format!(
                    "unknown cluster flag word {:#010x}",
                    flags
                )))
            }
        };

        Ok(Self { state, offset })
    }
}

/// Serialize a block's entry array
pub fn encode_entries(entries: &[ClusterEntry]) -> Vec<u8> {
    let mut buf = vec![0u8; entries.len() * CLUSTER_ENTRY_SIZE];
    for (entry, chunk) in entries.iter().zip(buf.chunks_exact_mut(CLUSTER_ENTRY_SIZE)) {
        entry.encode_into(chunk);
    }
    buf
}

/// Parse a block's entry array
pub fn decode_entries(buf: &[u8]) -> Result<Vec<ClusterEntry>> {
    buf.chunks_exact(CLUSTER_ENTRY_SIZE)
        .map(ClusterEntry::decode)
        .collect()
}

/// Number of committed slots at the start of a block.
///
/// Slots are committed in order, so everything from the first free slot on
/// is free as well.
pub fn used_prefix(entries: &[ClusterEntry]) -> usize {
    entries
        .iter()
        .position(ClusterEntry::is_free)
        .unwrap_or(entries.len())
}
