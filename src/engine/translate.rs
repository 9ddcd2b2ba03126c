//! Address translation
//!
//! Maps a logical stream offset to the block holding it and the cluster slot
//! inside that block, loading the block's metadata into a cursor on demand.

use crate::error::{PlexError, Result};
use crate::layout::{used_prefix, ClusterEntry, ClusterState};

use super::{CursorKind, Engine};

impl Engine {
    /// Index of the block whose logical range contains `address`
    ///
    /// Scans block records until the first one starting past `address` and
    /// steps back one.
    pub(crate) fn locate_block(&self, index: usize, address: u64) -> Result<usize> {
        let blocks = &self.streams[index].descriptor.blocks;

        let mut block = 0;
        while block < blocks.len() && blocks[block].stream_offset <= address {
            block += 1;
        }

        if block == 0 {
            return Err(PlexError::invalid_address(
                address,
                "no block record covers the address",
            ));
        }

        Ok(block - 1)
    }

    /// Point a cursor at the cluster owning `address`.
    ///
    /// Returns `(block, cluster)`. If the read cursor moves onto the block
    /// the write cursor holds, the write side's entries are persisted first
    /// so the disk copy is current.
    pub(crate) fn position_cursor(
        &mut self,
        index: usize,
        kind: CursorKind,
        address: u64,
    ) -> Result<(usize, usize)> {
        let block = self.locate_block(index, address)?;

        if self.streams[index].cursor(kind).block != Some(block) {
            if kind == CursorKind::Read && self.streams[index].write.block == Some(block) {
                self.persist_write_entries(index)?;
            }

            let entries = self.load_block_entries(index, block)?;
            let cursor = self.streams[index].cursor_mut(kind);
            cursor.clusters = entries;
            cursor.block = Some(block);
        }

        let cursor = self.streams[index].cursor_mut(kind);
        let cluster = find_cluster(&cursor.clusters, address)?;
        cursor.cluster = cluster;

        Ok((block, cluster))
    }
}

/// Slot of the committed cluster (or run head) holding `address`.
///
/// Binary search over committed entries for the last logical offset not past
/// `address`, then back over continuation slots to the run head. A block with
/// no committed slots yields slot 0.
pub(crate) fn find_cluster(entries: &[ClusterEntry], address: u64) -> Result<usize> {
    let used = used_prefix(entries);
    if used == 0 {
        return Ok(0);
    }

    let found = entries[..used].partition_point(|entry| entry.offset <= address);
    if found == 0 {
        return Err(PlexError::invalid_address(
            address,
            "address precedes the block's first cluster",
        ));
    }

    let mut cluster = found - 1;
    while cluster > 0 && entries[cluster].state == ClusterState::PartOfCompressed {
        cluster -= 1;
    }

    Ok(cluster)
}
