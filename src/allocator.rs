//! Block Allocator
//!
//! Decides how large each block of a stream is and where new blocks go.
//!
//! ## Growth
//! Block `i` holds `block_capacity(i)` clusters:
//! ```text
//! i:        0  1  2  3  4  5  6  7   8   9   10  ...
//! clusters: 1  1  2  3  4  6  8  12  16  24  32  ...
//! ```
//! Past index 4 the size alternates ×3/2 and ×4/3, doubling every two
//! blocks. The fixed record array therefore covers very large streams without
//! the overallocation of plain doubling.
//!
//! ## Placement
//! New blocks go at the watermark: the highest end of any stream's last
//! block, or the end of the descriptor table for an empty container. Space is
//! never reused except through truncation, which shrinks the file back down
//! to the watermark.

use crate::error::{PlexError, Result};
use crate::layout::{StreamDescriptor, CLUSTER_ENTRY_SIZE, MAX_BLOCKS};

/// Capacity of block `index`, in clusters
pub fn block_capacity(index: usize) -> u64 {
    if index == 0 {
        return 1;
    }
    if index < 5 {
        return index as u64;
    }

    let mut capacity: u64 = 4;
    for step in 0..(index - 4) {
        capacity = if step % 2 == 0 {
            capacity / 2 * 3
        } else {
            capacity / 3 * 4
        };
    }
    capacity
}

/// Full on-disk footprint of block `index`: entry array plus cluster payload
pub fn block_disk_size(index: usize, cluster_size: u32) -> u64 {
    block_capacity(index) * (cluster_size as u64 + CLUSTER_ENTRY_SIZE as u64)
}

/// Physical offset of cluster slot `cluster` inside a block starting at `block_offset`
pub fn cluster_data_offset(block_offset: u64, index: usize, cluster: usize, cluster_size: u32) -> u64 {
    block_offset
        + block_capacity(index) * CLUSTER_ENTRY_SIZE as u64
        + cluster as u64 * cluster_size as u64
}

/// Check that every block of a decoded descriptor lies past the descriptor
/// table and ends at an offset that fits in a `u64`
pub fn check_placement(stream: &StreamDescriptor, table_end: u64, cluster_size: u32) -> Result<()> {
    for (index, record) in stream.blocks.iter().enumerate() {
        let end = record
            .file_offset
            .checked_add(block_disk_size(index, cluster_size));
        if record.file_offset < table_end || end.is_none() {
            return Err(PlexError::NotAContainer(format!(
                "block {} of stream '{}' is placed at {}, outside the data area",
                index, stream.name, record.file_offset
            )));
        }
    }
    Ok(())
}

/// Largest logical size a stream can reach with uncompressed data
pub fn max_stream_size(cluster_size: u32) -> u64 {
    (0..MAX_BLOCKS)
        .map(block_capacity)
        .sum::<u64>()
        .saturating_mul(cluster_size as u64)
}

/// Physical offset for the next block appended to any stream
///
/// `table_end` is where the descriptor table stops; it is the answer when no
/// stream has a block yet.
pub fn watermark<'a, I>(streams: I, table_end: u64, cluster_size: u32) -> u64
where
    I: IntoIterator<Item = &'a StreamDescriptor>,
{
    streams
        .into_iter()
        .filter_map(|stream| {
            let last = stream.blocks.len().checked_sub(1)?;
            Some(stream.blocks[last].file_offset + block_disk_size(last, cluster_size))
        })
        .fold(table_end, u64::max)
}
