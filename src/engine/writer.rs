//! Write buffer and flush path
//!
//! Appends accumulate in a per-stream buffer of at most one group
//! (`clusters_per_group` clusters, fewer near the end of a block). A full
//! buffer is committed as one group: its whole clusters go through the
//! codec, a trailing partial cluster is written plain and stays buffered
//! until more bytes complete it.

use bytes::BytesMut;

use crate::allocator::cluster_data_offset;
use crate::error::{PlexError, Result};
use crate::layout::{used_prefix, ClusterEntry, ClusterState};

use super::{fresh_entries, Cursor, CursorKind, Engine};

/// Zero bytes appended per step when a stream is grown with `set_size`
const ZERO_FILL_CHUNK: usize = 64 * 1024;

impl Engine {
    // =========================================================================
    // Append
    // =========================================================================

    /// Append `data` at the end of the stream.
    ///
    /// Returns the number of bytes accepted. A failure after some bytes were
    /// accepted is recorded and reported as a short count.
    pub(crate) fn append(&mut self, index: usize, data: &[u8]) -> Result<usize> {
        let mut written = 0;
        match self.append_inner(index, data, &mut written) {
            Ok(()) => Ok(written),
            Err(e) if written > 0 => {
                self.record_failure(&e);
                Ok(written)
            }
            Err(e) => Err(e),
        }
    }

    fn append_inner(&mut self, index: usize, data: &[u8], written: &mut usize) -> Result<()> {
        if self.streams[index].write.block.is_none() {
            self.init_write_buffer(index)?;
        }

        let cluster_size = self.header.cluster_size as usize;
        let group = self.header.clusters_per_group as usize;

        while *written < data.len() {
            let stream = &mut self.streams[index];
            let slots_left = stream.write.clusters.len() - stream.write.cluster;
            let limit = group.min(slots_left) * cluster_size;

            if stream.write_buffer.len() >= limit {
                self.flush_write_buffer(index)?;
                continue;
            }

            let take = (limit - stream.write_buffer.len()).min(data.len() - *written);
            stream
                .write_buffer
                .extend_from_slice(&data[*written..*written + take]);
            stream.descriptor.size += take as u64;
            *written += take;

            if stream.write_buffer.len() == limit {
                self.flush_write_buffer(index)?;
            }
        }

        Ok(())
    }

    // =========================================================================
    // Flush
    // =========================================================================

    /// Commit the stream's write buffer at the write cursor's slot.
    ///
    /// When the commit fills the block, its metadata is persisted and the
    /// write cursor moves to a freshly allocated block.
    pub(crate) fn flush_write_buffer(&mut self, index: usize) -> Result<()> {
        let cluster_size = self.header.cluster_size as usize;

        let stream = &mut self.streams[index];
        if stream.write_buffer.is_empty() {
            return Ok(());
        }
        let Some(block) = stream.write.block else {
            return Ok(());
        };

        let slot = stream.write.cluster;
        let capacity = stream.write.clusters.len();
        let start = stream.write.clusters[slot].offset;
        let block_offset = stream.descriptor.blocks[block].file_offset;
        let whole = stream.write_buffer.len() / cluster_size * cluster_size;
        let mut buffer = std::mem::take(&mut stream.write_buffer);

        // Whole clusters: plain or compressed, whichever is smaller
        let (entries, compressed) = {
            let group = self.codec.encode(&buffer[..whole], start);
            if !group.entries.is_empty() {
                let at = cluster_data_offset(block_offset, block, slot, cluster_size as u32);
                self.write_at(at, &group.payload)?;
            }
            let compressed = group.is_compressed();
            (group.entries, compressed)
        };

        let next = slot + entries.len();
        let next_offset = start + whole as u64;
        let remainder = buffer.split_off(whole);

        // Partial tail: written plain now, rewritten once it fills up
        if !remainder.is_empty() {
            let at = cluster_data_offset(block_offset, block, next, cluster_size as u32);
            self.write_at(at, &remainder)?;
        }

        let stream = &mut self.streams[index];
        stream.write.clusters[slot..next].copy_from_slice(&entries);
        if remainder.is_empty() {
            if next < capacity {
                stream.write.clusters[next] = ClusterEntry::free(next_offset);
            }
        } else {
            stream.write.clusters[next] = ClusterEntry::plain(next_offset);
        }
        stream.write.cluster = next;
        stream.sync_read_view(slot..(next + 1).min(capacity), start);

        tracing::debug!(
            "Flushed {} bytes of stream '{}' into block {} slots {}..{}{}",
            whole + remainder.len(),
            stream.descriptor.name,
            block,
            slot,
            next,
            if compressed { " (compressed)" } else { "" }
        );

        if remainder.is_empty() {
            buffer.clear();
            stream.write_buffer = buffer;

            if next == capacity {
                self.persist_write_entries(index)?;
                self.advance_write_block(index, next_offset)?;
            }
        } else {
            stream.write_buffer = remainder;
        }

        Ok(())
    }

    /// Move the write cursor to a new block whose first slot holds `start`
    fn advance_write_block(&mut self, index: usize, start: u64) -> Result<()> {
        let block = self.append_block(index, start)?;
        self.streams[index].write = Cursor {
            block: Some(block),
            cluster: 0,
            clusters: fresh_entries(block, start),
        };
        Ok(())
    }

    // =========================================================================
    // Write Cursor Setup
    // =========================================================================

    /// Position the write cursor at the end of the stream.
    ///
    /// A partial trailing cluster is read back into the write buffer. If the
    /// end falls inside a compressed run, the run is decoded and its prefix
    /// becomes the buffer so the group is recompressed on the next commit.
    pub(crate) fn init_write_buffer(&mut self, index: usize) -> Result<()> {
        let cluster_size = self.header.cluster_size as usize;
        let size = self.streams[index].descriptor.size;

        {
            let stream = &mut self.streams[index];
            stream.write = Cursor::default();
            stream.write_buffer.clear();
        }

        let (block, found) = self.position_cursor(index, CursorKind::Write, size)?;
        let record = self.streams[index].descriptor.blocks[block];
        let entries = &self.streams[index].write.clusters;
        let capacity = entries.len();

        let (slot, slot_offset, carry) = if used_prefix(entries) == 0 {
            (0, record.stream_offset, Vec::new())
        } else {
            let entry = entries[found];
            match entry.state {
                ClusterState::Plain => {
                    let end = entry.offset + cluster_size as u64;
                    if size < end {
                        let mut carry = vec![0u8; (size - entry.offset) as usize];
                        let at = cluster_data_offset(
                            record.file_offset,
                            block,
                            found,
                            cluster_size as u32,
                        );
                        self.read_at(at, &mut carry)?;
                        (found, entry.offset, carry)
                    } else {
                        (found + 1, end, Vec::new())
                    }
                }
                ClusterState::Compressed { len, clusters } => {
                    let span = self.codec.run_span(len, clusters, capacity - found)?;
                    let end = entry.offset + clusters as u64 * cluster_size as u64;
                    if size < end {
                        let mut payload = vec![0u8; len as usize];
                        let at = cluster_data_offset(
                            record.file_offset,
                            block,
                            found,
                            cluster_size as u32,
                        );
                        self.read_at(at, &mut payload)?;
                        let mut decoded = self.codec.decode(&payload, clusters)?;
                        decoded.truncate((size - entry.offset) as usize);
                        (found, entry.offset, decoded)
                    } else {
                        (found + span, end, Vec::new())
                    }
                }
                other => {
                    return Err(PlexError::UnexpectedMetadata(format!(
                        "slot {} of block {} is {:?}, expected a run head",
                        found, block, other
                    )))
                }
            }
        };

        if slot_offset + carry.len() as u64 != size {
            return Err(PlexError::CorruptedRegion(format!(
                "stream '{}' has size {} but its clusters end at {}",
                self.streams[index].descriptor.name,
                size,
                slot_offset + carry.len() as u64
            )));
        }

        if slot >= capacity {
            // The block is full and its successor was cut off by a truncation
            self.advance_write_block(index, slot_offset)?;
        } else {
            let stream = &mut self.streams[index];
            for entry in &mut stream.write.clusters[slot..] {
                *entry = ClusterEntry::default();
            }
            stream.write.clusters[slot].offset = slot_offset;
            stream.write.cluster = slot;
            stream.sync_read_view(slot..capacity, slot_offset);
        }

        self.streams[index].write_buffer = BytesMut::from(&carry[..]);
        Ok(())
    }

    // =========================================================================
    // Resize
    // =========================================================================

    /// Grow the stream with zero bytes or cut it back to `new_size`
    pub(crate) fn set_size(&mut self, index: usize, new_size: u64) -> Result<()> {
        let size = self.streams[index].descriptor.size;

        if new_size > size {
            let zeros = vec![0u8; ZERO_FILL_CHUNK];
            let mut remaining = new_size - size;
            while remaining > 0 {
                let n = remaining.min(ZERO_FILL_CHUNK as u64) as usize;
                let mut written = 0;
                self.append_inner(index, &zeros[..n], &mut written)?;
                remaining -= n as u64;
            }
        } else if new_size < size {
            self.truncate(index, new_size)?;
        }

        Ok(())
    }

    fn truncate(&mut self, index: usize, new_size: u64) -> Result<()> {
        let stream = &mut self.streams[index];
        let committed_end = stream.write_buffer_start();

        // Only uncommitted bytes go away
        if new_size >= committed_end {
            stream
                .write_buffer
                .truncate((new_size - committed_end) as usize);
            stream.descriptor.size = new_size;

            if stream.write_buffer.is_empty() && stream.write.block.is_some() {
                let slot = stream.write.cluster;
                stream.write.clusters[slot].state = ClusterState::Free;
                stream.sync_read_view(slot..slot + 1, new_size);
            }
            return Ok(());
        }

        // Committed data is cut: drop the buffer, then whole trailing blocks
        self.persist_write_entries(index)?;

        let stream = &mut self.streams[index];
        stream.write_buffer.clear();
        stream.write = Cursor::default();
        stream.invalidate_read_view();
        stream.descriptor.size = new_size;

        let before = stream.descriptor.blocks.len();
        while stream.descriptor.blocks.len() > 1
            && stream
                .descriptor
                .blocks
                .last()
                .is_some_and(|record| record.stream_offset >= new_size)
        {
            stream.descriptor.blocks.pop();
        }
        let removed = before - stream.descriptor.blocks.len();

        let watermark = self.watermark();
        self.storage.set_size(watermark)?;

        tracing::debug!(
            "Truncated stream '{}' to {} bytes, released {} blocks, file is now {} bytes",
            self.streams[index].descriptor.name,
            new_size,
            removed,
            watermark
        );

        self.init_write_buffer(index)
    }
}
