//! Read path and read-ahead cache
//!
//! Committed bytes are decoded a run at a time into the stream's cache,
//! up to `prefetch_clusters` clusters per fill. Bytes still sitting in the
//! write buffer are served from there directly.

use crate::allocator::cluster_data_offset;
use crate::error::{PlexError, Result};
use crate::layout::{used_prefix, ClusterState};

use super::{CursorKind, Engine};

impl Engine {
    /// Move the read position. Positions past the end are allowed and read
    /// nothing.
    pub(crate) fn seek(&mut self, index: usize, pos: u64) {
        self.streams[index].read_pos = pos;
    }

    pub(crate) fn position(&self, index: usize) -> u64 {
        self.streams[index].read_pos
    }

    /// Read from the read position into `out`, advancing it.
    ///
    /// Returns the number of bytes read; zero means end of stream. A failure
    /// after some bytes were copied is recorded and reported as a short count.
    pub(crate) fn read(&mut self, index: usize, out: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        match self.read_inner(index, out, &mut filled) {
            Ok(()) => Ok(filled),
            Err(e) if filled > 0 => {
                self.record_failure(&e);
                Ok(filled)
            }
            Err(e) => Err(e),
        }
    }

    fn read_inner(&mut self, index: usize, out: &mut [u8], filled: &mut usize) -> Result<()> {
        while *filled < out.len() {
            let stream = &self.streams[index];
            let pos = stream.read_pos;
            let size = stream.descriptor.size;
            if pos >= size {
                break;
            }

            let want = (out.len() - *filled) as u64;
            let buffer_start = stream.write_buffer_start();

            let n = if pos >= buffer_start {
                let from = (pos - buffer_start) as usize;
                let n = want.min(size - pos) as usize;
                out[*filled..*filled + n].copy_from_slice(&stream.write_buffer[from..from + n]);
                n
            } else {
                if !stream.cache_covers(pos) {
                    self.prefetch(index)?;
                }
                let stream = &self.streams[index];
                if !stream.cache_covers(pos) {
                    return Err(PlexError::invalid_address(
                        pos,
                        "no committed cluster holds the address",
                    ));
                }
                let from = (pos - stream.cache_offset) as usize;
                let end = stream.cache_end().min(buffer_start);
                let n = want.min(end - pos) as usize;
                out[*filled..*filled + n].copy_from_slice(&stream.cache[from..from + n]);
                n
            };

            *filled += n;
            self.streams[index].read_pos += n as u64;
        }

        Ok(())
    }

    /// Refill the cache starting at the run holding the read position.
    ///
    /// Decodes forward within the read cursor's block until the budget is
    /// spent or an uncommitted slot is reached.
    fn prefetch(&mut self, index: usize) -> Result<()> {
        let cluster_size = self.header.cluster_size as usize;
        let budget = self.prefetch_clusters as usize * cluster_size;
        let pos = self.streams[index].read_pos;

        let (block, first) = self.position_cursor(index, CursorKind::Read, pos)?;
        let file_offset = self.streams[index].descriptor.blocks[block].file_offset;
        let entries = std::mem::take(&mut self.streams[index].read.clusters);
        let capacity = entries.len();
        let used = used_prefix(&entries);

        let mut decoded = Vec::with_capacity(budget.max(cluster_size));
        let mut cluster = first;
        let outcome = loop {
            if cluster >= used || decoded.len() >= budget {
                break Ok(());
            }
            let at = cluster_data_offset(file_offset, block, cluster, cluster_size as u32);

            match entries[cluster].state {
                ClusterState::Plain => {
                    // Adjacent plain clusters are fetched with one read
                    let mut run = 1;
                    while cluster + run < used
                        && entries[cluster + run].state == ClusterState::Plain
                        && decoded.len() + (run + 1) * cluster_size <= budget
                    {
                        run += 1;
                    }
                    let from = decoded.len();
                    decoded.resize(from + run * cluster_size, 0);
                    if let Err(e) = self.read_at(at, &mut decoded[from..]) {
                        break Err(e);
                    }
                    cluster += run;
                }
                ClusterState::Compressed { len, clusters } => {
                    let span = match self.codec.run_span(len, clusters, capacity - cluster) {
                        Ok(span) => span,
                        Err(e) => break Err(e),
                    };
                    let mut payload = vec![0u8; len as usize];
                    if let Err(e) = self.read_at(at, &mut payload) {
                        break Err(e);
                    }
                    match self.codec.decode(&payload, clusters) {
                        Ok(bytes) => decoded.extend_from_slice(&bytes),
                        Err(e) => break Err(e),
                    }
                    cluster += span;
                }
                ClusterState::PartOfCompressed => {
                    break Err(PlexError::UnexpectedMetadata(format!(
                        "slot {} of block {} continues a run with no head",
                        cluster, block
                    )));
                }
                ClusterState::Free => break Ok(()),
            }
        };

        let stream = &mut self.streams[index];
        let cache_offset = entries.get(first).map_or(pos, |entry| entry.offset);
        stream.read.clusters = entries;
        outcome?;

        stream.cache_offset = cache_offset;
        stream.cache.clear();
        stream.cache.extend_from_slice(&decoded);

        tracing::debug!(
            "Prefetched {} bytes of stream '{}' from block {} slots {}..{}",
            decoded.len(),
            stream.descriptor.name,
            block,
            first,
            cluster
        );

        Ok(())
    }
}
