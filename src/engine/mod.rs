//! Engine Module
//!
//! The storage engine behind a container: per-stream runtime state, the
//! address translator, the write buffer / flush path and the read-ahead
//! cache.
//!
//! ## Responsibilities
//! - Own the storage handle, header and every stream's state
//! - Keep read and write views of the same block coherent
//! - Record the first fatal error and refuse work afterwards
//!
//! ## Per-stream state
//! ```text
//!            committed clusters on disk          write buffer
//!  0 ───────────────────────────────────────┬──────────────────┐ size
//!       read cache [cache_offset, +len)     │ [size-len, size) │
//!  ─────────────────────────────────────────┴──────────────────┘
//! ```
//! Bytes below the write buffer's start are served from the read cache,
//! bytes above it straight from the write buffer.

mod reader;
mod translate;
mod writer;

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::allocator::{self, block_capacity};
use crate::codec::{ClusterCodec, Compressor, Lz4Compressor};
use crate::config::Config;
use crate::error::{PlexError, Result};
use crate::layout::{
    decode_entries, descriptor_offset, descriptor_table_end, encode_entries, validate_name,
    BlockRecord, ClusterEntry, ContainerHeader, StreamDescriptor, CLUSTER_ENTRY_SIZE,
    DESCRIPTOR_SIZE, HEADER_SIZE, MAX_BLOCKS, MAX_STREAMS,
};
use crate::storage::StorageHandle;

/// Engine shared between a container and its stream handles
pub(crate) type SharedEngine = Arc<Mutex<Engine>>;

/// Run `op` on a healthy engine, recording any fatal error it returns
pub(crate) fn with_engine<T>(
    shared: &SharedEngine,
    op: impl FnOnce(&mut Engine) -> Result<T>,
) -> Result<T> {
    let mut engine = shared.lock();
    engine.ensure_valid()?;
    let result = op(&mut engine);
    if let Err(e) = &result {
        engine.record_failure(e);
    }
    result
}

// =============================================================================
// Cursors and Stream State
// =============================================================================

/// Which of a stream's two cursors an operation works through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CursorKind {
    Read,
    Write,
}

/// A cursor's loaded block: its index, the cluster slot it points at, and
/// the block's metadata entries
#[derive(Debug, Default)]
pub(crate) struct Cursor {
    pub block: Option<usize>,
    pub cluster: usize,
    pub clusters: Vec<ClusterEntry>,
}

/// Runtime state of one stream (not persisted)
#[derive(Debug)]
pub(crate) struct StreamState {
    pub descriptor: StreamDescriptor,

    /// Logical position of the next read
    pub read_pos: u64,
    pub read: Cursor,
    pub write: Cursor,

    /// Logical offset of `cache[0]`
    pub cache_offset: u64,
    /// Decoded read-ahead bytes
    pub cache: BytesMut,

    /// Uncommitted tail of the stream, starting at the write cursor's slot
    pub write_buffer: BytesMut,
}

impl StreamState {
    fn new(descriptor: StreamDescriptor) -> Self {
        Self {
            descriptor,
            read_pos: 0,
            read: Cursor::default(),
            write: Cursor::default(),
            cache_offset: 0,
            cache: BytesMut::new(),
            write_buffer: BytesMut::new(),
        }
    }

    pub fn cursor(&self, kind: CursorKind) -> &Cursor {
        match kind {
            CursorKind::Read => &self.read,
            CursorKind::Write => &self.write,
        }
    }

    pub fn cursor_mut(&mut self, kind: CursorKind) -> &mut Cursor {
        match kind {
            CursorKind::Read => &mut self.read,
            CursorKind::Write => &mut self.write,
        }
    }

    /// Logical offset where committed data ends and the write buffer begins
    pub fn write_buffer_start(&self) -> u64 {
        self.descriptor.size - self.write_buffer.len() as u64
    }

    pub fn cache_end(&self) -> u64 {
        self.cache_offset + self.cache.len() as u64
    }

    pub fn cache_covers(&self, pos: u64) -> bool {
        pos >= self.cache_offset && pos < self.cache_end()
    }

    /// Bring the read view back in line after the write side changed.
    ///
    /// Every mutation of the write cursor's entries calls this with the slots
    /// it touched and the lowest logical offset whose bytes may have changed.
    /// When both cursors hold the same block the touched entries are copied
    /// across; decoded bytes at or past `stale_from` are dropped.
    pub fn sync_read_view(&mut self, touched: Range<usize>, stale_from: u64) {
        if self.read.block.is_some() && self.read.block == self.write.block {
            if self.read.clusters.len() == self.write.clusters.len() {
                let end = touched.end.min(self.write.clusters.len());
                let start = touched.start.min(end);
                self.read.clusters[start..end].copy_from_slice(&self.write.clusters[start..end]);
            } else {
                self.read.clusters.clone_from(&self.write.clusters);
            }
        }

        if self.cache_end() > stale_from {
            let keep = stale_from.saturating_sub(self.cache_offset) as usize;
            self.cache.truncate(keep);
        }
    }

    /// Forget the read cursor's block and decoded bytes
    pub fn invalidate_read_view(&mut self) {
        self.read = Cursor::default();
        self.cache.clear();
        self.cache_offset = 0;
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Storage engine for one container
pub(crate) struct Engine {
    storage: Box<dyn StorageHandle>,
    header: ContainerHeader,
    streams: Vec<StreamState>,
    codec: ClusterCodec,
    prefetch_clusters: u32,
    last_error: Option<String>,
    closed: bool,
}

impl Engine {
    /// Format a fresh container with one empty stream per name
    pub fn create<N: AsRef<str>>(
        storage: Box<dyn StorageHandle>,
        names: &[N],
        config: &Config,
    ) -> Result<Self> {
        config.validate()?;

        if names.len() > MAX_STREAMS as usize {
            return Err(PlexError::Config(format!(
                "{} streams requested, limit is {}",
                names.len(),
                MAX_STREAMS
            )));
        }
        let mut seen = HashSet::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            validate_name(name)?;
            if !seen.insert(name) {
                return Err(PlexError::InvalidStreamName(format!(
                    "'{}' is used by more than one stream",
                    name
                )));
            }
        }

        let header = ContainerHeader {
            stream_count: names.len() as u32,
            cluster_size: config.cluster_size,
            clusters_per_group: config.clusters_per_group,
        };

        let streams = names
            .iter()
            .map(|name| StreamState::new(StreamDescriptor::new(name.as_ref())))
            .collect();

        let mut engine = Self::assemble(storage, header, streams, config);
        engine.storage.set_size(0)?;

        for index in 0..engine.streams.len() {
            let block = engine.append_block(index, 0)?;
            engine.streams[index].write = Cursor {
                block: Some(block),
                cluster: 0,
                clusters: fresh_entries(block, 0),
            };
        }

        engine.flush_all()?;

        tracing::info!(
            "Created container with {} streams (cluster size {}, {} clusters per group)",
            header.stream_count,
            header.cluster_size,
            header.clusters_per_group
        );

        Ok(engine)
    }

    /// Read and validate an existing container
    pub fn open(mut storage: Box<dyn StorageHandle>, config: &Config) -> Result<Self> {
        config.validate()?;

        let mut header_buf = [0u8; HEADER_SIZE];
        storage.seek(0)?;
        if read_fully(storage.as_mut(), &mut header_buf)? != HEADER_SIZE {
            return Err(PlexError::NotAContainer(
                "file is shorter than the header".to_string(),
            ));
        }
        let header = ContainerHeader::decode(&header_buf)?;

        let mut table = vec![0u8; header.stream_count as usize * DESCRIPTOR_SIZE];
        if read_fully(storage.as_mut(), &mut table)? != table.len() {
            return Err(PlexError::NotAContainer(
                "file is shorter than its descriptor table".to_string(),
            ));
        }

        let table_end = descriptor_table_end(header.stream_count as usize);
        let streams = table
            .chunks_exact(DESCRIPTOR_SIZE)
            .map(|slot| {
                let descriptor = StreamDescriptor::decode(slot)?;
                allocator::check_placement(&descriptor, table_end, header.cluster_size)?;
                Ok(StreamState::new(descriptor))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            "Opened container with {} streams (cluster size {})",
            header.stream_count,
            header.cluster_size
        );

        Ok(Self::assemble(storage, header, streams, config))
    }

    fn assemble(
        storage: Box<dyn StorageHandle>,
        header: ContainerHeader,
        streams: Vec<StreamState>,
        config: &Config,
    ) -> Self {
        let compressor: Arc<dyn Compressor> = Arc::new(Lz4Compressor);
        Self {
            storage,
            header,
            streams,
            codec: ClusterCodec::new(
                compressor,
                config.compression,
                header.cluster_size,
                header.clusters_per_group,
            ),
            prefetch_clusters: config.prefetch_clusters,
            last_error: None,
            closed: false,
        }
    }

    // =========================================================================
    // Validity
    // =========================================================================

    pub fn is_valid(&self) -> bool {
        self.last_error.is_none()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn ensure_valid(&self) -> Result<()> {
        match &self.last_error {
            Some(message) => Err(PlexError::Invalidated(message.clone())),
            None if self.closed => Err(PlexError::Closed),
            None => Ok(()),
        }
    }

    /// Remember the first fatal error; later operations fail fast
    pub fn record_failure(&mut self, err: &PlexError) {
        if err.is_fatal() && self.last_error.is_none() {
            tracing::warn!("Container invalidated: {}", err);
            self.last_error = Some(err.to_string());
        }
    }

    /// Refuse further work after an explicit close
    pub fn mark_closed(&mut self) {
        if !self.closed {
            tracing::info!("Container closed");
            self.closed = true;
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn stream_name(&self, index: usize) -> &str {
        &self.streams[index].descriptor.name
    }

    pub fn stream_size(&self, index: usize) -> u64 {
        self.streams[index].descriptor.size
    }

    pub fn find_stream(&self, name: &str) -> Option<usize> {
        self.streams.iter().position(|s| s.descriptor.name == name)
    }

    pub fn set_compression(&mut self, enabled: bool) {
        self.codec.set_enabled(enabled);
    }

    pub fn set_compressor(&mut self, compressor: Arc<dyn Compressor>) {
        self.codec.set_compressor(compressor);
    }

    // =========================================================================
    // Flushing
    // =========================================================================

    /// Commit every stream's pending bytes and metadata, then the table
    pub fn flush_all(&mut self) -> Result<()> {
        for index in 0..self.streams.len() {
            self.flush_write_buffer(index)?;
            self.persist_write_entries(index)?;
        }
        self.write_table()?;
        self.storage.sync()?;
        Ok(())
    }

    /// Commit one stream's pending bytes, its metadata and its descriptor
    pub fn flush_stream(&mut self, index: usize) -> Result<()> {
        self.flush_write_buffer(index)?;
        self.persist_write_entries(index)?;
        let slot = self.streams[index].descriptor.encode();
        self.write_at(descriptor_offset(index), &slot)?;
        self.storage.sync()?;
        Ok(())
    }

    fn write_table(&mut self) -> Result<()> {
        let mut table = Vec::with_capacity(descriptor_table_end(self.streams.len()) as usize);
        table.extend_from_slice(&self.header.encode());
        for stream in &self.streams {
            table.extend_from_slice(&stream.descriptor.encode());
        }
        self.write_at(0, &table)
    }

    // =========================================================================
    // Block Metadata
    // =========================================================================

    /// Read a block's cluster entries from disk
    fn load_block_entries(&mut self, index: usize, block: usize) -> Result<Vec<ClusterEntry>> {
        let record = self.streams[index].descriptor.blocks[block];
        let mut buf = vec![0u8; block_capacity(block) as usize * CLUSTER_ENTRY_SIZE];
        self.read_at(record.file_offset, &mut buf)?;
        decode_entries(&buf)
    }

    /// Write the write cursor's entries back to their block
    fn persist_write_entries(&mut self, index: usize) -> Result<()> {
        let stream = &self.streams[index];
        let Some(block) = stream.write.block else {
            return Ok(());
        };
        let offset = stream.descriptor.blocks[block].file_offset;
        let bytes = encode_entries(&stream.write.clusters);
        self.write_at(offset, &bytes)
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Where the next block of any stream goes
    pub fn watermark(&self) -> u64 {
        allocator::watermark(
            self.streams.iter().map(|s| &s.descriptor),
            descriptor_table_end(self.streams.len()),
            self.header.cluster_size,
        )
    }

    /// Place a new block at the watermark and record it for the stream
    fn append_block(&mut self, index: usize, stream_offset: u64) -> Result<usize> {
        let file_offset = self.watermark();
        let stream = &mut self.streams[index];
        let block = stream.descriptor.blocks.len();

        if block >= MAX_BLOCKS {
            return Err(PlexError::invalid_address(
                stream_offset,
                format!(
                    "stream '{}' has used all {} block records",
                    stream.descriptor.name, MAX_BLOCKS
                ),
            ));
        }

        stream.descriptor.blocks.push(BlockRecord {
            file_offset,
            stream_offset,
        });

        tracing::debug!(
            "Allocated block {} of stream '{}' at file offset {} ({} clusters, starts at {})",
            block,
            stream.descriptor.name,
            file_offset,
            block_capacity(block),
            stream_offset
        );

        Ok(block)
    }

    // =========================================================================
    // Raw I/O
    // =========================================================================

    /// Fill `buf` from `offset`; space past the end of the file reads as zeros
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.storage.seek(offset)?;
        let filled = read_fully(self.storage.as_mut(), buf)?;
        buf[filled..].fill(0);
        Ok(())
    }

    /// Write all of `buf` at `offset`
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.storage.seek(offset)?;
        let written = self.storage.write(buf)?;
        if written != buf.len() {
            return Err(PlexError::ShortWrite {
                offset,
                written,
                expected: buf.len(),
            });
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.closed || self.last_error.is_some() {
            return;
        }
        if let Err(e) = self.flush_all() {
            tracing::warn!("Flush on close failed: {}", e);
        }
    }
}

/// Metadata for a block nobody has written to, whose first slot starts at `start`
fn fresh_entries(block: usize, start: u64) -> Vec<ClusterEntry> {
    let mut entries = vec![ClusterEntry::default(); block_capacity(block) as usize];
    entries[0].offset = start;
    entries
}

/// Read until `buf` is full or the handle reports end of file
fn read_fully(storage: &mut dyn StorageHandle, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match storage.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
