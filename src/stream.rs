//! Stream handles
//!
//! A `Stream` is a cheap, cloneable handle to one named stream of a
//! container. Writes always append at the end of the stream; reads follow
//! their own position, moved with `seek`.

use std::io;

use crate::engine::{with_engine, SharedEngine};
use crate::error::{PlexError, Result};

/// Handle to one stream of a container
#[derive(Clone)]
pub struct Stream {
    engine: SharedEngine,
    index: usize,
}

impl Stream {
    pub(crate) fn new(engine: SharedEngine, index: usize) -> Self {
        Self { engine, index }
    }

    /// Position of the stream in the container's table
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> String {
        self.engine.lock().stream_name(self.index).to_string()
    }

    /// Logical size in bytes, including bytes not yet committed
    pub fn size(&self) -> u64 {
        self.engine.lock().stream_size(self.index)
    }

    /// Current read position
    pub fn position(&self) -> u64 {
        self.engine.lock().position(self.index)
    }

    /// Grow the stream with zeros or truncate it to `size` bytes
    pub fn set_size(&self, size: u64) -> Result<()> {
        with_engine(&self.engine, |engine| engine.set_size(self.index, size))
    }

    /// Read from the current position, returning the number of bytes read
    ///
    /// Zero means the position is at or past the end of the stream.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        with_engine(&self.engine, |engine| engine.read(self.index, buf))
    }

    /// Append `data` at the end of the stream, returning the bytes accepted
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        with_engine(&self.engine, |engine| engine.append(self.index, data))
    }

    /// Move the read position to `pos`
    pub fn seek(&self, pos: u64) -> Result<()> {
        with_engine(&self.engine, |engine| {
            engine.seek(self.index, pos);
            Ok(())
        })
    }

    /// Commit this stream's buffered bytes and its descriptor
    pub fn flush(&self) -> Result<()> {
        with_engine(&self.engine, |engine| engine.flush_stream(self.index))
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("index", &self.index)
            .field("name", &self.name())
            .finish()
    }
}

// =============================================================================
// std::io adapters
// =============================================================================

impl io::Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Stream::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Stream::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Stream::flush(self).map_err(io::Error::from)
    }
}

/// Seeking moves the read position only
impl io::Seek for Stream {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let base = match pos {
            io::SeekFrom::Start(offset) => {
                Stream::seek(self, offset)?;
                return Ok(offset);
            }
            io::SeekFrom::End(delta) => (self.size(), delta),
            io::SeekFrom::Current(delta) => (self.position(), delta),
        };

        let target = base
            .0
            .checked_add_signed(base.1)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream"))?;
        Stream::seek(self, target)?;
        Ok(target)
    }
}

impl From<PlexError> for io::Error {
    fn from(err: PlexError) -> Self {
        match err {
            PlexError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
