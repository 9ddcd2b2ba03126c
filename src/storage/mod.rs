//! Storage Module
//!
//! The byte-oriented handle a container sits on.
//!
//! ## Responsibilities
//! - Positioned reads and writes on one underlying file
//! - Growing and shrinking the file
//!
//! The engine never retries: any I/O error, or a write that accepts fewer
//! bytes than requested, invalidates the container that owns the handle.

mod file;
mod memory;

use std::io;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Narrow interface to the physical file backing a container
///
/// A handle keeps one shared position; `read` and `write` advance it.
pub trait StorageHandle: Send {
    /// Move the position to an absolute byte offset
    fn seek(&mut self, offset: u64) -> io::Result<()>;

    /// Resize the underlying file
    fn set_size(&mut self, size: u64) -> io::Result<()>;

    /// Read at the current position, returning the number of bytes read
    /// (0 at end of file)
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write at the current position, returning the number of bytes written
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Push written data to durable storage
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: StorageHandle + ?Sized> StorageHandle for Box<S> {
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        (**self).seek(offset)
    }

    fn set_size(&mut self, size: u64) -> io::Result<()> {
        (**self).set_size(size)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn sync(&mut self) -> io::Result<()> {
        (**self).sync()
    }
}
