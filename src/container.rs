//! Container Module
//!
//! The public entry point: formats or opens a container over a storage
//! handle and hands out stream handles.
//!
//! ## Responsibilities
//! - Create a container with a fixed set of named streams
//! - Open and validate an existing container
//! - Look streams up by name or list them in table order
//! - Flush everything on `flush`, `close` or drop

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::Compressor;
use crate::config::Config;
use crate::engine::{with_engine, Engine, SharedEngine};
use crate::error::Result;
use crate::storage::{FileStorage, StorageHandle};
use crate::stream::Stream;

/// A container file holding a fixed set of named streams
///
/// ## Concurrency Model
///
/// One mutex guards the whole engine. Every container and stream call takes
/// it for the duration of the call, so handles can be shared across threads
/// but operations never overlap.
///
/// ## Failure Model
///
/// The first I/O or format error invalidates the container. Later calls on
/// the container or any of its streams fail with `PlexError::Invalidated`
/// until it is reopened.
pub struct Container {
    engine: SharedEngine,
}

impl Container {
    /// Format `storage` as a new container with one empty stream per name
    ///
    /// Any existing content of the storage is discarded.
    pub fn create<S, N>(storage: S, names: &[N], config: Config) -> Result<Self>
    where
        S: StorageHandle + 'static,
        N: AsRef<str>,
    {
        let engine = Engine::create(Box::new(storage), names, &config)?;
        Ok(Self::wrap(engine))
    }

    /// Open an existing container
    ///
    /// Geometry comes from the file header; only the runtime options of
    /// `config` (prefetch size, compression) apply.
    pub fn open<S>(storage: S, config: Config) -> Result<Self>
    where
        S: StorageHandle + 'static,
    {
        let engine = Engine::open(Box::new(storage), &config)?;
        Ok(Self::wrap(engine))
    }

    /// Create (or overwrite) a container file at `path`
    pub fn create_file<N: AsRef<str>>(path: &Path, names: &[N], config: Config) -> Result<Self> {
        Self::create(FileStorage::create(path)?, names, config)
    }

    /// Open a container file at `path`
    pub fn open_file(path: &Path, config: Config) -> Result<Self> {
        Self::open(FileStorage::open(path)?, config)
    }

    fn wrap(engine: Engine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// False once an operation has failed fatally
    pub fn is_valid(&self) -> bool {
        self.engine.lock().is_valid()
    }

    /// Message of the failure that invalidated the container, if any
    pub fn last_error(&self) -> Option<String> {
        self.engine.lock().last_error().map(str::to_string)
    }

    // =========================================================================
    // Streams
    // =========================================================================

    pub fn stream_count(&self) -> usize {
        self.engine.lock().stream_count()
    }

    pub fn cluster_size(&self) -> u32 {
        self.engine.lock().header().cluster_size
    }

    /// Handles for every stream, in table order
    pub fn streams(&self) -> Vec<Stream> {
        let count = self.stream_count();
        (0..count)
            .map(|index| Stream::new(Arc::clone(&self.engine), index))
            .collect()
    }

    /// Handle for the stream called `name`
    pub fn stream(&self, name: &str) -> Option<Stream> {
        let index = self.engine.lock().find_stream(name)?;
        Some(Stream::new(Arc::clone(&self.engine), index))
    }

    // =========================================================================
    // Options
    // =========================================================================

    /// Turn compression of newly committed groups on or off
    pub fn set_compression(&self, enabled: bool) {
        self.engine.lock().set_compression(enabled);
    }

    /// Replace the compressor used for newly committed groups
    ///
    /// Existing compressed runs must stay readable by the new compressor.
    pub fn set_compressor(&self, compressor: Arc<dyn Compressor>) {
        self.engine.lock().set_compressor(compressor);
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Commit every stream's buffered bytes and all metadata to storage
    pub fn flush(&self) -> Result<()> {
        with_engine(&self.engine, Engine::flush_all)
    }

    /// Flush and release the container, reporting any flush error
    ///
    /// Stream handles still alive keep the storage open but fail all
    /// further operations with `PlexError::Closed`. A clean close is not a
    /// failure and leaves no last error behind.
    pub fn close(self) -> Result<()> {
        let result = self.flush();
        self.engine.lock().mark_closed();
        result
    }
}
