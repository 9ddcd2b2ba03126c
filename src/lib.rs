//! # plexfile
//!
//! Many independently growable byte streams inside one container file:
//! - Fixed table of named streams, created up front
//! - Blocks that grow geometrically as a stream grows
//! - Groups of clusters compressed when it saves space
//! - Buffered appends and read-ahead per stream
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Container / Stream handles                   │
//! │          (one mutex, sticky failure, io::Read/Write)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                         Engine                               │
//! │    translate (addr → block, cluster)   reader   writer       │
//! └──────┬──────────────────┬──────────────────────┬────────────┘
//!        │                  │                      │
//!        ▼                  ▼                      ▼
//!  ┌───────────┐     ┌─────────────┐        ┌─────────────┐
//!  │  Layout   │     │  Allocator  │        │    Codec    │
//!  │ (on disk) │     │  (growth)   │        │    (LZ4)    │
//!  └─────┬─────┘     └─────────────┘        └─────────────┘
//!        │
//!        ▼
//!  ┌─────────────┐
//!  │   Storage   │
//!  │ (file/mem)  │
//!  └─────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! ┌────────┬──────────────────────────────┬─────────┬─────────┬─────
//! │ header │ descriptor × stream_count    │ block   │ block   │ ...
//! │ 64 B   │ 1024 B each                  │ entries │ entries │
//! │        │ name, size, block records    │ + data  │ + data  │
//! └────────┴──────────────────────────────┴─────────┴─────────┴─────
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod layout;
pub mod allocator;
pub mod codec;
pub mod storage;

mod engine;
pub mod container;
pub mod stream;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{PlexError, Result};
pub use config::Config;
pub use container::Container;
pub use stream::Stream;
pub use storage::{FileStorage, MemoryStorage, StorageHandle};
pub use codec::{Compressor, Lz4Compressor, NoCompression};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of plexfile
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
