//! Error types for plexfile
//!
//! Provides a unified error type for all container and stream operations.

use thiserror::Error;

/// Result type alias using PlexError
pub type Result<T> = std::result::Result<T, PlexError>;

/// Unified error type for plexfile operations
#[derive(Debug, Error)]
pub enum PlexError {
    // -------------------------------------------------------------------------
    // Format Errors
    // -------------------------------------------------------------------------
    #[error("Not a container: {0}")]
    NotAContainer(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Short write: {written} of {expected} bytes at offset {offset}")]
    ShortWrite {
        offset: u64,
        written: usize,
        expected: usize,
    },

    // -------------------------------------------------------------------------
    // Data Errors
    // -------------------------------------------------------------------------
    #[error("Corrupted compressed region: {0}")]
    CorruptedRegion(String),

    #[error("Unexpected cluster metadata: {0}")]
    UnexpectedMetadata(String),

    #[error("Invalid or oversized address {address}: {reason}")]
    InvalidAddress { address: u64, reason: String },

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Invalid stream name: {0}")]
    InvalidStreamName(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Container is invalid after a previous failure: {0}")]
    Invalidated(String),

    #[error("Container was closed")]
    Closed,
}

impl PlexError {
    /// Whether this error leaves the container unusable until it is reopened.
    ///
    /// Caller mistakes (bad names, bad configuration) are reported but do not
    /// poison the container.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PlexError::InvalidStreamName(_)
                | PlexError::Config(_)
                | PlexError::Invalidated(_)
                | PlexError::Closed
        )
    }

    pub(crate) fn invalid_address(address: u64, reason: impl Into<String>) -> Self {
        PlexError::InvalidAddress {
            address,
            reason: reason.into(),
        }
    }
}
