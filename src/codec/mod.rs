//! Codec Module
//!
//! Compression plug-in and the cluster framing built on top of it.
//!
//! ## Responsibilities
//! - Define the pluggable compress/decompress contract
//! - Turn a whole-cluster byte run into plain or compressed clusters
//! - Reject compressed runs that decode to the wrong size
//!
//! ## Framing
//! ```text
//! plain:       [Plain @o][Plain @o+C][Plain @o+2C][Plain @o+3C]
//! compressed:  [Compressed{len, clusters: 4} @o][PartOfCompressed @o]
//! ```
//! A group is stored compressed only when that needs strictly fewer
//! clusters than the plain form.

mod frame;

pub use frame::{ClusterCodec, EncodedGroup};

/// Compression primitive used for cluster groups.
///
/// An empty result from `compress` means "store plain"; an empty result from
/// `decompress` means the input is corrupted.
pub trait Compressor: Send + Sync {
    fn compress(&self, input: &[u8]) -> Vec<u8>;

    fn decompress(&self, input: &[u8], expected_size: usize) -> Vec<u8>;
}

/// LZ4 block compression (default)
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn compress(&self, input: &[u8]) -> Vec<u8> {
        lz4_flex::block::compress(input)
    }

    fn decompress(&self, input: &[u8], expected_size: usize) -> Vec<u8> {
        match lz4_flex::block::decompress(input, expected_size) {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!("LZ4 decompression failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Never compresses; every group is stored plain
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn compress(&self, _input: &[u8]) -> Vec<u8> {
        Vec::new()
    }

    fn decompress(&self, _input: &[u8], _expected_size: usize) -> Vec<u8> {
        Vec::new()
    }
}
