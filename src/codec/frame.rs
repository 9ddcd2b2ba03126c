//! Cluster framing
//!
//! Encodes write groups into cluster payloads plus metadata entries, and
//! decodes compressed runs back into logical bytes.

use std::borrow::Cow;
use std::sync::Arc;

use crate::error::{PlexError, Result};
use crate::layout::{ClusterEntry, ClusterState, CLUSTER_LEN_MASK};

use super::Compressor;

/// On-disk form of one write group
#[derive(Debug)]
pub struct EncodedGroup<'a> {
    /// Bytes to write, always a whole number of clusters
    pub payload: Cow<'a, [u8]>,
    /// One entry per physical cluster in `payload`
    pub entries: Vec<ClusterEntry>,
}

impl EncodedGroup<'_> {
    pub fn is_compressed(&self) -> bool {
        matches!(
            self.entries.first().map(|e| e.state),
            Some(ClusterState::Compressed { .. })
        )
    }
}

/// Chooses between plain and compressed storage for cluster groups
#[derive(Clone)]
pub struct ClusterCodec {
    compressor: Arc<dyn Compressor>,
    enabled: bool,
    cluster_size: u32,
    clusters_per_group: u32,
}

impl ClusterCodec {
    pub fn new(
        compressor: Arc<dyn Compressor>,
        enabled: bool,
        cluster_size: u32,
        clusters_per_group: u32,
    ) -> Self {
        Self {
            compressor,
            enabled,
            cluster_size,
            clusters_per_group,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_compressor(&mut self, compressor: Arc<dyn Compressor>) {
        self.compressor = compressor;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Encode a whole-cluster run whose first byte sits at logical `start`.
    ///
    /// Falls back to plain clusters unless compression saves at least one
    /// cluster.
    pub fn encode<'a>(&self, data: &'a [u8], start: u64) -> EncodedGroup<'a> {
        let cluster = self.cluster_size as usize;
        debug_assert_eq!(data.len() % cluster, 0);
        let logical_clusters = data.len() / cluster;

        if self.enabled && logical_clusters > 1 {
            let mut compressed = self.compressor.compress(data);
            let len = compressed.len();
            let needed = len.div_ceil(cluster);

            if len != 0 && needed < logical_clusters && len <= CLUSTER_LEN_MASK as usize {
                compressed.resize(needed * cluster, 0);

                let mut entries = Vec::with_capacity(needed);
                entries.push(ClusterEntry {
                    state: ClusterState::Compressed {
                        len: len as u32,
                        clusters: logical_clusters as u32,
                    },
                    offset: start,
                });
                entries.extend((1..needed).map(|_| ClusterEntry {
                    state: ClusterState::PartOfCompressed,
                    offset: start,
                }));

                return EncodedGroup {
                    payload: Cow::Owned(compressed),
                    entries,
                };
            }
        }

        let entries = (0..logical_clusters)
            .map(|i| ClusterEntry::plain(start + (i * cluster) as u64))
            .collect();

        EncodedGroup {
            payload: Cow::Borrowed(data),
            entries,
        }
    }

    /// Physical clusters occupied by a compressed payload of `len` bytes
    pub fn clusters_for(&self, len: u32) -> usize {
        (len as usize).div_ceil(self.cluster_size as usize)
    }

    /// Check a run head read from disk and return the physical slots its
    /// payload occupies.
    ///
    /// A run covers at most one group, saves at least one cluster, and its
    /// logical clusters fit in the `slots_left` slots from its head to the
    /// end of the block.
    pub fn run_span(&self, len: u32, clusters: u32, slots_left: usize) -> Result<usize> {
        let span = self.clusters_for(len);
        if len == 0
            || clusters > self.clusters_per_group
            || clusters as usize > slots_left
            || span >= clusters as usize
        {
            return Err(PlexError::CorruptedRegion(format!(
                "run head declares {} bytes over {} clusters with {} slots left",
                len, clusters, slots_left
            )));
        }
        Ok(span)
    }

    /// Decode a compressed run's payload (exactly `len` bytes) into its
    /// `clusters` logical clusters
    pub fn decode(&self, payload: &[u8], clusters: u32) -> Result<Vec<u8>> {
        if clusters == 0 || clusters > self.clusters_per_group {
            return Err(PlexError::CorruptedRegion(format!(
                "compressed run expands to {} clusters, a group holds {}",
                clusters, self.clusters_per_group
            )));
        }
        let expected = clusters as usize * self.cluster_size as usize;

        let decoded = self.compressor.decompress(payload, expected);
        if decoded.is_empty() {
            return Err(PlexError::CorruptedRegion(format!(
                "decompression of {} bytes produced no output",
                payload.len()
            )));
        }
        if decoded.len() != expected {
            return Err(PlexError::CorruptedRegion(format!(
                "compressed run decoded to {} bytes, expected {}",
                decoded.len(),
                expected
            )));
        }

        Ok(decoded)
    }
}
