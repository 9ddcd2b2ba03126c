//! Configuration for plexfile
//!
//! Centralized configuration with sensible defaults.

use crate::error::{PlexError, Result};
use crate::layout::{CLUSTER_LEN_MASK, MAX_CLUSTER_SIZE, MIN_CLUSTER_SIZE};

/// Container configuration
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Geometry (persisted in the header at creation)
    // -------------------------------------------------------------------------
    /// Bytes per cluster, the unit of addressing and compression
    pub cluster_size: u32,

    /// Clusters accumulated in a stream's write buffer before it is committed
    pub clusters_per_group: u32,

    // -------------------------------------------------------------------------
    // Runtime Tuning
    // -------------------------------------------------------------------------
    /// Read-ahead budget, in clusters, decoded per prefetch
    pub prefetch_clusters: u32,

    /// Try to compress each committed group
    pub compression: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_size: 4 * 1024,
            clusters_per_group: 16,
            prefetch_clusters: 32,
            compression: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the geometry can be represented on disk
    pub fn validate(&self) -> Result<()> {
        validate_geometry(self.cluster_size, self.clusters_per_group)?;

        if self.prefetch_clusters == 0 {
            return Err(PlexError::Config(
                "prefetch_clusters must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Geometry rules shared by config validation and header parsing
pub(crate) fn validate_geometry(cluster_size: u32, clusters_per_group: u32) -> Result<()> {
    if !cluster_size.is_power_of_two()
        || !(MIN_CLUSTER_SIZE..=MAX_CLUSTER_SIZE).contains(&cluster_size)
    {
        return Err(PlexError::Config(format!(
            "cluster_size must be a power of two in {}..={}, got {}",
            MIN_CLUSTER_SIZE, MAX_CLUSTER_SIZE, cluster_size
        )));
    }

    if clusters_per_group == 0 {
        return Err(PlexError::Config(
            "clusters_per_group must be at least 1".to_string(),
        ));
    }

    // A compressed group's byte length has to fit the flag word
    let group_bytes = cluster_size as u64 * clusters_per_group as u64;
    if group_bytes > CLUSTER_LEN_MASK as u64 {
        return Err(PlexError::Config(format!(
            "write group of {} bytes exceeds the {} byte limit",
            group_bytes, CLUSTER_LEN_MASK
        )));
    }

    Ok(())
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the cluster size (in bytes)
    pub fn cluster_size(mut self, size: u32) -> Self {
        self.config.cluster_size = size;
        self
    }

    /// Set the number of clusters per write group
    pub fn clusters_per_group(mut self, count: u32) -> Self {
        self.config.clusters_per_group = count;
        self
    }

    /// Set the read-ahead budget (in clusters)
    pub fn prefetch_clusters(mut self, count: u32) -> Self {
        self.config.prefetch_clusters = count;
        self
    }

    /// Enable or disable compression of committed groups
    pub fn compression(mut self, enabled: bool) -> Self {
        self.config.compression = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
