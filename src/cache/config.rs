//! Tile Cache Configuration
//!
//! Construction-time parameters of a [`TileCache`](super::TileCache). Every
//! field can also be changed on a live cache through its setters, which
//! apply the same validation and then rebuild the store.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::policy::EvictionPolicy;
use super::{
    DEFAULT_CAPACITY, DEFAULT_CONCURRENCY_LEVEL, DEFAULT_EVICTION_WATERMARK, DEFAULT_THRESHOLD,
    MAX_CONCURRENCY_LEVEL,
};
use crate::error::{Error, Result};

/// How per-image bulk operations find an image's tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IndexStrategy {
    /// Maintain an image -> tile keys index
    #[default]
    Grouped,
    /// Walk the image's tile grid and probe every coordinate
    Scan,
}

/// Tile cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileCacheConfig {
    /// Maximum capacity in bytes
    pub capacity: u64,
    /// Fraction of capacity the cache is kept under (0.0 - 1.0)
    pub threshold: f64,
    /// Number of independently locked store shards
    pub concurrency_level: usize,
    /// Fraction of the budget an eviction pass drains down to (0.0 - 1.0)
    pub eviction_watermark: f64,
    /// Report every state change to observers and record hit/miss counts
    pub diagnostics: bool,
    /// Bulk operation strategy
    pub strategy: IndexStrategy,
    /// Eviction ranking
    pub eviction_policy: EvictionPolicy,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            threshold: DEFAULT_THRESHOLD,
            concurrency_level: DEFAULT_CONCURRENCY_LEVEL,
            eviction_watermark: DEFAULT_EVICTION_WATERMARK,
            diagnostics: false,
            strategy: IndexStrategy::default(),
            eviction_policy: EvictionPolicy::default(),
        }
    }
}

impl TileCacheConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Check every field against its allowed range
    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.threshold)?;
        validate_concurrency_level(self.concurrency_level)?;
        validate_watermark(self.eviction_watermark)?;
        validate_policy(&self.eviction_policy)?;
        Ok(())
    }

    /// Weight budget implied by capacity and threshold
    pub fn budget(&self) -> u64 {
        (self.capacity as f64 * self.threshold).floor() as u64
    }
}

/// Capacity must be non-negative
pub fn validate_capacity(capacity: i64) -> Result<u64> {
    u64::try_from(capacity)
        .map_err(|_| Error::invalid("capacity", format!("must be >= 0, got {}", capacity)))
}

/// Threshold must lie within [0, 1]
pub fn validate_threshold(threshold: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(Error::invalid(
            "threshold",
            format!("must be within [0, 1], got {}", threshold),
        ));
    }
    Ok(())
}

/// Concurrency level must lie within [1, MAX_CONCURRENCY_LEVEL]
pub fn validate_concurrency_level(level: usize) -> Result<()> {
    if level == 0 {
        return Err(Error::invalid("concurrency_level", "must be >= 1, got 0"));
    }
    if level > MAX_CONCURRENCY_LEVEL {
        return Err(Error::invalid(
            "concurrency_level",
            format!("must be <= {}, got {}", MAX_CONCURRENCY_LEVEL, level),
        ));
    }
    Ok(())
}

/// Eviction watermark must lie within [0, 1]
pub fn validate_watermark(watermark: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&watermark) {
        return Err(Error::invalid(
            "eviction_watermark",
            format!("must be within [0, 1], got {}", watermark),
        ));
    }
    Ok(())
}

/// Policy weights must be finite and non-negative
pub fn validate_policy(policy: &EvictionPolicy) -> Result<()> {
    for (name, weight) in [
        ("recency_weight", policy.recency_weight),
        ("frequency_weight", policy.frequency_weight),
    ] {
        if !weight.is_finite() || weight < 0.0 {
            return Err(Error::invalid(
                "eviction_policy",
                format!("{} must be finite and >= 0, got {}", name, weight),
            ));
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
