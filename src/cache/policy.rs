//! Cache Eviction Policies
//!
//! When the store exceeds its weight budget it ranks entries by an eviction
//! score combining recency and frequency, and evicts the highest scores
//! first. Recency is measured in store ticks rather than wall-clock time, so
//! ordering is stable under bursts of accesses within one clock tick.

use serde::{Deserialize, Serialize};

/// Eviction policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvictionPolicy {
    /// Name of the policy
    pub name: String,
    /// Weight for recency in eviction score (0.0 - 1.0)
    pub recency_weight: f64,
    /// Weight for frequency in eviction score (0.0 - 1.0)
    pub frequency_weight: f64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::lru()
    }
}

impl EvictionPolicy {
    /// Pure LRU eviction policy (default)
    ///
    /// Evicts least recently accessed tiles first.
    pub fn lru() -> Self {
        Self {
            name: "LRU".to_string(),
            recency_weight: 1.0,
            frequency_weight: 0.0,
        }
    }

    /// LFU eviction policy
    ///
    /// Evicts least frequently accessed tiles first.
    pub fn lfu() -> Self {
        Self {
            name: "LFU".to_string(),
            recency_weight: 0.0,
            frequency_weight: 1.0,
        }
    }

    /// LRU-K eviction policy
    ///
    /// Balances recency and frequency, penalizing tiles touched only once.
    pub fn lru_k() -> Self {
        Self {
            name: "LRU-K".to_string(),
            recency_weight: 0.5,
            frequency_weight: 0.5,
        }
    }

    /// Calculate eviction score for an entry
    ///
    /// `age_ticks` is the distance between the store clock and the entry's
    /// last access, normalized by `horizon` (the store clock itself).
    /// Higher score = more likely to evict.
    pub fn score(&self, age_ticks: u64, horizon: u64, access_count: u32) -> f64 {
        let age_score = age_ticks as f64 / horizon.max(1) as f64;
        let freq_score = 1.0 / (access_count as f64 + 1.0);

        self.recency_weight * age_score + self.frequency_weight * freq_score
    }
}

// =============================================================================
// Tests
// =============================================================================
