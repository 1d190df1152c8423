//! Group Index
//!
//! Concurrent multi-map from an image key to the tile keys of that image
//! currently held in the store. Lets `get_all`/`remove_all` touch only one
//! image's tiles instead of scanning the whole cache.
//!
//! Membership sets are created on first registration and dropped as soon as
//! they become empty. Both transitions happen under the DashMap entry lock,
//! so a registration racing with the removal of the last member either lands
//! in the old set before it is dropped or creates a fresh one.

use std::collections::HashSet;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::key::{ImageKey, TileKey};

/// Upper bound on DashMap shards an index is built with
const MAX_SHARDS: usize = 1 << 12;

/// Owner -> member keys index
#[derive(Debug)]
pub struct GroupIndex {
    groups: DashMap<ImageKey, HashSet<TileKey>>,
}

impl Default for GroupIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupIndex {
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
        }
    }

    /// Create an index whose DashMap uses `shard_amount` shards
    ///
    /// `shard_amount` is clamped to `[2, MAX_SHARDS]` and rounded up to a
    /// power of two, as DashMap requires.
    pub fn with_shards(shard_amount: usize) -> Self {
        let shards = shard_amount.clamp(2, MAX_SHARDS).next_power_of_two();
        Self {
            groups: DashMap::with_shard_amount(shards),
        }
    }

    /// Register `tile_key` under `image_key` (idempotent)
    pub fn register(&self, image_key: &ImageKey, tile_key: &TileKey) {
        self.groups
            .entry(image_key.clone())
            .or_default()
            .insert(tile_key.clone());
    }

    /// Unregister `tile_key`, dropping the group once it is empty
    pub fn unregister(&self, image_key: &ImageKey, tile_key: &TileKey) {
        if let Entry::Occupied(mut group) = self.groups.entry(image_key.clone()) {
            group.get_mut().remove(tile_key);
            if group.get().is_empty() {
                group.remove();
            }
        }
    }

    /// Snapshot of the keys registered under `image_key`
    pub fn keys_for(&self, image_key: &ImageKey) -> Vec<TileKey> {
        self.groups
            .get(image_key)
            .map(|group| group.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check whether `tile_key` is registered under `image_key`
    pub fn contains(&self, image_key: &ImageKey, tile_key: &TileKey) -> bool {
        self.groups
            .get(image_key)
            .is_some_and(|group| group.contains(tile_key))
    }

    /// Number of images with at least one registered tile
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Total registered tile keys across all images
    pub fn member_count(&self) -> usize {
        self.groups.iter().map(|group| group.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
