//! Property-Based Tests for the Tile Cache
//!
//! # Test Properties
//!
//! 1. **Key Uniqueness**: distinct coordinates and owners never share a key
//! 2. **Round Trip**: a tile read back right after insertion is the one added
//! 3. **Weight Bound**: total weight never settles above the budget
//! 4. **No Aliasing**: a tile is never found under another coordinate
//! 5. **Idempotent Removal**: removing twice equals removing once

#![cfg(test)]

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;

use super::config::{IndexStrategy, TileCacheConfig};
use super::entry::OwnerRef;
use super::key::{ImageKey, TileKey};
use super::tile_cache::TileCache;
use super::weigher::FnWeigher;
use crate::raster::{Raster, RasterImage, SampleType};

// =============================================================================
// Property Strategies
// =============================================================================

/// Tile coordinates inside a 64x64 grid
fn coord_strategy() -> impl Strategy<Value = (i32, i32)> {
    (0i32..64, 0i32..64)
}

fn strategy_strategy() -> impl Strategy<Value = IndexStrategy> {
    prop_oneof![Just(IndexStrategy::Grouped), Just(IndexStrategy::Scan)]
}

#[derive(Debug, Clone)]
enum Op {
    Add { owner: usize, x: i32, y: i32, weight: u64 },
    Get { owner: usize, x: i32, y: i32 },
    Remove { owner: usize, x: i32, y: i32 },
    RemoveAll { owner: usize },
    Flush,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0usize..3, 0i32..8, 0i32..8, 1u64..600)
            .prop_map(|(owner, x, y, weight)| Op::Add { owner, x, y, weight }),
        3 => (0usize..3, 0i32..8, 0i32..8).prop_map(|(owner, x, y)| Op::Get { owner, x, y }),
        2 => (0usize..3, 0i32..8, 0i32..8).prop_map(|(owner, x, y)| Op::Remove { owner, x, y }),
        1 => (0usize..3).prop_map(|owner| Op::RemoveAll { owner }),
        1 => Just(Op::Flush),
    ]
}

fn owners(count: usize) -> Vec<OwnerRef> {
    (0..count)
        .map(|_| Arc::new(RasterImage::new(2048, 2048, 256, 256)) as OwnerRef)
        .collect()
}

/// Payload whose bytes encode its weight, used as the weigher's input
fn weighted_tile(weight: u64) -> Arc<Raster> {
    Arc::new(Raster::new(
        bytes::Bytes::copy_from_slice(&weight.to_le_bytes()),
        SampleType::U8,
        8,
        1,
        1,
    ))
}

fn weight_of(raster: &Raster) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&raster.data()[..8]);
    u64::from_le_bytes(buf)
}

fn cache(capacity: u64, threshold: f64, strategy: IndexStrategy) -> TileCache {
    let config = TileCacheConfig {
        capacity,
        threshold,
        strategy,
        ..Default::default()
    };
    TileCache::with_weigher(config, FnWeigher(weight_of)).unwrap()
}

// =============================================================================
// Key Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: distinct coordinates of one owner derive distinct keys.
    #[test]
    fn prop_tile_keys_unique(
        coords in prop::collection::hash_set(coord_strategy(), 1..200),
    ) {
        let owner: OwnerRef = Arc::new(RasterImage::new(64 * 256, 64 * 256, 256, 256));
        let keys: HashSet<TileKey> = coords
            .iter()
            .map(|&(x, y)| TileKey::derive(owner.as_ref(), x, y))
            .collect();
        prop_assert_eq!(keys.len(), coords.len());
    }

    /// Property: anonymous owners (packed keys) stay unique as well.
    #[test]
    fn prop_packed_keys_unique(
        coords in prop::collection::hash_set(coord_strategy(), 1..200),
    ) {
        let owner: OwnerRef = Arc::new(RasterImage::anonymous(64 * 64, 64 * 64, 64, 64));
        let keys: HashSet<TileKey> = coords
            .iter()
            .map(|&(x, y)| TileKey::derive(owner.as_ref(), x, y))
            .collect();
        prop_assert_eq!(keys.len(), coords.len());
    }

    /// Property: distinct owners derive distinct image keys.
    #[test]
    fn prop_image_keys_unique(count in 1usize..50) {
        let owners = owners(count);
        let keys: HashSet<ImageKey> = owners
            .iter()
            .map(|o| ImageKey::derive(o.as_ref()))
            .collect();
        prop_assert_eq!(keys.len(), count);
    }
}

// =============================================================================
// Cache Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: add followed by get returns the added payload.
    #[test]
    fn prop_round_trip(
        tiles in prop::collection::vec((coord_strategy(), 1u64..1000), 1..50),
        strategy in strategy_strategy(),
    ) {
        let cache = cache(u64::MAX / 2, 1.0, strategy);
        let owner = owners(1).remove(0);

        for &((x, y), weight) in &tiles {
            let payload = weighted_tile(weight);
            cache.add(&owner, x, y, Some(Arc::clone(&payload)), None);
            let found = cache.get(&owner, x, y);
            prop_assert_eq!(found.as_deref(), Some(payload.as_ref()));
        }
    }

    /// Property: the running weight settles within budget after every operation.
    #[test]
    fn prop_weight_bound(
        ops in prop::collection::vec(op_strategy(), 1..120),
        capacity in 0u64..4096,
        threshold in 0.0f64..=1.0,
        strategy in strategy_strategy(),
    ) {
        let cache = cache(capacity, threshold, strategy);
        let budget = cache.stats().budget;
        let owners = owners(3);

        for op in ops {
            match op {
                Op::Add { owner, x, y, weight } => {
                    cache.add(&owners[owner], x, y, Some(weighted_tile(weight)), None);
                }
                Op::Get { owner, x, y } => {
                    cache.get(&owners[owner], x, y);
                }
                Op::Remove { owner, x, y } => {
                    cache.remove(&owners[owner], x, y);
                }
                Op::RemoveAll { owner } => {
                    cache.remove_all(&owners[owner]);
                }
                Op::Flush => cache.flush(),
            }
            prop_assert!(cache.memory_used() <= budget);
        }

        // Every tile get_all reports is individually retrievable
        for owner in &owners {
            let all = cache.get_all(owner);
            prop_assert!(all.len() <= cache.tile_count());
        }
    }

    /// Property: a tile is only ever returned for the coordinate it was
    /// added at, even when either coordinate lies outside the grid.
    #[test]
    fn prop_no_coordinate_aliasing(
        added in (-40i32..40, -40i32..40),
        probed in (-40i32..40, -40i32..40),
    ) {
        prop_assume!(added != probed);
        let cache = cache(1 << 20, 1.0, IndexStrategy::Grouped);
        let owner = owners(1).remove(0);
        let grid = owner.tile_grid();

        cache.add(&owner, added.0, added.1, Some(weighted_tile(10)), None);
        prop_assert!(cache.get(&owner, probed.0, probed.1).is_none());
        prop_assert_eq!(
            cache.get(&owner, added.0, added.1).is_some(),
            grid.contains(added.0, added.1)
        );
    }

    /// Property: a second remove / remove_all is a no-op.
    #[test]
    fn prop_idempotent_remove(
        coords in prop::collection::hash_set((0i32..8, 0i32..8), 1..30),
        strategy in strategy_strategy(),
    ) {
        let cache = cache(u64::MAX / 2, 1.0, strategy);
        let owners = owners(2);
        for &(x, y) in &coords {
            cache.add(&owners[0], x, y, Some(weighted_tile(10)), None);
            cache.add(&owners[1], x, y, Some(weighted_tile(10)), None);
        }

        let &(x, y) = coords.iter().next().unwrap();
        prop_assert!(cache.remove(&owners[0], x, y).is_some());
        let after_first = cache.tile_count();
        prop_assert!(cache.remove(&owners[0], x, y).is_none());
        prop_assert_eq!(cache.tile_count(), after_first);

        prop_assert_eq!(cache.remove_all(&owners[0]), coords.len() - 1);
        let after_first = cache.tile_count();
        prop_assert_eq!(cache.remove_all(&owners[0]), 0);
        prop_assert_eq!(cache.tile_count(), after_first);
        prop_assert_eq!(cache.get_all(&owners[1]).len(), coords.len());
    }
}
