//! Concurrent Tile Cache
//!
//! Size-bounded cache of computed raster tiles, keyed by (owner, tile x,
//! tile y) and weighed by payload bytes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         TileCache (Facade)                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  add / get / remove        get_all / remove_all       flush       │
//! │        │                          │                     │        │
//! │        ▼                          ▼                     ▼        │
//! │  ┌─────────────────┐     ┌─────────────────┐   ┌──────────────┐  │
//! │  │ WeightedStore   │◀───▶│ GroupIndex      │   │ Observer     │  │
//! │  │ ShardedMap      │     │ image -> keys   │   │ Registry     │  │
//! │  │ (N-way striped) │     │ (DashMap)       │   │ (diagnostics)│  │
//! │  └─────────────────┘     └─────────────────┘   └──────────────┘  │
//! │          │                                                        │
//! │   Eviction (EvictionPolicy over a logical access clock)          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - Lookups take one shard read lock and never evict
//! - The group index changes under the same shard lock as the store
//! - Owners are held weakly; tiles of a dropped owner read as absent
//! - Reconfiguration swaps in a fresh store instead of mutating the live one

mod config;
mod diagnostics;
mod entry;
mod exporter;
mod group;
mod key;
mod metrics;
mod policy;
mod shard;
mod store;
mod tile_cache;
mod weigher;

#[cfg(test)]
mod proptest;

pub use config::{
    validate_capacity, validate_concurrency_level, validate_policy, validate_threshold,
    validate_watermark, IndexStrategy, TileCacheConfig,
};
pub use diagnostics::{
    ChannelObserver, InMemoryObserver, LoggingObserver, ObserverId, ObserverRegistry,
    TileCacheObserver, TileNotification,
};
pub use entry::{CacheEntry, OwnerRef, TileAction};
pub use exporter::PrometheusExporter;
pub use group::GroupIndex;
pub use key::{fx_hash, ImageKey, TileKey};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use policy::EvictionPolicy;
pub use shard::{Shard, ShardedMap};
pub use store::{EntryRef, PutOutcome, StoreConfig, WeightedStore};
pub use tile_cache::{TileCache, TileCacheStats};
pub use weigher::{FnWeigher, SampleWeigher, TileWeigher};

/// Default capacity (16MB)
pub const DEFAULT_CAPACITY: u64 = 16 * 1024 * 1024;

/// Default fraction of capacity the cache is kept under
pub const DEFAULT_THRESHOLD: f64 = 0.75;

/// Default number of store shards
pub const DEFAULT_CONCURRENCY_LEVEL: usize = 4;

/// Largest accepted concurrency level
pub const MAX_CONCURRENCY_LEVEL: usize = 1 << 16;

/// Default fraction of the budget an eviction pass drains down to
pub const DEFAULT_EVICTION_WATERMARK: f64 = 0.9;

/// Bookkeeping bytes charged per entry on top of its samples
pub const ENTRY_OVERHEAD_BYTES: u64 = 64;

// =============================================================================
// Tests
// =============================================================================
