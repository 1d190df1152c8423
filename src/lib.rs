//! Tilecache - Concurrent Raster Tile Cache
//!
//! A size-bounded, thread-safe cache for computed image tiles. Tiles are
//! keyed by the image they belong to and their tile coordinate, weighed by
//! payload bytes, and evicted once the cache grows past a configurable
//! fraction of its capacity.
//!
//! # Architecture
//!
//! ```text
//! Raster owners (TileOwner) → TileCache (Facade) → WeightedStore + GroupIndex
//! ```
//!
//! # Features
//!
//! - Byte-weighted capacity with a soft eviction threshold
//! - Lock-striped store sized by the concurrency level
//! - Per-image bulk lookup and invalidation through a group index
//! - Opt-in diagnostics: observer notifications and hit/miss counters
//! - Prometheus text exposition of cache statistics
//!
//! # Modules
//!
//! - [`cache`] - Store, index, diagnostics and the cache facade
//! - [`error`] - Error types
//! - [`raster`] - Tile owners and payloads

pub mod cache;
pub mod error;
pub mod raster;

// Re-export commonly used types
pub use cache::{
    EvictionPolicy, IndexStrategy, OwnerRef, TileAction, TileCache, TileCacheConfig,
    TileCacheObserver, TileCacheStats,
};
pub use error::{Error, Result};
pub use raster::{Raster, RasterImage, SampleType, TileGrid, TileOwner, TilePayload};
