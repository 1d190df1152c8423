//! Tile Cache Facade
//!
//! Public operations of the cache, composed from the weighted store, the
//! optional group index, the diagnostics registry and the metrics counters.
//!
//! The store lives behind an `RwLock<Arc<_>>`: every operation clones the
//! current `Arc` and works against that snapshot, so a rebuild (capacity,
//! threshold, concurrency, strategy, policy or diagnostics change) swaps in
//! a fresh store without waiting for in-flight lookups. Operations that
//! raced with the swap simply miss and the caller recomputes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::config::{
    validate_capacity, validate_concurrency_level, validate_policy, validate_threshold,
    validate_watermark, IndexStrategy, TileCacheConfig,
};
use super::diagnostics::{ObserverId, ObserverRegistry, TileCacheObserver, TileNotification};
use super::entry::{CacheEntry, OwnerRef, TileAction};
use super::key::{ImageKey, TileKey};
use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::policy::EvictionPolicy;
use super::store::{EntryRef, StoreConfig, WeightedStore};
use super::weigher::{SampleWeigher, TileWeigher};
use crate::error::{Error, Result};
use crate::raster::{Raster, TilePayload};

fn store_config(config: &TileCacheConfig) -> StoreConfig {
    StoreConfig {
        capacity: config.capacity,
        threshold: config.threshold,
        concurrency_level: config.concurrency_level,
        watermark: config.eviction_watermark,
        policy: config.eviction_policy.clone(),
        indexed: config.strategy == IndexStrategy::Grouped,
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct TileCacheStats {
    /// Number of cached tiles
    pub tile_count: usize,
    /// Total weight of cached tiles in bytes
    pub memory_used: u64,
    /// Maximum capacity in bytes
    pub capacity: u64,
    pub threshold: f64,
    /// Weight budget (`capacity * threshold`)
    pub budget: u64,
    /// Weight an eviction pass drains down to
    pub low_watermark: u64,
    /// Eviction passes run by the current store
    pub eviction_passes: u64,
    pub concurrency_level: usize,
    pub diagnostics: bool,
    pub strategy: IndexStrategy,
    /// Images with at least one indexed tile (grouped strategy only)
    pub images_indexed: Option<usize>,
    /// Counters; hits and misses are zero unless diagnostics are enabled
    pub metrics: MetricsSnapshot,
}

/// Concurrent, size-bounded tile cache
pub struct TileCache<P = Raster>
where
    P: TilePayload,
{
    /// Current store
    store: RwLock<Arc<WeightedStore<P>>>,
    /// Configuration the current store was built from
    config: RwLock<TileCacheConfig>,
    /// Mirrors `config.diagnostics` for the hot path
    diagnostics: AtomicBool,
    /// Diagnostics observers
    observers: ObserverRegistry,
    /// Counters
    metrics: CacheMetrics,
    /// Entry cost function
    weigher: Arc<dyn TileWeigher<P>>,
    /// Serializes rebuilds
    rebuild_lock: Mutex<()>,
}

impl<P: TilePayload> std::fmt::Debug for TileCache<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache").finish_non_exhaustive()
    }
}

impl Default for TileCache<Raster> {
    fn default() -> Self {
        Self::build(TileCacheConfig::default(), Arc::new(SampleWeigher::new()))
    }
}

impl<P: TilePayload> TileCache<P> {
    /// Create a cache weighing payloads by their sample bytes
    pub fn new(config: TileCacheConfig) -> Result<Self> {
        Self::with_weigher(config, SampleWeigher::new())
    }

    /// Create a cache with a custom weight function
    pub fn with_weigher<W: TileWeigher<P>>(config: TileCacheConfig, weigher: W) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, Arc::new(weigher)))
    }

    fn build(config: TileCacheConfig, weigher: Arc<dyn TileWeigher<P>>) -> Self {
        info!(
            capacity = config.capacity,
            threshold = config.threshold,
            concurrency_level = config.concurrency_level,
            strategy = ?config.strategy,
            diagnostics = config.diagnostics,
            "Creating tile cache"
        );
        Self {
            store: RwLock::new(Arc::new(WeightedStore::new(store_config(&config)))),
            diagnostics: AtomicBool::new(config.diagnostics),
            config: RwLock::new(config),
            observers: ObserverRegistry::new(),
            metrics: CacheMetrics::new(),
            weigher,
            rebuild_lock: Mutex::new(()),
        }
    }

    #[inline]
    fn store(&self) -> Arc<WeightedStore<P>> {
        Arc::clone(&self.store.read())
    }

    #[inline]
    fn diagnostics_on(&self) -> bool {
        self.diagnostics.load(Ordering::Acquire)
    }

    fn notify(&self, entry: &CacheEntry<P>, action: TileAction) {
        let notification = TileNotification::from_entry(entry, action);
        self.observers.publish(&notification);
    }

    fn record_evictions(&self, evicted: &[EntryRef<P>], diagnostics: bool) {
        for entry in evicted {
            self.metrics.record_eviction(entry.weight());
            if diagnostics {
                self.notify(entry, TileAction::EvictedForSize);
            }
        }
    }

    // =========================================================================
    // Single-tile operations
    // =========================================================================

    /// Cache `payload` as tile `(tile_x, tile_y)` of `owner`
    ///
    /// An absent payload (the tile failed to compute) is a no-op, as is a
    /// coordinate outside the owner's tile grid. `cost_hint` is carried to
    /// diagnostics and does not affect the entry's weight.
    pub fn add(
        &self,
        owner: &OwnerRef,
        tile_x: i32,
        tile_y: i32,
        payload: Option<Arc<P>>,
        cost_hint: Option<u64>,
    ) {
        let Some(payload) = payload else {
            trace!(tile_x, tile_y, "Ignoring absent tile payload");
            return;
        };
        if !owner.tile_grid().contains(tile_x, tile_y) {
            debug!(tile_x, tile_y, "Ignoring tile outside the image grid");
            return;
        }

        let weight = self.weigher.weigh(&payload).max(1);
        let entry = Arc::new(CacheEntry::new(
            owner, tile_x, tile_y, payload, weight, cost_hint,
        ));
        let outcome = self.store().put(Arc::clone(&entry));

        let diagnostics = self.diagnostics_on();
        if diagnostics {
            let substituted = outcome.previous.is_some();
            self.metrics.record_addition(substituted);
            let action = if substituted {
                TileAction::Substituted
            } else {
                TileAction::Added
            };
            self.notify(&entry, action);
        }
        self.record_evictions(&outcome.evicted, diagnostics);
    }

    /// Key of an in-grid tile; `None` for coordinates outside the grid,
    /// whose linear index would alias an in-grid tile
    fn grid_key(owner: &OwnerRef, tile_x: i32, tile_y: i32) -> Option<TileKey> {
        owner
            .tile_grid()
            .contains(tile_x, tile_y)
            .then(|| TileKey::derive(owner.as_ref(), tile_x, tile_y))
    }

    /// Cached payload of tile `(tile_x, tile_y)` of `owner`, if present
    pub fn get(&self, owner: &OwnerRef, tile_x: i32, tile_y: i32) -> Option<Arc<P>> {
        let Some(key) = Self::grid_key(owner, tile_x, tile_y) else {
            if self.diagnostics_on() {
                self.metrics.record_miss();
            }
            return None;
        };
        self.lookup(&self.store(), &key).map(|e| Arc::clone(e.payload()))
    }

    /// Check for a tile without touching it or counting a hit
    pub fn contains(&self, owner: &OwnerRef, tile_x: i32, tile_y: i32) -> bool {
        let Some(key) = Self::grid_key(owner, tile_x, tile_y) else {
            return false;
        };
        self.store()
            .peek(&key)
            .is_some_and(|entry| !entry.is_orphaned())
    }

    fn lookup(&self, store: &WeightedStore<P>, key: &TileKey) -> Option<EntryRef<P>> {
        let diagnostics = self.diagnostics_on();
        match store.get_if_present(key) {
            Some(entry) if entry.is_orphaned() => {
                // Owner dropped; its tiles are unreachable
                store.invalidate_entry(&entry);
                if diagnostics {
                    self.metrics.record_miss();
                }
                None
            }
            Some(entry) => {
                if diagnostics {
                    entry.touch();
                    self.metrics.record_hit();
                    self.notify(&entry, TileAction::Touched);
                }
                Some(entry)
            }
            None => {
                if diagnostics {
                    self.metrics.record_miss();
                }
                None
            }
        }
    }

    /// Remove tile `(tile_x, tile_y)` of `owner`, returning its payload
    pub fn remove(&self, owner: &OwnerRef, tile_x: i32, tile_y: i32) -> Option<Arc<P>> {
        let key = Self::grid_key(owner, tile_x, tile_y)?;
        self.remove_key(&self.store(), &key)
            .map(|e| Arc::clone(e.payload()))
    }

    fn remove_key(&self, store: &WeightedStore<P>, key: &TileKey) -> Option<EntryRef<P>> {
        if !self.diagnostics_on() {
            return store.invalidate(key);
        }

        // Best effort: an eviction may win the race in between
        if let Some(entry) = store.peek(key) {
            self.notify(&entry, TileAction::AboutToBeRemoved);
        }
        let removed = store.invalidate(key)?;
        self.metrics.record_removal();
        self.notify(&removed, TileAction::ManuallyRemoved);
        Some(removed)
    }

    // =========================================================================
    // Per-owner operations
    // =========================================================================

    /// Keys of every tile of `owner` the store may hold
    fn owner_keys(&self, store: &WeightedStore<P>, owner: &OwnerRef) -> Vec<TileKey> {
        let image_key = ImageKey::derive(owner.as_ref());
        match store.keys_for(&image_key) {
            Some(keys) => keys,
            None => owner
                .tile_grid()
                .coordinates()
                .map(|(x, y)| TileKey::derive(owner.as_ref(), x, y))
                .collect(),
        }
    }

    /// Every tile of `owner` currently cached, ordered row-major
    pub fn get_all(&self, owner: &OwnerRef) -> Vec<Arc<P>> {
        let store = self.store();
        let mut entries: Vec<EntryRef<P>> = self
            .owner_keys(&store, owner)
            .iter()
            .filter_map(|key| self.lookup(&store, key))
            .collect();
        entries.sort_by_key(|e| (e.tile_y(), e.tile_x()));
        entries.iter().map(|e| Arc::clone(e.payload())).collect()
    }

    /// Remove every tile of `owner`, returning how many were removed
    pub fn remove_all(&self, owner: &OwnerRef) -> usize {
        let store = self.store();
        let removed = self
            .owner_keys(&store, owner)
            .iter()
            .filter(|key| self.remove_key(&store, key).is_some())
            .count();
        debug!(removed, "Removed all tiles of image");
        removed
    }

    /// Add tiles at parallel `coords`/`payloads` positions
    ///
    /// Not atomic: concurrent readers may observe a partial batch.
    pub fn add_all(
        &self,
        owner: &OwnerRef,
        coords: &[(i32, i32)],
        payloads: Vec<Option<Arc<P>>>,
        cost_hint: Option<u64>,
    ) -> Result<()> {
        if coords.len() != payloads.len() {
            return Err(Error::invalid(
                "payloads",
                format!(
                    "expected {} payloads to match coordinates, got {}",
                    coords.len(),
                    payloads.len()
                ),
            ));
        }
        for (&(x, y), payload) in coords.iter().zip(payloads) {
            self.add(owner, x, y, payload, cost_hint);
        }
        Ok(())
    }

    /// Look up tiles at `coords`, keeping `None` where a tile is absent
    pub fn get_all_at(&self, owner: &OwnerRef, coords: &[(i32, i32)]) -> Vec<Option<Arc<P>>> {
        coords
            .iter()
            .map(|&(x, y)| self.get(owner, x, y))
            .collect()
    }

    /// Drop every tile whose owner no longer exists
    pub fn purge_orphans(&self) -> usize {
        let store = self.store();
        let purged = store
            .entries()
            .iter()
            .filter(|entry| entry.is_orphaned() && store.invalidate_entry(entry))
            .count();
        if purged > 0 {
            debug!(purged, "Purged tiles of dropped images");
        }
        purged
    }

    // =========================================================================
    // Whole-cache operations
    // =========================================================================

    /// Remove every tile and reset eviction bookkeeping
    pub fn flush(&self) {
        let store = self.store();
        self.drain(&store, self.diagnostics_on());
    }

    fn drain(&self, store: &WeightedStore<P>, diagnostics: bool) {
        let drained = store.invalidate_all();
        if diagnostics {
            for entry in &drained {
                self.notify(entry, TileAction::RemovedFromFlush);
            }
        }
        self.metrics.record_flush();
        debug!(entries = drained.len(), "Flushed tile cache");
    }

    /// Apply `change` to a copy of the configuration and rebuild the store
    fn reconfigure<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut TileCacheConfig),
    {
        let _guard = self.rebuild_lock.lock();

        let mut next = self.config.read().clone();
        change(&mut next);
        if let Err(e) = next.validate() {
            warn!(error = %e, "Rejected tile cache reconfiguration");
            return Err(e);
        }

        let was_diagnostic = self.diagnostics_on();
        let fresh = Arc::new(WeightedStore::new(store_config(&next)));
        let old = {
            // Flag flips under the store write lock: whoever reaches the fresh
            // store also sees its diagnostics setting
            let mut store = self.store.write();
            self.diagnostics.store(next.diagnostics, Ordering::Release);
            std::mem::replace(&mut *store, fresh)
        };

        info!(
            capacity = next.capacity,
            threshold = next.threshold,
            concurrency_level = next.concurrency_level,
            eviction_watermark = next.eviction_watermark,
            strategy = ?next.strategy,
            diagnostics = next.diagnostics,
            "Rebuilt tile cache"
        );
        *self.config.write() = next;

        self.drain(&old, was_diagnostic);
        Ok(())
    }

    /// Set the capacity in bytes; negative values are rejected
    pub fn set_capacity(&self, capacity: i64) -> Result<()> {
        let capacity = validate_capacity(capacity).inspect_err(|e| {
            warn!(error = %e, "Rejected capacity change");
        })?;
        self.reconfigure(|c| c.capacity = capacity)
    }

    /// Set the fraction of capacity the cache is kept under
    pub fn set_threshold(&self, threshold: f64) -> Result<()> {
        validate_threshold(threshold).inspect_err(|e| {
            warn!(error = %e, "Rejected threshold change");
        })?;
        self.reconfigure(|c| c.threshold = threshold)
    }

    /// Set the number of store shards
    pub fn set_concurrency_level(&self, level: usize) -> Result<()> {
        validate_concurrency_level(level).inspect_err(|e| {
            warn!(error = %e, "Rejected concurrency level change");
        })?;
        self.reconfigure(|c| c.concurrency_level = level)
    }

    /// Set the fraction of the budget an eviction pass drains down to
    pub fn set_eviction_watermark(&self, watermark: f64) -> Result<()> {
        validate_watermark(watermark).inspect_err(|e| {
            warn!(error = %e, "Rejected eviction watermark change");
        })?;
        self.reconfigure(|c| c.eviction_watermark = watermark)
    }

    /// Switch between grouped and scanning bulk operations
    pub fn set_index_strategy(&self, strategy: IndexStrategy) -> Result<()> {
        self.reconfigure(|c| c.strategy = strategy)
    }

    /// Replace the eviction policy
    pub fn set_eviction_policy(&self, policy: EvictionPolicy) -> Result<()> {
        validate_policy(&policy)?;
        self.reconfigure(|c| c.eviction_policy = policy)
    }

    /// Turn on observer notifications and hit/miss counting
    pub fn enable_diagnostics(&self) -> Result<()> {
        self.reconfigure(|c| c.diagnostics = true)
    }

    /// Turn off observer notifications and hit/miss counting
    pub fn disable_diagnostics(&self) -> Result<()> {
        self.reconfigure(|c| c.diagnostics = false)
    }

    /// Tile-count limits are not supported; the cache is bounded by weight
    pub fn set_tile_capacity(&self, _tiles: usize) -> Result<()> {
        warn!("set_tile_capacity called on a weight-bounded tile cache");
        Err(Error::UnsupportedOperation(
            "set_tile_capacity: the cache is bounded by weight, not tile count".to_string(),
        ))
    }

    /// External eviction comparators are not supported; use an
    /// [`EvictionPolicy`] instead
    pub fn set_tile_comparator<F>(&self, _comparator: F) -> Result<()>
    where
        F: Fn(&CacheEntry<P>, &CacheEntry<P>) -> std::cmp::Ordering,
    {
        warn!("set_tile_comparator called on a tile cache");
        Err(Error::UnsupportedOperation(
            "set_tile_comparator: eviction order is set by EvictionPolicy".to_string(),
        ))
    }

    // =========================================================================
    // Observers
    // =========================================================================

    /// Register a diagnostics observer
    pub fn subscribe(&self, observer: Arc<dyn TileCacheObserver>) -> ObserverId {
        self.observers.subscribe(observer)
    }

    /// Remove a diagnostics observer
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Lookup hits; zero unless diagnostics are enabled
    pub fn hit_count(&self) -> u64 {
        if self.diagnostics_on() {
            self.metrics.hits()
        } else {
            0
        }
    }

    /// Lookup misses; zero unless diagnostics are enabled
    pub fn miss_count(&self) -> u64 {
        if self.diagnostics_on() {
            self.metrics.misses()
        } else {
            0
        }
    }

    /// Number of cached tiles
    pub fn tile_count(&self) -> usize {
        self.store().len()
    }

    /// Total weight of cached tiles in bytes
    pub fn memory_used(&self) -> u64 {
        self.store().total_weight()
    }

    pub fn capacity(&self) -> u64 {
        self.config.read().capacity
    }

    pub fn threshold(&self) -> f64 {
        self.config.read().threshold
    }

    pub fn concurrency_level(&self) -> usize {
        self.config.read().concurrency_level
    }

    pub fn index_strategy(&self) -> IndexStrategy {
        self.config.read().strategy
    }

    pub fn is_diagnostics_enabled(&self) -> bool {
        self.diagnostics_on()
    }

    /// Current configuration
    pub fn config(&self) -> TileCacheConfig {
        self.config.read().clone()
    }

    /// Reset all counters
    pub fn reset_statistics(&self) {
        self.metrics.reset();
    }

    /// Get cache statistics
    pub fn stats(&self) -> TileCacheStats {
        let store = self.store();
        let config = self.config();
        let mut metrics = self.metrics.snapshot();
        if !config.diagnostics {
            metrics.hits = 0;
            metrics.misses = 0;
            metrics.hit_ratio = 0.0;
        }

        TileCacheStats {
            tile_count: store.len(),
            memory_used: store.total_weight(),
            capacity: config.capacity,
            threshold: config.threshold,
            budget: store.budget(),
            low_watermark: store.low_watermark(),
            eviction_passes: store.eviction_passes(),
            concurrency_level: config.concurrency_level,
            diagnostics: config.diagnostics,
            strategy: config.strategy,
            images_indexed: store.index().map(|index| index.group_count()),
            metrics,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::diagnostics::InMemoryObserver;
    use crate::cache::weigher::FnWeigher;
    use crate::raster::{RasterImage, SampleType};
    use assert_matches::assert_matches;

    fn owner() -> OwnerRef {
        Arc::new(RasterImage::new(1024, 1024, 256, 256))
    }

    fn tile(value: u8) -> Option<Arc<Raster>> {
        Some(Arc::new(Raster::new(
            bytes::Bytes::from(vec![value; 16]),
            SampleType::U8,
            4,
            4,
            1,
        )))
    }

    fn fixed_weight_cache(capacity: u64, weight: u64, strategy: IndexStrategy) -> TileCache {
        let config = TileCacheConfig {
            capacity,
            threshold: 1.0,
            strategy,
            ..Default::default()
        };
        TileCache::with_weigher(config, FnWeigher(move |_: &Raster| weight)).unwrap()
    }

    #[test]
    fn test_default_cache() {
        let cache = TileCache::<Raster>::default();
        assert_eq!(cache.capacity(), 16 * 1024 * 1024);
        assert_eq!(cache.threshold(), 0.75);
        assert_eq!(cache.concurrency_level(), 4);
        assert!(!cache.is_diagnostics_enabled());
        assert_eq!(cache.tile_count(), 0);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = TileCacheConfig {
            concurrency_level: 0,
            ..Default::default()
        };
        assert_matches!(
            TileCache::<Raster>::new(config),
            Err(Error::InvalidArgument { .. })
        );
    }

    #[test]
    fn test_add_get_remove() {
        let cache = TileCache::<Raster>::default();
        let owner = owner();

        cache.add(&owner, 0, 0, tile(7), None);
        let found = cache.get(&owner, 0, 0).unwrap();
        assert_eq!(found.data()[0], 7);

        assert!(cache.remove(&owner, 0, 0).is_some());
        assert!(cache.get(&owner, 0, 0).is_none());
        assert!(cache.remove(&owner, 0, 0).is_none());
    }

    #[test]
    fn test_absent_payload_is_noop() {
        let cache = TileCache::<Raster>::default();
        let owner = owner();
        cache.add(&owner, 0, 0, None, Some(5));
        assert_eq!(cache.tile_count(), 0);
    }

    #[test]
    fn test_weight_uses_weigher() {
        let cache = TileCache::<Raster>::default();
        let owner = owner();
        cache.add(&owner, 0, 0, tile(1), None);
        assert_eq!(
            cache.memory_used(),
            16 + crate::cache::ENTRY_OVERHEAD_BYTES
        );
    }

    #[test]
    fn test_substitution_keeps_one_entry() {
        let cache = TileCache::<Raster>::default();
        let owner = owner();
        cache.add(&owner, 0, 0, tile(1), None);
        cache.add(&owner, 0, 0, tile(2), None);
        assert_eq!(cache.tile_count(), 1);
        assert_eq!(cache.get(&owner, 0, 0).unwrap().data()[0], 2);
    }

    #[test]
    fn test_get_all_both_strategies() {
        for strategy in [IndexStrategy::Grouped, IndexStrategy::Scan] {
            let cache = fixed_weight_cache(1 << 20, 10, strategy);
            let owner = owner();
            cache.add(&owner, 2, 1, tile(3), None);
            cache.add(&owner, 0, 0, tile(1), None);
            cache.add(&owner, 1, 0, tile(2), None);

            let values: Vec<u8> = cache.get_all(&owner).iter().map(|t| t.data()[0]).collect();
            assert_eq!(values, vec![1, 2, 3], "strategy {:?}", strategy);

            assert_eq!(cache.remove_all(&owner), 3);
            assert!(cache.get_all(&owner).is_empty());
            assert_eq!(cache.remove_all(&owner), 0);
        }
    }

    #[test]
    fn test_batch_operations() {
        let cache = TileCache::<Raster>::default();
        let owner = owner();
        let coords = [(0, 0), (1, 0), (2, 0)];

        cache
            .add_all(&owner, &coords, vec![tile(1), None, tile(3)], None)
            .unwrap();

        let found = cache.get_all_at(&owner, &coords);
        assert_eq!(found.len(), 3);
        assert!(found[0].is_some());
        assert!(found[1].is_none());
        assert!(found[2].is_some());

        assert_matches!(
            cache.add_all(&owner, &coords, vec![tile(1)], None),
            Err(Error::InvalidArgument { .. })
        );
    }

    #[test]
    fn test_dropped_owner_degenerates_to_absent() {
        let cache = TileCache::<Raster>::default();
        let image = RasterImage::new(512, 512, 256, 256);
        let first: OwnerRef = Arc::new(image.clone());
        cache.add(&first, 0, 0, tile(1), None);
        drop(first);

        // Same identity, different allocation: the old tile is unreachable
        let second: OwnerRef = Arc::new(image);
        assert!(!cache.contains(&second, 0, 0));
        assert!(cache.get(&second, 0, 0).is_none());
        assert_eq!(cache.tile_count(), 0);
    }

    #[test]
    fn test_purge_orphans() {
        let cache = TileCache::<Raster>::default();
        let kept = owner();
        let dropped = owner();
        cache.add(&kept, 0, 0, tile(1), None);
        cache.add(&dropped, 0, 0, tile(1), None);
        cache.add(&dropped, 1, 0, tile(1), None);
        drop(dropped);

        assert_eq!(cache.purge_orphans(), 2);
        assert_eq!(cache.tile_count(), 1);
        assert_eq!(cache.stats().images_indexed, Some(1));
    }

    #[test]
    fn test_flush() {
        let cache = TileCache::<Raster>::default();
        let owner = owner();
        for x in 0..4 {
            cache.add(&owner, x, 0, tile(1), None);
        }
        cache.flush();
        assert_eq!(cache.tile_count(), 0);
        assert_eq!(cache.memory_used(), 0);
        assert!(cache.get_all(&owner).is_empty());
    }

    #[test]
    fn test_setters_validate_and_rebuild() {
        let cache = TileCache::<Raster>::default();
        let owner = owner();
        cache.add(&owner, 0, 0, tile(1), None);

        assert_matches!(cache.set_capacity(-1), Err(Error::InvalidArgument { .. }));
        assert_matches!(cache.set_threshold(1.5), Err(Error::InvalidArgument { .. }));
        assert_matches!(
            cache.set_concurrency_level(0),
            Err(Error::InvalidArgument { .. })
        );
        assert!(cache.get(&owner, 0, 0).is_some());

        cache.set_capacity(4096).unwrap();
        assert_eq!(cache.capacity(), 4096);
        assert_eq!(cache.tile_count(), 0);

        cache.set_threshold(0.5).unwrap();
        cache.set_concurrency_level(8).unwrap();
        assert_eq!(cache.stats().budget, 2048);
        assert_eq!(cache.concurrency_level(), 8);

        cache.set_index_strategy(IndexStrategy::Scan).unwrap();
        assert_eq!(cache.index_strategy(), IndexStrategy::Scan);
        assert_eq!(cache.stats().images_indexed, None);

        cache.set_eviction_policy(EvictionPolicy::lfu()).unwrap();
        assert_eq!(cache.config().eviction_policy, EvictionPolicy::lfu());
    }

    #[test]
    fn test_unsupported_operations() {
        let cache = TileCache::<Raster>::default();
        assert_matches!(
            cache.set_tile_capacity(100),
            Err(Error::UnsupportedOperation(_))
        );
        assert_matches!(
            cache.set_tile_comparator(|a: &CacheEntry<Raster>, b: &CacheEntry<Raster>| {
                a.weight().cmp(&b.weight())
            }),
            Err(Error::UnsupportedOperation(_))
        );
    }

    #[test]
    fn test_statistics_zero_without_diagnostics() {
        let cache = TileCache::<Raster>::default();
        let owner = owner();
        cache.add(&owner, 0, 0, tile(1), None);
        cache.get(&owner, 0, 0);
        cache.get(&owner, 5, 5);
        assert_eq!(cache.hit_count(), 0);
        assert_eq!(cache.miss_count(), 0);
    }

    #[test]
    fn test_diagnostics_notifications() {
        let cache = TileCache::<Raster>::default();
        cache.enable_diagnostics().unwrap();
        let observer = Arc::new(InMemoryObserver::new());
        cache.subscribe(observer.clone());
        let owner = owner();

        cache.add(&owner, 0, 0, tile(1), Some(9));
        cache.add(&owner, 0, 0, tile(2), None);
        cache.get(&owner, 0, 0);
        cache.get(&owner, 1, 1);
        cache.remove(&owner, 0, 0);

        assert_eq!(
            observer.actions(),
            vec![
                TileAction::Added,
                TileAction::Substituted,
                TileAction::Touched,
                TileAction::AboutToBeRemoved,
                TileAction::ManuallyRemoved,
            ]
        );
        assert_eq!(observer.notifications()[0].cost_hint, Some(9));
        assert_eq!(cache.hit_count(), 1);
        assert_eq!(cache.miss_count(), 1);
    }

    #[test]
    fn test_flush_notifications() {
        let cache = TileCache::<Raster>::default();
        cache.enable_diagnostics().unwrap();
        let observer = Arc::new(InMemoryObserver::new());
        cache.subscribe(observer.clone());
        let owner = owner();

        for x in 0..3 {
            cache.add(&owner, x, 0, tile(1), None);
        }
        observer.clear();
        cache.flush();

        assert_eq!(observer.count(TileAction::RemovedFromFlush), 3);
        assert_eq!(observer.len(), 3);
    }

    #[test]
    fn test_eviction_notifications() {
        let cache = fixed_weight_cache(1024, 400, IndexStrategy::Grouped);
        cache.enable_diagnostics().unwrap();
        let observer = Arc::new(InMemoryObserver::new());
        cache.subscribe(observer.clone());
        let owner = owner();

        for x in 0..3 {
            cache.add(&owner, x, 0, tile(1), None);
        }

        assert_eq!(observer.count(TileAction::EvictedForSize), 1);
        assert_eq!(cache.stats().metrics.evictions, 1);
        assert!(cache.memory_used() <= 1024);
    }

    #[test]
    fn test_disabling_diagnostics_stops_notifications() {
        let cache = TileCache::<Raster>::default();
        cache.enable_diagnostics().unwrap();
        let observer = Arc::new(InMemoryObserver::new());
        let id = cache.subscribe(observer.clone());
        cache.disable_diagnostics().unwrap();

        let owner = owner();
        cache.add(&owner, 0, 0, tile(1), None);
        assert!(observer.is_empty());
        assert!(cache.unsubscribe(id));
    }

    #[test]
    fn test_huge_concurrency_level_rejected() {
        let cache = TileCache::<Raster>::default();
        let owner = owner();
        cache.add(&owner, 0, 0, tile(1), None);

        for level in [usize::MAX, usize::MAX / 2, crate::cache::MAX_CONCURRENCY_LEVEL + 1] {
            assert_matches!(
                cache.set_concurrency_level(level),
                Err(Error::InvalidArgument {
                    name: "concurrency_level",
                    ..
                })
            );
        }

        // Rejected changes leave the live store untouched
        assert_eq!(cache.concurrency_level(), 4);
        assert!(cache.get(&owner, 0, 0).is_some());
        cache.add(&owner, 1, 0, tile(2), None);
        assert_eq!(cache.get(&owner, 1, 0).unwrap().data()[0], 2);
    }

    #[test]
    fn test_out_of_grid_coordinates_are_absent() {
        // 4 x 4 grid: (4, 0) would share a linear index with (0, 1)
        let cache = TileCache::<Raster>::default();
        let owner = owner();

        cache.add(&owner, 4, 0, tile(9), None);
        cache.add(&owner, -1, 2, tile(9), None);
        assert_eq!(cache.tile_count(), 0);
        assert!(cache.get(&owner, 0, 1).is_none());
        assert!(cache.get(&owner, 4, 0).is_none());

        cache.add(&owner, 0, 1, tile(1), None);
        assert!(cache.get(&owner, 4, 0).is_none());
        assert!(!cache.contains(&owner, 4, 0));
        assert!(cache.remove(&owner, 4, 0).is_none());
        assert_eq!(cache.get(&owner, 0, 1).unwrap().data()[0], 1);
    }

    #[test]
    fn test_eviction_watermark_setter() {
        let cache = fixed_weight_cache(1000, 100, IndexStrategy::Grouped);
        assert_matches!(
            cache.set_eviction_watermark(1.5),
            Err(Error::InvalidArgument { .. })
        );
        cache.set_eviction_watermark(0.5).unwrap();
        assert_eq!(cache.config().eviction_watermark, 0.5);

        let owner = owner();
        for x in 0..4 {
            for y in 0..3 {
                cache.add(&owner, x, y, tile(1), None);
            }
        }

        // 11th tile overflows 1000 and drains to 500; 12th fits again
        let stats = cache.stats();
        assert_eq!(stats.low_watermark, 500);
        assert_eq!(stats.eviction_passes, 1);
        assert_eq!(stats.memory_used, 600);
        assert_eq!(stats.metrics.evictions, 6);
    }

    #[test]
    fn test_diagnostics_toggle_under_load() {
        use std::thread;

        let cache = Arc::new(TileCache::<Raster>::default());
        let owner = owner();

        let writers: Vec<_> = (0..4)
            .map(|y| {
                let cache = Arc::clone(&cache);
                let owner = Arc::clone(&owner);
                thread::spawn(move || {
                    for round in 0..50 {
                        cache.add(&owner, round % 4, y, tile(1), None);
                        cache.get(&owner, round % 4, y);
                    }
                })
            })
            .collect();
        for round in 0..20 {
            if round % 2 == 0 {
                cache.enable_diagnostics().unwrap();
            } else {
                cache.disable_diagnostics().unwrap();
            }
        }
        for writer in writers {
            writer.join().unwrap();
        }

        // The flag and the store always agree once a rebuild returns
        cache.enable_diagnostics().unwrap();
        let observer = Arc::new(InMemoryObserver::new());
        cache.subscribe(observer.clone());
        cache.add(&owner, 0, 0, tile(1), None);
        assert!(cache.is_diagnostics_enabled());
        assert_eq!(observer.actions(), vec![TileAction::Added]);

        cache.disable_diagnostics().unwrap();
        observer.clear();
        cache.add(&owner, 1, 0, tile(1), None);
        assert!(observer.is_empty());
    }
}
