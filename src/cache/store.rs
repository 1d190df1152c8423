//! Bounded Weighted Store
//!
//! Concurrent tile store with a soft byte budget of `capacity * threshold`.
//!
//! # Design
//!
//! - ShardedMap with one shard per concurrency level for lock striping
//! - Inserts always succeed; an insert that pushes the running weight over
//!   budget evicts synchronously down to the low watermark
//!   (`budget * watermark`), so a full store pays for one ranking pass per
//!   batch of inserts rather than per insert
//! - An entry heavier than the whole budget is never stored; it is reported
//!   as evicted straight away
//! - Eviction ranks entries with the configured [`EvictionPolicy`] over a
//!   logical access clock, and is serialized by a dedicated lock so that
//!   concurrent inserts never evict the same bytes twice
//! - The optional [`GroupIndex`] is updated from inside the shard write lock,
//!   so for every key the index changes in the same order as the store

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::entry::CacheEntry;
use super::group::GroupIndex;
use super::key::{ImageKey, TileKey};
use super::policy::EvictionPolicy;
use super::shard::ShardedMap;

/// Shared handle to a stored entry
pub type EntryRef<P> = Arc<CacheEntry<P>>;

/// Parameters a store is built with; changing any of them means a rebuild
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum capacity in bytes
    pub capacity: u64,
    /// Fraction of capacity the store is kept under
    pub threshold: f64,
    /// Number of independently locked shards
    pub concurrency_level: usize,
    /// Fraction of the budget an eviction pass drains down to
    pub watermark: f64,
    /// Eviction ranking
    pub policy: EvictionPolicy,
    /// Maintain a group index for per-image bulk operations
    pub indexed: bool,
}

/// Result of a [`WeightedStore::put`]
#[derive(Debug)]
pub struct PutOutcome<P> {
    /// Entry previously stored under the same key
    pub previous: Option<EntryRef<P>>,
    /// Entries evicted to restore the budget (may include the new entry)
    pub evicted: Vec<EntryRef<P>>,
}

/// Concurrent size-bounded tile store
pub struct WeightedStore<P> {
    /// Sharded storage
    storage: ShardedMap<TileKey, EntryRef<P>>,
    /// Owner -> keys index, when enabled
    index: Option<GroupIndex>,
    /// Configuration
    config: StoreConfig,
    /// Weight budget (`capacity * threshold`)
    budget: u64,
    /// Eviction stops once the running weight is at or below this
    low_watermark: u64,
    /// Running weight of all stored entries
    total_weight: AtomicU64,
    /// Logical access clock for recency ranking
    clock: AtomicU64,
    /// Serializes eviction passes
    eviction_lock: Mutex<()>,
    /// Completed eviction passes
    eviction_passes: AtomicU64,
}

impl<P> WeightedStore<P> {
    /// Create an empty store
    pub fn new(config: StoreConfig) -> Self {
        let budget = (config.capacity as f64 * config.threshold).floor() as u64;
        let low_watermark = (budget as f64 * config.watermark.clamp(0.0, 1.0)).floor() as u64;
        let index = config
            .indexed
            .then(|| GroupIndex::with_shards(config.concurrency_level.saturating_mul(4)));
        Self {
            storage: ShardedMap::new(config.concurrency_level),
            index,
            budget,
            low_watermark: low_watermark.min(budget),
            config,
            total_weight: AtomicU64::new(0),
            clock: AtomicU64::new(0),
            eviction_lock: Mutex::new(()),
            eviction_passes: AtomicU64::new(0),
        }
    }

    #[inline]
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn unregister(&self, entry: &CacheEntry<P>) {
        if let Some(index) = &self.index {
            index.unregister(entry.image_key(), entry.key());
        }
    }

    fn forget(&self, entry: &CacheEntry<P>) {
        self.total_weight
            .fetch_sub(entry.weight(), Ordering::AcqRel);
        self.unregister(entry);
    }

    /// Insert `entry`, replacing any entry under the same key, then evict
    /// down to the low watermark if the store went over budget
    pub fn put(&self, entry: EntryRef<P>) -> PutOutcome<P> {
        if entry.weight() > self.budget {
            trace!(
                key = %entry.key(),
                weight = entry.weight(),
                budget = self.budget,
                "Tile exceeds budget"
            );
            let previous = self.invalidate(entry.key());
            return PutOutcome {
                previous,
                evicted: vec![entry],
            };
        }

        entry.record_access(self.tick());
        let key = entry.key().clone();

        let mut total_after = 0;
        let previous = self.storage.insert(key, entry, |prev, new| {
            total_after = self
                .total_weight
                .fetch_add(new.weight(), Ordering::AcqRel)
                .saturating_add(new.weight());
            if let Some(prev) = prev {
                total_after = self
                    .total_weight
                    .fetch_sub(prev.weight(), Ordering::AcqRel)
                    .saturating_sub(prev.weight());
                if prev.image_key() != new.image_key() {
                    self.unregister(prev);
                }
            }
            if let Some(index) = &self.index {
                index.register(new.image_key(), new.key());
            }
        });

        let evicted = if total_after > self.budget {
            self.evict()
        } else {
            Vec::new()
        };

        PutOutcome { previous, evicted }
    }

    /// Look up `key`; never blocks other lookups and never evicts
    pub fn get_if_present(&self, key: &TileKey) -> Option<EntryRef<P>> {
        let entry = self.storage.get(key)?;
        entry.record_access(self.tick());
        Some(entry)
    }

    /// Look up `key` without counting an access
    pub fn peek(&self, key: &TileKey) -> Option<EntryRef<P>> {
        self.storage.get(key)
    }

    /// Check for `key` without counting an access
    pub fn contains(&self, key: &TileKey) -> bool {
        self.storage.contains_key(key)
    }

    /// Remove the entry at `key`, if any
    pub fn invalidate(&self, key: &TileKey) -> Option<EntryRef<P>> {
        self.storage.remove(key, |old| self.forget(old))
    }

    /// Remove `entry` only if it is still the one stored under its key
    pub fn invalidate_entry(&self, entry: &EntryRef<P>) -> bool {
        self.storage
            .remove_if(
                entry.key(),
                |current| Arc::ptr_eq(current, entry),
                |old| self.forget(old),
            )
            .is_some()
    }

    /// Remove every key in `keys`, returning the entries actually removed
    pub fn invalidate_keys(&self, keys: &[TileKey]) -> Vec<EntryRef<P>> {
        keys.iter().filter_map(|key| self.invalidate(key)).collect()
    }

    /// Empty the store and reset eviction bookkeeping
    pub fn invalidate_all(&self) -> Vec<EntryRef<P>> {
        let _guard = self.eviction_lock.lock();
        let drained: Vec<EntryRef<P>> = self
            .storage
            .drain(|_, entry| self.forget(entry))
            .into_iter()
            .map(|(_, entry)| entry)
            .collect();
        self.clock.store(0, Ordering::Relaxed);
        debug!(entries = drained.len(), "Store invalidated");
        drained
    }

    /// Evict until the running weight is at or below the low watermark
    fn evict(&self) -> Vec<EntryRef<P>> {
        let _guard = self.eviction_lock.lock();
        // Another pass may have already made room while we waited
        if self.total_weight() <= self.budget {
            return Vec::new();
        }
        self.eviction_passes.fetch_add(1, Ordering::Relaxed);

        // Rank every entry, highest score = most evictable
        let now = self.clock.load(Ordering::Relaxed);
        let mut candidates: Vec<(f64, EntryRef<P>)> = self
            .storage
            .entries()
            .into_iter()
            .map(|(_, entry)| {
                let age = now.saturating_sub(entry.recency());
                let score = self.config.policy.score(age, now, entry.access_count());
                (score, entry)
            })
            .collect();
        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut evicted = Vec::new();
        let mut freed = 0u64;
        for (_, entry) in candidates {
            if self.total_weight() <= self.low_watermark {
                break;
            }
            if self.invalidate_entry(&entry) {
                freed += entry.weight();
                trace!(key = %entry.key(), weight = entry.weight(), "Evicted tile");
                evicted.push(entry);
            }
        }

        debug!(
            evicted = evicted.len(),
            freed_bytes = freed,
            total_weight = self.total_weight(),
            low_watermark = self.low_watermark,
            "Eviction pass complete"
        );
        evicted
    }

    /// Keys currently registered for `image_key`; `None` if unindexed
    pub fn keys_for(&self, image_key: &ImageKey) -> Option<Vec<TileKey>> {
        self.index.as_ref().map(|index| index.keys_for(image_key))
    }

    /// Group index, when enabled
    pub fn index(&self) -> Option<&GroupIndex> {
        self.index.as_ref()
    }

    /// Snapshot of all stored entries
    pub fn entries(&self) -> Vec<EntryRef<P>> {
        self.storage
            .entries()
            .into_iter()
            .map(|(_, entry)| entry)
            .collect()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Running total weight of stored entries
    pub fn total_weight(&self) -> u64 {
        self.total_weight.load(Ordering::Acquire)
    }

    /// Weight budget the store is kept under
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Weight an eviction pass drains down to
    pub fn low_watermark(&self) -> u64 {
        self.low_watermark
    }

    /// Number of eviction passes run so far
    pub fn eviction_passes(&self) -> u64 {
        self.eviction_passes.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn shard_count(&self) -> usize {
        self.storage.shard_count()
    }
}

// =============================================================================
// Tests
// =============================================================================
