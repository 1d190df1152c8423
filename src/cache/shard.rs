//! Sharded Map Implementation
//!
//! Concurrent hashmap partitioned into a runtime-chosen number of shards
//! (the cache's concurrency level).
//!
//! # Design
//!
//! - Each shard has its own RwLock, minimizing contention
//! - Shards are cache-line padded to prevent false sharing
//! - Every mutation accepts a hook that runs while the shard's write lock is
//!   held, so side structures (the group index) change in the same order as
//!   the map itself for any given key

use crossbeam::utils::CachePadded;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Single shard containing a hashmap and its entry count
pub struct Shard<K, V> {
    /// The hashmap for this shard
    map: RwLock<HashMap<K, V>>,
    /// Number of entries
    count: AtomicUsize,
}

impl<K, V> Default for Shard<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Shard<K, V> {
    /// Create a new empty shard
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            count: AtomicUsize::new(0),
        }
    }

    /// Get the number of entries in this shard
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Check if the shard is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash, V> Shard<K, V> {
    /// Get a value from the shard
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let guard = self.map.read();
        guard.get(key).cloned()
    }

    /// Check if a key exists
    pub fn contains_key(&self, key: &K) -> bool {
        let guard = self.map.read();
        guard.contains_key(key)
    }

    /// Insert a value, returning the old value if present
    ///
    /// `on_insert` sees the replaced value (if any) and the new one.
    pub fn insert<F>(&self, key: K, value: V, on_insert: F) -> Option<V>
    where
        F: FnOnce(Option<&V>, &V),
    {
        let mut guard = self.map.write();
        on_insert(guard.get(&key), &value);
        let old = guard.insert(key, value);
        if old.is_none() {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        old
    }

    /// Remove the value at `key` if `predicate` accepts it
    pub fn remove_if<P, F>(&self, key: &K, predicate: P, on_remove: F) -> Option<V>
    where
        P: FnOnce(&V) -> bool,
        F: FnOnce(&V),
    {
        let mut guard = self.map.write();
        if !guard.get(key).is_some_and(predicate) {
            return None;
        }
        let removed = guard.remove(key)?;
        on_remove(&removed);
        self.count.fetch_sub(1, Ordering::Relaxed);
        Some(removed)
    }

    /// Remove every entry, handing each to `on_remove` under the lock
    pub fn drain<F>(&self, mut on_remove: F) -> Vec<(K, V)>
    where
        F: FnMut(&K, &V),
    {
        let mut guard = self.map.write();
        let drained: Vec<(K, V)> = guard.drain().collect();
        for (key, value) in &drained {
            on_remove(key, value);
        }
        self.count.store(0, Ordering::Relaxed);
        drained
    }

    /// Get all entries (for iteration)
    pub fn entries(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let guard = self.map.read();
        guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Sharded map with a runtime shard count
pub struct ShardedMap<K, V> {
    shards: Box<[CachePadded<Shard<K, V>>]>,
}

impl<K, V> ShardedMap<K, V> {
    /// Create a new sharded map with at least one shard
    pub fn new(shard_count: usize) -> Self {
        let shards: Vec<CachePadded<Shard<K, V>>> = (0..shard_count.max(1))
            .map(|_| CachePadded::new(Shard::new()))
            .collect();
        Self {
            shards: shards.into_boxed_slice(),
        }
    }

    /// Get the shard count
    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Get total number of entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    /// Check if the map is empty
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }
}

impl<K: Eq + Hash, V> ShardedMap<K, V> {
    /// Compute shard index from hash
    #[inline]
    fn shard_index(&self, key: &K) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn shard_for(&self, key: &K) -> &Shard<K, V> {
        &self.shards[self.shard_index(key)]
    }

    /// Get a value
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.shard_for(key).get(key)
    }

    /// Check if a key exists
    pub fn contains_key(&self, key: &K) -> bool {
        self.shard_for(key).contains_key(key)
    }

    /// Insert a value
    pub fn insert<F>(&self, key: K, value: V, on_insert: F) -> Option<V>
    where
        F: FnOnce(Option<&V>, &V),
    {
        let idx = self.shard_index(&key);
        self.shards[idx].insert(key, value, on_insert)
    }

    /// Remove a value
    pub fn remove<F>(&self, key: &K, on_remove: F) -> Option<V>
    where
        F: FnOnce(&V),
    {
        self.shard_for(key).remove_if(key, |_| true, on_remove)
    }

    /// Remove a value only if `predicate` accepts it
    pub fn remove_if<P, F>(&self, key: &K, predicate: P, on_remove: F) -> Option<V>
    where
        P: FnOnce(&V) -> bool,
        F: FnOnce(&V),
    {
        self.shard_for(key).remove_if(key, predicate, on_remove)
    }

    /// Drain all shards
    pub fn drain<F>(&self, mut on_remove: F) -> Vec<(K, V)>
    where
        F: FnMut(&K, &V),
    {
        let mut drained = Vec::new();
        for shard in self.shards.iter() {
            drained.extend(shard.drain(&mut on_remove));
        }
        drained
    }

    /// Snapshot of all entries
    pub fn entries(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.shards.iter().flat_map(|s| s.entries()).collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
