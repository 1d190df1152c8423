//! Cache Entry Types
//!
//! One cached tile: payload, non-owning owner reference, coordinate, derived
//! keys and weight. Everything except the access bookkeeping and the
//! diagnostic action tag is fixed at construction.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use super::key::{ImageKey, TileKey};
use crate::raster::TileOwner;

/// Shared handle to a tile owner
pub type OwnerRef = Arc<dyn TileOwner>;

/// State change reported to diagnostics observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum TileAction {
    /// Stored under a previously unused key
    Added = 0,
    /// Replaced an entry stored under the same key
    Substituted = 1,
    /// Removed by an explicit `remove`/`remove_all`
    ManuallyRemoved = 2,
    /// Evicted to bring the cache back under its weight budget
    EvictedForSize = 3,
    /// About to be removed by an explicit request
    AboutToBeRemoved = 4,
    /// Returned by a successful lookup
    Touched = 5,
    /// Discarded by a whole-cache flush
    RemovedFromFlush = 6,
}

impl TileAction {
    /// All actions, in tag order
    pub const ALL: [TileAction; 7] = [
        TileAction::Added,
        TileAction::Substituted,
        TileAction::ManuallyRemoved,
        TileAction::EvictedForSize,
        TileAction::AboutToBeRemoved,
        TileAction::Touched,
        TileAction::RemovedFromFlush,
    ];

    fn from_tag(tag: u8) -> Self {
        Self::ALL
            .get(tag as usize)
            .copied()
            .unwrap_or(TileAction::Added)
    }

    /// Stable lowercase label, used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            TileAction::Added => "added",
            TileAction::Substituted => "substituted",
            TileAction::ManuallyRemoved => "manually_removed",
            TileAction::EvictedForSize => "evicted_for_size",
            TileAction::AboutToBeRemoved => "about_to_be_removed",
            TileAction::Touched => "touched",
            TileAction::RemovedFromFlush => "removed_from_flush",
        }
    }
}

impl fmt::Display for TileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// One cached tile
pub struct CacheEntry<P> {
    payload: Arc<P>,
    owner: Weak<dyn TileOwner>,
    tile_x: i32,
    tile_y: i32,
    key: TileKey,
    image_key: ImageKey,
    /// Byte cost against the capacity budget
    weight: u64,
    cost_hint: Option<u64>,
    /// Wall-clock last access (epoch millis)
    last_access: AtomicI64,
    /// Store recency tick, drives eviction order
    recency: AtomicU64,
    access_count: AtomicU32,
    last_action: AtomicU8,
}

impl<P> CacheEntry<P> {
    /// Create an entry for tile `(tile_x, tile_y)` of `owner`
    pub fn new(
        owner: &OwnerRef,
        tile_x: i32,
        tile_y: i32,
        payload: Arc<P>,
        weight: u64,
        cost_hint: Option<u64>,
    ) -> Self {
        Self {
            key: TileKey::derive(owner.as_ref(), tile_x, tile_y),
            image_key: ImageKey::derive(owner.as_ref()),
            owner: Arc::downgrade(owner),
            payload,
            tile_x,
            tile_y,
            weight,
            cost_hint,
            last_access: AtomicI64::new(now_millis()),
            recency: AtomicU64::new(0),
            access_count: AtomicU32::new(0),
            last_action: AtomicU8::new(TileAction::Added as u8),
        }
    }

    #[inline]
    pub fn payload(&self) -> &Arc<P> {
        &self.payload
    }

    /// Owner, if it is still alive
    pub fn owner(&self) -> Option<OwnerRef> {
        self.owner.upgrade()
    }

    /// Check whether the owner has been dropped
    #[inline]
    pub fn is_orphaned(&self) -> bool {
        self.owner.strong_count() == 0
    }

    #[inline]
    pub fn key(&self) -> &TileKey {
        &self.key
    }

    #[inline]
    pub fn image_key(&self) -> &ImageKey {
        &self.image_key
    }

    #[inline]
    pub fn tile_x(&self) -> i32 {
        self.tile_x
    }

    #[inline]
    pub fn tile_y(&self) -> i32 {
        self.tile_y
    }

    #[inline]
    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn cost_hint(&self) -> Option<u64> {
        self.cost_hint
    }

    /// Last access time
    pub fn last_access(&self) -> DateTime<Utc> {
        let millis = self.last_access.load(Ordering::Relaxed);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Refresh the last access time
    pub fn touch(&self) {
        self.last_access.store(now_millis(), Ordering::Relaxed);
    }

    pub fn last_action(&self) -> TileAction {
        TileAction::from_tag(self.last_action.load(Ordering::Relaxed))
    }

    pub fn set_last_action(&self, action: TileAction) {
        self.last_action.store(action as u8, Ordering::Relaxed);
    }

    /// Record a store access at logical time `tick`
    #[inline]
    pub(crate) fn record_access(&self, tick: u64) {
        self.recency.store(tick, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Logical time of the last store access
    #[inline]
    pub fn recency(&self) -> u64 {
        self.recency.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn access_count(&self) -> u32 {
        self.access_count.load(Ordering::Relaxed)
    }
}

impl<P> fmt::Debug for CacheEntry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("tile", &(self.tile_x, self.tile_y))
            .field("weight", &self.weight)
            .field("access_count", &self.access_count())
            .field("last_action", &self.last_action())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::RasterImage;

    fn owner() -> OwnerRef {
        Arc::new(RasterImage::new(512, 512, 256, 256))
    }

    #[test]
    fn test_entry_derives_keys() {
        let owner = owner();
        let entry = CacheEntry::new(&owner, 1, 0, Arc::new(7u8), 100, None);
        assert_eq!(entry.key(), &TileKey::derive(owner.as_ref(), 1, 0));
        assert_eq!(entry.image_key(), &ImageKey::derive(owner.as_ref()));
        assert_eq!(entry.weight(), 100);
        assert_eq!(entry.last_action(), TileAction::Added);
    }

    #[test]
    fn test_entry_does_not_keep_owner_alive() {
        let owner = owner();
        let entry = CacheEntry::new(&owner, 0, 0, Arc::new(()), 1, None);
        assert!(entry.owner().is_some());
        drop(owner);
        assert!(entry.is_orphaned());
        assert!(entry.owner().is_none());
    }

    #[test]
    fn test_last_action_round_trip() {
        let owner = owner();
        let entry = CacheEntry::new(&owner, 0, 0, Arc::new(()), 1, Some(42));
        for action in TileAction::ALL {
            entry.set_last_action(action);
            assert_eq!(entry.last_action(), action);
        }
        assert_eq!(entry.cost_hint(), Some(42));
    }

    #[test]
    fn test_access_tracking() {
        let owner = owner();
        let entry = CacheEntry::new(&owner, 0, 0, Arc::new(()), 1, None);
        entry.record_access(5);
        entry.record_access(9);
        assert_eq!(entry.recency(), 9);
        assert_eq!(entry.access_count(), 2);
    }

    #[test]
    fn test_touch_moves_forward() {
        let owner = owner();
        let entry = CacheEntry::new(&owner, 0, 0, Arc::new(()), 1, None);
        let before = entry.last_access();
        std::thread::sleep(std::time::Duration::from_millis(5));
        entry.touch();
        assert!(entry.last_access() > before);
    }

    #[test]
    fn test_action_labels() {
        assert_eq!(TileAction::EvictedForSize.to_string(), "evicted_for_size");
        assert_eq!(TileAction::RemovedFromFlush.as_str(), "removed_from_flush");
    }
}
