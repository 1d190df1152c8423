//! Cache Diagnostics
//!
//! Opt-in observer channel reporting every state change of the cache.
//! Notifications are delivered synchronously on the thread performing the
//! operation, to a snapshot of the observers registered at that moment, so
//! subscribing never blocks dispatch. Observers must return quickly.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam::channel::{Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use super::entry::{CacheEntry, TileAction};
use super::key::{ImageKey, TileKey};

/// One reported state change
#[derive(Debug, Clone, Serialize)]
pub struct TileNotification {
    pub image_key: ImageKey,
    pub tile_key: TileKey,
    pub tile_x: i32,
    pub tile_y: i32,
    pub weight: u64,
    pub cost_hint: Option<u64>,
    pub action: TileAction,
    pub timestamp: DateTime<Utc>,
}

impl TileNotification {
    /// Build a notification for `entry`, tagging it with `action`
    pub fn from_entry<P>(entry: &CacheEntry<P>, action: TileAction) -> Self {
        entry.set_last_action(action);
        Self {
            image_key: entry.image_key().clone(),
            tile_key: entry.key().clone(),
            tile_x: entry.tile_x(),
            tile_y: entry.tile_y(),
            weight: entry.weight(),
            cost_hint: entry.cost_hint(),
            action,
            timestamp: Utc::now(),
        }
    }
}

/// Receiver of cache notifications
pub trait TileCacheObserver: Send + Sync {
    fn on_notification(&self, notification: &TileNotification);
}

/// Handle returned by [`ObserverRegistry::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Set of registered observers
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Arc<Vec<(ObserverId, Arc<dyn TileCacheObserver>)>>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer
    pub fn subscribe(&self, observer: Arc<dyn TileCacheObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.observers.write();
        let mut next = Vec::clone(&guard);
        next.push((id, observer));
        *guard = Arc::new(next);
        id
    }

    /// Remove an observer; returns false if it was not registered
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut guard = self.observers.write();
        if !guard.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next = guard
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *guard = Arc::new(next);
        true
    }

    /// Observers registered right now
    pub fn snapshot(&self) -> Arc<Vec<(ObserverId, Arc<dyn TileCacheObserver>)>> {
        Arc::clone(&self.observers.read())
    }

    /// Deliver `notification` to every observer in the current snapshot
    pub fn publish(&self, notification: &TileNotification) {
        let observers = self.snapshot();
        for (_, observer) in observers.iter() {
            observer.on_notification(notification);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observer_count", &self.len())
            .finish()
    }
}

// =============================================================================
// Observers
// =============================================================================

/// Logging-based observer.
///
/// Renders each notification as a structured tracing event.
#[derive(Debug, Clone, Default)]
pub struct LoggingObserver {
    /// Whether to log at info level (true) or debug level (false)
    info_level: bool,
}

impl LoggingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an observer that logs at info level.
    pub fn info_level() -> Self {
        Self { info_level: true }
    }
}

impl TileCacheObserver for LoggingObserver {
    fn on_notification(&self, notification: &TileNotification) {
        let json = serde_json::to_string(notification)
            .unwrap_or_else(|_| format!("{:?}", notification));

        if self.info_level {
            info!(action = %notification.action, event = %json, "Tile cache event");
        } else {
            debug!(action = %notification.action, event = %json, "Tile cache event");
        }
    }
}

/// In-memory notification collector for testing.
#[derive(Debug, Default)]
pub struct InMemoryObserver {
    notifications: RwLock<Vec<TileNotification>>,
}

impl InMemoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected notifications.
    pub fn notifications(&self) -> Vec<TileNotification> {
        self.notifications.read().clone()
    }

    /// Actions in delivery order.
    pub fn actions(&self) -> Vec<TileAction> {
        self.notifications.read().iter().map(|n| n.action).collect()
    }

    /// Number of notifications carrying `action`.
    pub fn count(&self, action: TileAction) -> usize {
        self.notifications
            .read()
            .iter()
            .filter(|n| n.action == action)
            .count()
    }

    pub fn len(&self) -> usize {
        self.notifications.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.read().is_empty()
    }

    pub fn clear(&self) {
        self.notifications.write().clear();
    }
}

impl TileCacheObserver for InMemoryObserver {
    fn on_notification(&self, notification: &TileNotification) {
        self.notifications.write().push(notification.clone());
    }
}

/// Forwards notifications into a crossbeam channel.
///
/// Bounded channels drop notifications when full rather than blocking the
/// cache operation; dropped notifications are counted.
#[derive(Debug)]
pub struct ChannelObserver {
    sender: Sender<TileNotification>,
    dropped: AtomicU64,
}

impl ChannelObserver {
    /// Create an observer with an unbounded channel
    pub fn unbounded() -> (Self, Receiver<TileNotification>) {
        let (sender, receiver) = crossbeam::channel::unbounded();
        (Self::from_sender(sender), receiver)
    }

    /// Create an observer with a channel holding at most `capacity` items
    pub fn bounded(capacity: usize) -> (Self, Receiver<TileNotification>) {
        let (sender, receiver) = crossbeam::channel::bounded(capacity);
        (Self::from_sender(sender), receiver)
    }

    pub fn from_sender(sender: Sender<TileNotification>) -> Self {
        Self {
            sender,
            dropped: AtomicU64::new(0),
        }
    }

    /// Notifications lost to a full or disconnected channel
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TileCacheObserver for ChannelObserver {
    fn on_notification(&self, notification: &TileNotification) {
        match self.sender.try_send(notification.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
