//! In-memory Cache Store for query results.
//!
//! Every key owns a slot holding a logical clock, the last known value and a
//! subscriber list. Writes to one key are serialized by the slot's lock;
//! writes to different keys never contend beyond the brief map lookup.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  CacheStore                                                     │
//! │  └── slots: HashMap<CacheKey, Mutex<Slot>>                      │
//! │      ├── clock        highest version handed out for the key    │
//! │      ├── entry        value, version, stale, pending patches    │
//! │      └── subscribers  one channel per subscription              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Versions come from the per-key clock, so they only increase. A write
//! carrying a version that is not strictly greater than the stored one is
//! discarded. Subscribers are notified while the slot lock is held, so every
//! subscriber observes updates in version order.
//!
//! No lock is held across an `.await`; the store is fully synchronous.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::types::{Announcement, AnnouncementId};

mod entry;
mod key;

use entry::CacheEntry;
pub use entry::{CacheSnapshot, CacheValue, Version};
pub use key::CacheKey;

/// Identifies one subscription on one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Which write produced an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Authoritative replacement or fold
    Put,
    /// Optimistic edit
    Patch,
    /// Reconciliation or rollback of an optimistic edit
    Settle,
    /// Staleness flag raised; version unchanged
    Invalidate,
}

/// Delivered to subscribers on every write to their key
#[derive(Debug, Clone, PartialEq)]
pub struct CacheUpdate {
    pub key: CacheKey,
    pub version: Version,
    pub kind: UpdateKind,
    pub stale: bool,
    pub optimistic: bool,
}

/// Result of [`CacheStore::put_or_merge`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Stored as fetched under the reserved version
    Applied(Version),
    /// Folded into a newer value and stored under a fresh version
    Merged(Version),
    /// Superseded, and folding it in changed nothing
    Discarded,
}

/// Result of an optimistic patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchReceipt {
    pub version: Version,
    /// The key was cold and the patch started from an empty collection
    pub tentative: bool,
}

/// Receiving half of a key subscription
///
/// Dropping it (or calling [`CacheStore::unsubscribe`]) stops delivery; it
/// never affects writes in flight.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    key: CacheKey,
    rx: mpsc::UnboundedReceiver<CacheUpdate>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Wait for the next update; `None` once the key is cleared or unsubscribed
    pub async fn recv(&mut self) -> Option<CacheUpdate> {
        self.rx.recv().await
    }

    /// Take an already delivered update without waiting
    pub fn try_recv(&mut self) -> Option<CacheUpdate> {
        self.rx.try_recv().ok()
    }
}

#[derive(Default)]
struct Slot {
    clock: Version,
    entry: Option<CacheEntry>,
    subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<CacheUpdate>)>,
}

impl Slot {
    fn tick(&mut self) -> Version {
        self.clock += 1;
        self.clock
    }

    fn notify(&mut self, key: &CacheKey, kind: UpdateKind) {
        let Some(entry) = &self.entry else {
            return;
        };
        let update = CacheUpdate {
            key: key.clone(),
            version: entry.version,
            kind,
            stale: entry.stale,
            optimistic: entry.pending > 0,
        };
        // Closed receivers are pruned here
        self.subscribers
            .retain(|(_, tx)| tx.send(update.clone()).is_ok());
    }
}

/// Keyed store of query results with versions, staleness and subscribers
#[derive(Default)]
pub struct CacheStore {
    slots: RwLock<HashMap<CacheKey, Arc<Mutex<Slot>>>>,
    next_subscription: AtomicU64,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &CacheKey) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.slots.read().get(key) {
            return slot.clone();
        }
        self.slots.write().entry(key.clone()).or_default().clone()
    }

    fn existing_slot(&self, key: &CacheKey) -> Option<Arc<Mutex<Slot>>> {
        self.slots.read().get(key).cloned()
    }

    /// Last known value for a key, even if stale
    pub fn get(&self, key: &CacheKey) -> Option<CacheSnapshot> {
        let slot = self.existing_slot(key)?;
        let slot = slot.lock();
        slot.entry.as_ref().map(CacheEntry::snapshot)
    }

    /// Current stored version, if the key holds a value
    pub fn version(&self, key: &CacheKey) -> Option<Version> {
        let slot = self.existing_slot(key)?;
        let slot = slot.lock();
        slot.entry.as_ref().map(|e| e.version)
    }

    /// Reserve the next version of a key's logical clock
    ///
    /// A fetcher reserves a version before its round trip and writes the
    /// result with [`put_versioned`](Self::put_versioned). If any other write
    /// lands in between, the late result is discarded.
    pub fn next_version(&self, key: &CacheKey) -> Version {
        self.slot(key).lock().tick()
    }

    /// Replace the value with a fresh version and clear staleness
    ///
    /// Returns `None`, without touching the clock, if the value does not fit
    /// the key.
    pub fn put(&self, key: &CacheKey, value: CacheValue) -> Option<Version> {
        if !key.accepts(&value) {
            warn!(%key, "Rejecting cache write with mismatched value shape");
            return None;
        }
        let slot = self.slot(key);
        let mut slot = slot.lock();
        let version = slot.tick();
        Self::apply_put(&mut slot, key, value, version);
        Some(version)
    }

    /// Replace the value only if `version` is newer than the stored one
    ///
    /// Returns false if the write was discarded.
    pub fn put_versioned(&self, key: &CacheKey, value: CacheValue, version: Version) -> bool {
        let slot = self.slot(key);
        let mut slot = slot.lock();
        if let Some(current) = slot.entry.as_ref().map(|e| e.version) {
            if version <= current {
                debug!(%key, version, current, "Discarding superseded cache write");
                return false;
            }
        }
        if version > slot.clock {
            slot.clock = version;
        }
        Self::apply_put(&mut slot, key, value, version)
    }

    /// Write a fetched value under a reserved version, or fold it into a newer one
    ///
    /// Behaves like [`put_versioned`](Self::put_versioned) while `version` is
    /// newer than the stored value. Otherwise `merge` folds the fetched value
    /// into the current one, and a fold that changed anything is stored under
    /// a fresh version. Staleness is left as it was: the fetched rows predate
    /// the write that superseded them.
    pub fn put_or_merge(
        &self,
        key: &CacheKey,
        value: CacheValue,
        version: Version,
        merge: impl FnOnce(&mut CacheValue, CacheValue) -> bool,
    ) -> MergeOutcome {
        if !key.accepts(&value) {
            warn!(%key, "Rejecting cache write with mismatched value shape");
            return MergeOutcome::Discarded;
        }
        let slot = self.slot(key);
        let mut slot = slot.lock();
        let current = match slot.entry.as_ref().map(|e| e.version) {
            Some(current) if version <= current => current,
            _ => {
                if version > slot.clock {
                    slot.clock = version;
                }
                Self::apply_put(&mut slot, key, value, version);
                return MergeOutcome::Applied(version);
            }
        };

        let fresh = slot.clock + 1;
        let Some(entry) = slot.entry.as_mut() else {
            return MergeOutcome::Discarded;
        };
        if !merge(&mut entry.value, value) {
            debug!(%key, version, current, "Discarding superseded cache write");
            return MergeOutcome::Discarded;
        }
        entry.version = fresh;
        slot.clock = fresh;
        debug!(%key, version = fresh, superseded = version, "Merged superseded cache write");
        slot.notify(key, UpdateKind::Put);
        MergeOutcome::Merged(fresh)
    }

    fn apply_put(slot: &mut Slot, key: &CacheKey, value: CacheValue, version: Version) -> bool {
        if !key.accepts(&value) {
            warn!(%key, "Rejecting cache write with mismatched value shape");
            return false;
        }
        let pending = slot.entry.as_ref().map(|e| e.pending).unwrap_or(0);
        slot.entry = Some(CacheEntry {
            value,
            version,
            stale: false,
            pending,
            tentative: false,
        });
        trace!(%key, version, "Cache put");
        slot.notify(key, UpdateKind::Put);
        true
    }

    /// Apply an optimistic edit to the current value
    ///
    /// A cold key starts from its empty collection and is marked tentative
    /// and stale, since it holds no platform data yet. The entry reports
    /// `optimistic` until a matching [`settle`](Self::settle).
    pub fn patch(&self, key: &CacheKey, mutate: impl FnOnce(&mut CacheValue)) -> PatchReceipt {
        let slot = self.slot(key);
        let mut slot = slot.lock();
        let version = slot.tick();
        let entry = slot.entry.get_or_insert_with(|| CacheEntry {
            value: key.empty_value(),
            version: 0,
            stale: true,
            pending: 0,
            tentative: true,
        });
        mutate(&mut entry.value);
        entry.version = version;
        entry.pending += 1;
        let tentative = entry.tentative;
        trace!(%key, version, tentative, "Cache patch");
        slot.notify(key, UpdateKind::Patch);
        PatchReceipt { version, tentative }
    }

    /// Confirm or roll back one optimistic edit
    ///
    /// Returns `None` if the key no longer exists (the store was cleared while
    /// the mutation was in flight).
    pub fn settle(&self, key: &CacheKey, mutate: impl FnOnce(&mut CacheValue)) -> Option<Version> {
        let slot = self.existing_slot(key)?;
        let mut slot = slot.lock();
        let version = slot.clock + 1;
        let entry = slot.entry.as_mut()?;
        mutate(&mut entry.value);
        entry.version = version;
        entry.pending = entry.pending.saturating_sub(1);
        slot.clock = version;
        trace!(%key, version, "Cache settle");
        slot.notify(key, UpdateKind::Settle);
        Some(version)
    }

    /// Authoritative read-modify-write
    ///
    /// `mutate` returns whether it changed anything; an unchanged value keeps
    /// its version and notifies nobody. A cold key starts from its empty
    /// collection and is marked stale, since it holds only partial data.
    pub fn put_with(
        &self,
        key: &CacheKey,
        mutate: impl FnOnce(&mut CacheValue) -> bool,
    ) -> Option<Version> {
        let slot = self.slot(key);
        let mut slot = slot.lock();
        let cold = slot.entry.is_none();
        let mut value = slot
            .entry
            .as_ref()
            .map(|e| e.value.clone())
            .unwrap_or_else(|| key.empty_value());
        if !mutate(&mut value) {
            return None;
        }
        let version = slot.tick();
        let entry = slot.entry.get_or_insert_with(|| CacheEntry {
            value: key.empty_value(),
            version: 0,
            stale: true,
            pending: 0,
            tentative: true,
        });
        entry.value = value;
        entry.version = version;
        trace!(%key, version, cold, "Cache put_with");
        slot.notify(key, UpdateKind::Put);
        Some(version)
    }

    /// Mark a key stale without discarding its value
    ///
    /// Schedules nothing; the caller decides when to refetch.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let Some(slot) = self.existing_slot(key) else {
            return false;
        };
        let mut slot = slot.lock();
        let Some(entry) = slot.entry.as_mut() else {
            return false;
        };
        entry.stale = true;
        debug!(%key, version = entry.version, "Cache entry invalidated");
        slot.notify(key, UpdateKind::Invalidate);
        true
    }

    /// Invalidate every key matching a predicate; returns how many were marked
    pub fn invalidate_matching(&self, predicate: impl Fn(&CacheKey) -> bool) -> usize {
        let keys: Vec<CacheKey> = self
            .slots
            .read()
            .keys()
            .filter(|k| predicate(k))
            .cloned()
            .collect();
        keys.iter().filter(|k| self.invalidate(k)).count()
    }

    /// Subscribe to updates for a key, whether or not it holds a value yet
    pub fn subscribe(&self, key: &CacheKey) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.slot(key).lock().subscribers.push((id, tx));
        Subscription {
            id,
            key: key.clone(),
            rx,
        }
    }

    /// Stop delivery to one subscription; returns false if it was unknown
    pub fn unsubscribe(&self, key: &CacheKey, id: SubscriptionId) -> bool {
        let Some(slot) = self.existing_slot(key) else {
            return false;
        };
        let mut slot = slot.lock();
        let before = slot.subscribers.len();
        slot.subscribers.retain(|(sub_id, _)| *sub_id != id);
        slot.subscribers.len() != before
    }

    /// Number of live subscriptions on a key
    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.existing_slot(key)
            .map(|slot| {
                let mut slot = slot.lock();
                slot.subscribers.retain(|(_, tx)| !tx.is_closed());
                slot.subscribers.len()
            })
            .unwrap_or(0)
    }

    /// Look up an announcement in any cached announcement list
    pub fn find_announcement(&self, id: &AnnouncementId) -> Option<Announcement> {
        let slots: Vec<Arc<Mutex<Slot>>> = self
            .slots
            .read()
            .iter()
            .filter(|(k, _)| k.is_announcements())
            .map(|(_, slot)| slot.clone())
            .collect();
        slots.iter().find_map(|slot| {
            let slot = slot.lock();
            slot.entry
                .as_ref()
                .and_then(|e| e.value.find_announcement(id).cloned())
        })
    }

    /// Drop every entry and subscription (sign-out)
    pub fn clear(&self) {
        let mut slots = self.slots.write();
        debug!(keys = slots.len(), "Clearing cache store");
        slots.clear();
    }

    /// Keys that currently hold a value
    pub fn keys(&self) -> Vec<CacheKey> {
        self.slots
            .read()
            .iter()
            .filter(|(_, slot)| slot.lock().entry.is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
