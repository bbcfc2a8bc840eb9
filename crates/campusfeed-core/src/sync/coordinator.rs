//! Mutation Coordinator: optimistic writes with reconciliation and rollback
//!
//! Every mutation follows the same three steps:
//!
//! 1. **Patch** the cached collection synchronously (the edit is visible to
//!    readers at once and the entry reports `optimistic`)
//! 2. **Call** the matching remote operation, bounded by the request timeout
//! 3. **Settle**: on success apply the authoritative row; on failure apply
//!    the inverse of step 1 to the *current* value and surface the error
//!
//! Rollback is an inverse edit rather than a restored snapshot, so writes to
//! other rows of the same collection made in the meantime survive.
//!
//! Steps 2 and 3 run on a spawned task. Dropping the caller's future (a view
//! going away) does not abandon the mutation; it still settles the cache.
//!
//! Bookmark toggles on the same (user, announcement) pair are strictly
//! serialized: a second toggle waits for the first's round trip. Read-state
//! changes need no queue because marking read is monotonic. Instead, every
//! in-flight read call holds a claim on its ids, and a failed flip is only
//! reverted by the last claimant, and only if no call for that id succeeded.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Mutex as TurnLock, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::events::SyncEvent;
use super::refresh::require_user;
use crate::cache::{CacheKey, CacheStore, CacheValue, Version};
use crate::config::SyncConfig;
use crate::error::{FeedError, FeedResult, GatewayError};
use crate::gateway::{with_timeout, RemoteGateway};
use crate::types::{AnnouncementId, Bookmark, BookmarkEntry, NotificationId, UserId};

type PairKey = (UserId, AnnouncementId);

type ReadClaims = Arc<Mutex<HashMap<NotificationId, ReadClaim>>>;

/// Result of a bookmark toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleOutcome {
    /// Membership after the toggle
    pub bookmarked: bool,
    /// The bookmark set was not loaded when the toggle started
    pub tentative: bool,
    /// Cache version after settling; `None` if the session was cleared
    pub version: Option<Version>,
}

enum ToggleStep {
    Inserted,
    Removed(BookmarkEntry),
}

/// In-flight read calls for one notification
#[derive(Debug, Default)]
struct ReadClaim {
    in_flight: usize,
    /// Some call flipped the cached row from unread to read
    flipped: bool,
    /// Some call got the platform's confirmation
    confirmed: bool,
}

/// Holds a pair's turn; releasing it lets the next queued toggle run
struct Turn {
    guard: Option<OwnedMutexGuard<()>>,
    pair: PairKey,
    turns: Arc<Mutex<HashMap<PairKey, Arc<TurnLock<()>>>>>,
}

impl Drop for Turn {
    fn drop(&mut self) {
        self.guard.take();
        let mut turns = self.turns.lock();
        if turns
            .get(&self.pair)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            turns.remove(&self.pair);
        }
    }
}

/// Executes optimistic mutations against the cache and the remote platform
#[derive(Clone)]
pub struct MutationCoordinator {
    gateway: Arc<dyn RemoteGateway>,
    cache: Arc<CacheStore>,
    config: SyncConfig,
    turns: Arc<Mutex<HashMap<PairKey, Arc<TurnLock<()>>>>>,
    reads: ReadClaims,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl MutationCoordinator {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        cache: Arc<CacheStore>,
        config: SyncConfig,
        event_tx: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            gateway,
            cache,
            config,
            turns: Arc::new(Mutex::new(HashMap::new())),
            reads: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
        }
    }

    /// Number of (user, announcement) pairs with a toggle running or queued
    pub fn toggles_in_flight(&self) -> usize {
        self.turns.lock().len()
    }

    /// Add the bookmark if absent, remove it if present
    ///
    /// A cold bookmark set is treated as "not bookmarked" and the outcome is
    /// flagged tentative. `AlreadyExists` and `NotFound` from the platform
    /// count as success.
    pub async fn toggle_bookmark(
        &self,
        user_id: &UserId,
        announcement_id: &AnnouncementId,
    ) -> FeedResult<ToggleOutcome> {
        require_user(user_id)?;
        if announcement_id.is_empty() {
            return Err(FeedError::ValidationRejected(
                "announcement id must not be empty".to_string(),
            ));
        }

        let pair = (user_id.clone(), announcement_id.clone());
        let turn = self.acquire_turn(pair).await;
        let this = self.clone();
        detach(async move {
            let (user_id, announcement_id) = turn.pair.clone();
            let result = this.run_toggle(&user_id, &announcement_id).await;
            drop(turn);
            result
        })
        .await
    }

    async fn acquire_turn(&self, pair: PairKey) -> Turn {
        let lock = self
            .turns
            .lock()
            .entry(pair.clone())
            .or_insert_with(|| Arc::new(TurnLock::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        Turn {
            guard: Some(guard),
            pair,
            turns: self.turns.clone(),
        }
    }

    async fn run_toggle(
        &self,
        user_id: &UserId,
        announcement_id: &AnnouncementId,
    ) -> FeedResult<ToggleOutcome> {
        let key = CacheKey::Bookmarks(user_id.clone());
        let summary = self
            .cache
            .find_announcement(announcement_id)
            .map(|a| a.summary());

        let mut step = ToggleStep::Inserted;
        let receipt = self.cache.patch(&key, |value| {
            let Some(list) = value.bookmarks_mut() else {
                return;
            };
            step = match list.remove(announcement_id) {
                Some(previous) => ToggleStep::Removed(previous),
                None => {
                    let provisional =
                        Bookmark::provisional(user_id.clone(), announcement_id.clone());
                    list.insert(BookmarkEntry::new(provisional, summary));
                    ToggleStep::Inserted
                }
            };
        });
        debug!(
            %user_id,
            %announcement_id,
            version = receipt.version,
            tentative = receipt.tentative,
            inserting = matches!(step, ToggleStep::Inserted),
            "Optimistic bookmark toggle"
        );

        match step {
            ToggleStep::Inserted => {
                let call = self.gateway.create_bookmark(user_id, announcement_id);
                match with_timeout(self.config.request_timeout, call).await {
                    Ok(bookmark) => {
                        let version = self.cache.settle(&key, |value| {
                            if let Some(list) = value.bookmarks_mut() {
                                list.confirm(bookmark);
                            }
                        });
                        Ok(ToggleOutcome {
                            bookmarked: true,
                            tentative: receipt.tentative,
                            version,
                        })
                    }
                    Err(GatewayError::AlreadyExists(_)) => {
                        // The row exists remotely but its id is not known here
                        let version = self.cache.settle(&key, |_| {});
                        self.cache.invalidate(&key);
                        debug!(%user_id, %announcement_id, "Bookmark already existed remotely");
                        Ok(ToggleOutcome {
                            bookmarked: true,
                            tentative: receipt.tentative,
                            version,
                        })
                    }
                    Err(err) => {
                        self.rollback(&key, &err, |value| {
                            if let Some(list) = value.bookmarks_mut() {
                                list.remove_provisional(announcement_id);
                            }
                        });
                        Err(err.into())
                    }
                }
            }
            ToggleStep::Removed(previous) => {
                let call = self.gateway.delete_bookmark(user_id, announcement_id);
                match with_timeout(self.config.request_timeout, call).await {
                    Ok(()) | Err(GatewayError::NotFound(_)) => {
                        // A refetch during the round trip may have brought the row back
                        let version = self.cache.settle(&key, |value| {
                            if let Some(list) = value.bookmarks_mut() {
                                list.remove(announcement_id);
                            }
                        });
                        Ok(ToggleOutcome {
                            bookmarked: false,
                            tentative: receipt.tentative,
                            version,
                        })
                    }
                    Err(err) => {
                        self.rollback(&key, &err, move |value| {
                            if let Some(list) = value.bookmarks_mut() {
                                list.insert_if_absent(previous);
                            }
                        });
                        Err(err.into())
                    }
                }
            }
        }
    }

    /// Mark one notification read
    ///
    /// Redundant calls are harmless: a second patch on an already read row
    /// changes nothing, and only a flip made by this call is ever reverted.
    /// A row the platform no longer has is dropped from the cache.
    pub async fn mark_as_read(
        &self,
        user_id: &UserId,
        notification_id: &NotificationId,
    ) -> FeedResult<()> {
        require_user(user_id)?;
        require_notification(notification_id)?;
        let this = self.clone();
        let user_id = user_id.clone();
        let notification_id = notification_id.clone();
        detach(async move { this.run_mark_read(&user_id, &notification_id).await }).await
    }

    async fn run_mark_read(&self, user_id: &UserId, id: &NotificationId) -> FeedResult<()> {
        let key = CacheKey::Notifications(user_id.clone());
        let ids = std::slice::from_ref(id);
        // Claimed under the slot lock so no settle can interleave
        self.cache.patch(&key, |value| {
            let flipped = value
                .notifications_mut()
                .is_some_and(|list| list.mark_read(id));
            self.claim_reads([(id.clone(), flipped)]);
        });

        let call = self.gateway.mark_notification_read(id);
        match with_timeout(self.config.request_timeout, call).await {
            Ok(row) => {
                self.cache.settle(&key, |value| {
                    self.release_reads(ids, true);
                    if let Some(list) = value.notifications_mut() {
                        if list.contains(&row.id) {
                            list.upsert(row);
                        }
                    }
                });
                Ok(())
            }
            Err(GatewayError::NotFound(_)) => {
                debug!(%user_id, notification_id = %id, "Notification gone remotely, dropping it");
                self.cache.settle(&key, |value| {
                    self.release_reads(ids, true);
                    if let Some(list) = value.notifications_mut() {
                        list.remove(id);
                    }
                });
                Ok(())
            }
            Err(err) => {
                self.rollback(&key, &err, |value| {
                    let revert = self.release_reads(ids, false);
                    if let Some(list) = value.notifications_mut() {
                        list.revert_read(&revert);
                    }
                });
                Err(err.into())
            }
        }
    }

    /// Mark all of a user's notifications read; returns rows the platform updated
    pub async fn mark_all_as_read(&self, user_id: &UserId) -> FeedResult<usize> {
        require_user(user_id)?;
        let this = self.clone();
        let user_id = user_id.clone();
        detach(async move { this.run_mark_all_read(&user_id).await }).await
    }

    async fn run_mark_all_read(&self, user_id: &UserId) -> FeedResult<usize> {
        let key = CacheKey::Notifications(user_id.clone());
        let mut claimed = Vec::new();
        self.cache.patch(&key, |value| {
            let Some(list) = value.notifications_mut() else {
                return;
            };
            let flipped = list.mark_all_read();
            claimed = list.iter().map(|n| n.id.clone()).collect();
            self.claim_reads(claimed.iter().map(|id| (id.clone(), flipped.contains(id))));
        });

        let call = self.gateway.mark_all_notifications_read(user_id);
        match with_timeout(self.config.request_timeout, call).await {
            Ok(rows) => {
                let updated = rows.len();
                self.cache.settle(&key, |value| {
                    self.release_reads(&claimed, true);
                    if let Some(list) = value.notifications_mut() {
                        for row in rows {
                            if list.contains(&row.id) {
                                list.upsert(row);
                            }
                        }
                    }
                });
                info!(%user_id, updated, "Marked all notifications read");
                Ok(updated)
            }
            Err(err) => {
                self.rollback(&key, &err, |value| {
                    let revert = self.release_reads(&claimed, false);
                    if let Some(list) = value.notifications_mut() {
                        list.revert_read(&revert);
                    }
                });
                Err(err.into())
            }
        }
    }

    /// Delete one notification
    pub async fn delete_notification(
        &self,
        user_id: &UserId,
        notification_id: &NotificationId,
    ) -> FeedResult<()> {
        require_user(user_id)?;
        require_notification(notification_id)?;
        let this = self.clone();
        let user_id = user_id.clone();
        let notification_id = notification_id.clone();
        detach(async move {
            let key = CacheKey::Notifications(user_id);
            let mut removed = None;
            this.cache.patch(&key, |value| {
                if let Some(list) = value.notifications_mut() {
                    removed = list.remove(&notification_id);
                }
            });

            let call = this.gateway.delete_notification(&notification_id);
            match with_timeout(this.config.request_timeout, call).await {
                Ok(()) | Err(GatewayError::NotFound(_)) => {
                    this.cache.settle(&key, |value| {
                        if let Some(list) = value.notifications_mut() {
                            list.remove(&notification_id);
                        }
                    });
                    Ok(())
                }
                Err(err) => {
                    this.rollback(&key, &err, move |value| {
                        if let (Some(list), Some(row)) = (value.notifications_mut(), removed) {
                            list.upsert(row);
                        }
                    });
                    Err(err.into())
                }
            }
        })
        .await
    }

    /// Delete every read notification; returns how many were removed locally
    pub async fn clear_read_notifications(&self, user_id: &UserId) -> FeedResult<usize> {
        require_user(user_id)?;
        let this = self.clone();
        let user_id = user_id.clone();
        detach(async move {
            let key = CacheKey::Notifications(user_id.clone());
            let mut removed = Vec::new();
            this.cache.patch(&key, |value| {
                if let Some(list) = value.notifications_mut() {
                    removed = list.remove_read();
                }
            });
            let count = removed.len();

            let call = this.gateway.delete_read_notifications(&user_id);
            match with_timeout(this.config.request_timeout, call).await {
                Ok(()) => {
                    this.cache.settle(&key, |value| {
                        if let Some(list) = value.notifications_mut() {
                            for row in &removed {
                                list.remove(&row.id);
                            }
                        }
                    });
                    Ok(count)
                }
                Err(err) => {
                    this.rollback(&key, &err, move |value| {
                        if let Some(list) = value.notifications_mut() {
                            for row in removed {
                                list.upsert(row);
                            }
                        }
                    });
                    Err(err.into())
                }
            }
        })
        .await
    }

    fn claim_reads(&self, ids: impl IntoIterator<Item = (NotificationId, bool)>) {
        let mut reads = self.reads.lock();
        for (id, flipped) in ids {
            let claim = reads.entry(id).or_default();
            claim.in_flight += 1;
            claim.flipped |= flipped;
        }
    }

    /// Drop one call's claims; returns the ids whose flip must be reverted
    fn release_reads(&self, ids: &[NotificationId], confirmed: bool) -> Vec<NotificationId> {
        let mut reads = self.reads.lock();
        let mut revert = Vec::new();
        for id in ids {
            let Some(claim) = reads.get_mut(id) else {
                continue;
            };
            claim.in_flight = claim.in_flight.saturating_sub(1);
            claim.confirmed |= confirmed;
            if claim.in_flight == 0 {
                if claim.flipped && !claim.confirmed {
                    revert.push(id.clone());
                }
                reads.remove(id);
            }
        }
        revert
    }

    /// Notifications with a read call in flight
    pub fn reads_in_flight(&self) -> usize {
        self.reads.lock().len()
    }

    fn rollback(&self, key: &CacheKey, err: &GatewayError, undo: impl FnOnce(&mut CacheValue)) {
        warn!(%key, error = %err, "Remote mutation failed, rolling back");
        self.cache.settle(key, undo);
        let _ = self.event_tx.send(SyncEvent::MutationRolledBack {
            key: key.clone(),
            message: err.to_string(),
        });
        if let (GatewayError::Unauthorized(_), Some(user_id)) = (err, key.user_id()) {
            let _ = self.event_tx.send(SyncEvent::SessionExpired {
                user_id: user_id.clone(),
            });
        }
    }
}

fn require_notification(id: &NotificationId) -> FeedResult<()> {
    if id.is_empty() {
        return Err(FeedError::ValidationRejected(
            "notification id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Run a mutation to completion even if the caller stops waiting
async fn detach<T: Send + 'static>(
    task: impl Future<Output = FeedResult<T>> + Send + 'static,
) -> FeedResult<T> {
    tokio::spawn(task)
        .await
        .map_err(|err| FeedError::Internal(format!("mutation task failed: {}", err)))?
}
