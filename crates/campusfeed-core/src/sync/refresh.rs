//! Pull refetches into the Cache Store
//!
//! A refetch reserves a version before its round trip and writes the result
//! with that version, so a response that lands after a newer write (an
//! optimistic patch, a later refetch, a folded push) is discarded instead of
//! overwriting fresher data. Notification refetches are the exception: their
//! rows are folded into the newer value, because a reconnect relies on them
//! to recover pushes missed during the outage. A failed refetch keeps the
//! last known value and marks it stale.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{CacheKey, CacheStore, CacheValue, MergeOutcome, Version};
use crate::config::SyncConfig;
use crate::error::{FeedError, FeedResult, GatewayResult};
use crate::gateway::{with_timeout, RemoteGateway};
use crate::types::{AnnouncementFilter, BookmarkList, NotificationList, UserId};

/// Outcome of a successful refetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// The result was stored under this version
    Applied(Version),
    /// A newer write landed during the round trip; the fetched rows were
    /// folded into it under this version
    Merged(Version),
    /// A newer write landed during the round trip; the result was dropped
    Superseded,
}

/// Issues refetches and writes their results into the cache
#[derive(Clone)]
pub struct QueryRefresher {
    gateway: Arc<dyn RemoteGateway>,
    cache: Arc<CacheStore>,
    config: SyncConfig,
}

impl QueryRefresher {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        cache: Arc<CacheStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            gateway,
            cache,
            config,
        }
    }

    /// Refetch the announcements matching `filter`
    pub async fn refresh_announcements(&self, filter: AnnouncementFilter) -> FeedResult<Refresh> {
        if filter.limit == 0 {
            return Err(FeedError::ValidationRejected(
                "announcement filter limit must be greater than zero".to_string(),
            ));
        }
        let key = CacheKey::Announcements(filter.clone());
        let gateway = self.gateway.clone();
        let fetch = async move {
            gateway
                .fetch_announcements(&filter)
                .await
                .map(CacheValue::Announcements)
        };
        self.run(key, fetch, keep_newer).await
    }

    /// Refetch a user's bookmarks
    pub async fn refresh_bookmarks(&self, user_id: &UserId) -> FeedResult<Refresh> {
        require_user(user_id)?;
        let key = CacheKey::Bookmarks(user_id.clone());
        let gateway = self.gateway.clone();
        let user_id = user_id.clone();
        let fetch = async move {
            let entries = gateway.fetch_bookmarks(&user_id).await;
            entries.map(|entries| CacheValue::Bookmarks(BookmarkList::from_entries(entries)))
        };
        self.run(key, fetch, keep_newer).await
    }

    /// Refetch a user's notifications, up to the configured limit
    ///
    /// If a write lands during the round trip, fetched rows are upserted into
    /// the newer list (a read flag is never cleared) and the result is
    /// returned as [`Refresh::Merged`].
    pub async fn refresh_notifications(&self, user_id: &UserId) -> FeedResult<Refresh> {
        require_user(user_id)?;
        let key = CacheKey::Notifications(user_id.clone());
        let gateway = self.gateway.clone();
        let user_id = user_id.clone();
        let limit = self.config.notification_limit;
        let fetch = async move {
            let rows = gateway.fetch_notifications(&user_id, limit).await;
            rows.map(|rows| CacheValue::Notifications(NotificationList::from_rows(rows)))
        };
        self.run(key, fetch, move |current, fetched| {
            let (Some(list), CacheValue::Notifications(rows)) =
                (current.notifications_mut(), fetched)
            else {
                return false;
            };
            let before = list.clone();
            for row in rows.iter().cloned() {
                list.upsert(row);
            }
            list.truncate(limit);
            *list != before
        })
        .await
    }

    async fn run(
        &self,
        key: CacheKey,
        fetch: impl Future<Output = GatewayResult<CacheValue>>,
        merge: impl FnOnce(&mut CacheValue, CacheValue) -> bool,
    ) -> FeedResult<Refresh> {
        let version = self.cache.next_version(&key);
        match with_timeout(self.config.request_timeout, fetch).await {
            Ok(value) => {
                let rows = value.len();
                match self.cache.put_or_merge(&key, value, version, merge) {
                    MergeOutcome::Applied(version) => {
                        debug!(%key, version, rows, "Refetch applied");
                        Ok(Refresh::Applied(version))
                    }
                    MergeOutcome::Merged(merged) => {
                        debug!(%key, version, merged, rows, "Refetch merged into a newer write");
                        Ok(Refresh::Merged(merged))
                    }
                    MergeOutcome::Discarded => {
                        debug!(%key, version, "Refetch superseded by a newer write");
                        Ok(Refresh::Superseded)
                    }
                }
            }
            Err(err) => {
                warn!(%key, error = %err, "Refetch failed, keeping last known value");
                self.cache.invalidate(&key);
                Err(err.into())
            }
        }
    }
}

/// Merge policy for collections where the newer write always wins
fn keep_newer(_current: &mut CacheValue, _fetched: CacheValue) -> bool {
    false
}

pub(crate) fn require_user(user_id: &UserId) -> FeedResult<()> {
    if user_id.is_empty() {
        return Err(FeedError::ValidationRejected(
            "user id must not be empty".to_string(),
        ));
    }
    Ok(())
}
