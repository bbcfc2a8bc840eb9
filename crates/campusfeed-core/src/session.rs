//! Session lifecycle
//!
//! A [`FeedSession`] wires the cache, the mutation coordinator, the query
//! refresher and the push listener together for one signed-in user. It is
//! created on sign-in and consumed by [`FeedSession::sign_out`], which stops
//! the listener and clears every cached entry.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::cache::{CacheKey, CacheSnapshot, CacheStore, Subscription};
use crate::config::SyncConfig;
use crate::error::{FeedError, FeedResult};
use crate::gateway::RemoteGateway;
use crate::sync::{
    require_user, ListenerState, MutationCoordinator, PushListener, QueryRefresher, Refresh,
    SyncEvent, ToggleOutcome,
};
use crate::types::{AnnouncementFilter, AnnouncementId, NotificationId, UserId};

/// One user's synchronization session
pub struct FeedSession {
    user_id: UserId,
    config: SyncConfig,
    cache: Arc<CacheStore>,
    coordinator: MutationCoordinator,
    refresher: QueryRefresher,
    listener: PushListener,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl FeedSession {
    /// Wire a session without starting it
    ///
    /// Use this with [`start`](Self::start) when events from the first
    /// connect must be observed; otherwise prefer [`init`](Self::init).
    pub fn new(
        user_id: UserId,
        gateway: Arc<dyn RemoteGateway>,
        config: SyncConfig,
    ) -> FeedResult<Self> {
        config.validate()?;
        require_user(&user_id)?;

        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        let cache = Arc::new(CacheStore::new());
        let coordinator = MutationCoordinator::new(
            gateway.clone(),
            cache.clone(),
            config.clone(),
            event_tx.clone(),
        );
        let refresher = QueryRefresher::new(gateway.clone(), cache.clone(), config.clone());
        let listener = PushListener::new(
            user_id.clone(),
            gateway,
            cache.clone(),
            config.clone(),
            event_tx.clone(),
        );

        Ok(Self {
            user_id,
            config,
            cache,
            coordinator,
            refresher,
            listener,
            event_tx,
        })
    }

    /// Wire and start a session
    pub async fn init(
        user_id: UserId,
        gateway: Arc<dyn RemoteGateway>,
        config: SyncConfig,
    ) -> FeedResult<Self> {
        let session = Self::new(user_id, gateway, config)?;
        session.start().await?;
        Ok(session)
    }

    /// Start the push listener and load the bookmark set
    ///
    /// A failed bookmark load is not fatal (toggles then run tentative),
    /// except when the platform rejects the session.
    pub async fn start(&self) -> FeedResult<()> {
        self.listener.start();
        match self.refresher.refresh_bookmarks(&self.user_id).await {
            Ok(_) => {}
            Err(FeedError::Unauthorized(message)) => {
                self.listener.stop().await;
                return Err(FeedError::Unauthorized(message));
            }
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "Initial bookmark load failed");
            }
        }
        info!(user_id = %self.user_id, "Feed session started");
        Ok(())
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    pub fn refresher(&self) -> &QueryRefresher {
        &self.refresher
    }

    /// Receive sync events emitted from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }

    /// Unfiltered feed page sized by the configured announcement limit
    pub fn feed_filter(&self) -> AnnouncementFilter {
        AnnouncementFilter::default().limit(self.config.announcement_limit)
    }

    // ---- Reads (cache only, never a round trip) ----

    pub fn announcements(&self, filter: &AnnouncementFilter) -> Option<CacheSnapshot> {
        self.cache.get(&CacheKey::Announcements(filter.clone()))
    }

    pub fn bookmarks(&self) -> Option<CacheSnapshot> {
        self.cache.get(&self.bookmarks_key())
    }

    pub fn notifications(&self) -> Option<CacheSnapshot> {
        self.cache.get(&self.notifications_key())
    }

    /// Whether the cached bookmark set contains `announcement_id`
    ///
    /// A cold bookmark set answers false.
    pub fn is_bookmarked(&self, announcement_id: &AnnouncementId) -> bool {
        self.bookmarks()
            .and_then(|s| s.value.as_bookmarks().map(|list| list.contains(announcement_id)))
            .unwrap_or(false)
    }

    pub fn bookmark_count(&self) -> usize {
        self.bookmarks().map(|s| s.value.len()).unwrap_or(0)
    }

    pub fn unread_count(&self) -> usize {
        self.notifications()
            .and_then(|s| s.value.as_notifications().map(|list| list.unread_count()))
            .unwrap_or(0)
    }

    pub fn watch_bookmarks(&self) -> Subscription {
        self.cache.subscribe(&self.bookmarks_key())
    }

    pub fn watch_notifications(&self) -> Subscription {
        self.cache.subscribe(&self.notifications_key())
    }

    // ---- Refetches ----

    pub async fn refresh_announcements(&self, filter: AnnouncementFilter) -> FeedResult<Refresh> {
        self.refresher.refresh_announcements(filter).await
    }

    pub async fn refresh_bookmarks(&self) -> FeedResult<Refresh> {
        self.refresher.refresh_bookmarks(&self.user_id).await
    }

    pub async fn refresh_notifications(&self) -> FeedResult<Refresh> {
        self.refresher.refresh_notifications(&self.user_id).await
    }

    // ---- Mutations ----

    pub async fn toggle_bookmark(
        &self,
        announcement_id: &AnnouncementId,
    ) -> FeedResult<ToggleOutcome> {
        self.coordinator
            .toggle_bookmark(&self.user_id, announcement_id)
            .await
    }

    pub async fn mark_as_read(&self, notification_id: &NotificationId) -> FeedResult<()> {
        self.coordinator
            .mark_as_read(&self.user_id, notification_id)
            .await
    }

    pub async fn mark_all_as_read(&self) -> FeedResult<usize> {
        self.coordinator.mark_all_as_read(&self.user_id).await
    }

    pub async fn delete_notification(&self, notification_id: &NotificationId) -> FeedResult<()> {
        self.coordinator
            .delete_notification(&self.user_id, notification_id)
            .await
    }

    pub async fn clear_read_notifications(&self) -> FeedResult<usize> {
        self.coordinator
            .clear_read_notifications(&self.user_id)
            .await
    }

    /// Stop the listener and drop every cached entry
    pub async fn sign_out(self) {
        self.listener.stop().await;
        self.cache.clear();
        info!(user_id = %self.user_id, "Feed session signed out");
    }

    fn bookmarks_key(&self) -> CacheKey {
        CacheKey::Bookmarks(self.user_id.clone())
    }

    fn notifications_key(&self) -> CacheKey {
        CacheKey::Notifications(self.user_id.clone())
    }
}
