//! Remote Entity Gateway contract
//!
//! Typed request/response functions against the remote data platform. Each
//! call is a single round trip and returns a [`GatewayResult`]; untyped
//! platform responses are decoded by the implementation, never by callers.
//!
//! [`MemoryGateway`] is an in-process implementation of the platform used by
//! the tests and the demo binary.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{GatewayError, GatewayResult};
use crate::types::{
    Announcement, AnnouncementFilter, AnnouncementId, Bookmark, BookmarkEntry, Notification,
    NotificationId, UserId,
};

mod memory;

pub use memory::{GatewayOp, MemoryGateway};

/// Live subscription to one user's notification-insert stream
///
/// Delivery is at-least-once: the same row may arrive more than once.
/// [`recv`](Self::recv) returns `None` when the transport drops.
#[derive(Debug)]
pub struct InsertSubscription {
    user_id: UserId,
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl InsertSubscription {
    pub fn new(user_id: UserId, rx: mpsc::UnboundedReceiver<Notification>) -> Self {
        Self { user_id, rx }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Next inserted row, or `None` once the transport is gone
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }
}

/// Remote platform operations used by the synchronization core
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Announcements matching a filter, newest first
    async fn fetch_announcements(
        &self,
        filter: &AnnouncementFilter,
    ) -> GatewayResult<Vec<Announcement>>;

    /// A user's bookmarks joined with their announcements, newest first
    async fn fetch_bookmarks(&self, user_id: &UserId) -> GatewayResult<Vec<BookmarkEntry>>;

    /// Create a bookmark; `AlreadyExists` if the pair is already bookmarked
    async fn create_bookmark(
        &self,
        user_id: &UserId,
        announcement_id: &AnnouncementId,
    ) -> GatewayResult<Bookmark>;

    /// Delete a bookmark; `NotFound` if the pair is not bookmarked
    async fn delete_bookmark(
        &self,
        user_id: &UserId,
        announcement_id: &AnnouncementId,
    ) -> GatewayResult<()>;

    /// A user's newest notifications
    async fn fetch_notifications(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> GatewayResult<Vec<Notification>>;

    /// Set the read flag on one notification and return the updated row
    async fn mark_notification_read(&self, id: &NotificationId) -> GatewayResult<Notification>;

    /// Set the read flag on all of a user's unread notifications
    async fn mark_all_notifications_read(
        &self,
        user_id: &UserId,
    ) -> GatewayResult<Vec<Notification>>;

    /// Delete one notification; `NotFound` if it does not exist
    async fn delete_notification(&self, id: &NotificationId) -> GatewayResult<()>;

    /// Delete all of a user's read notifications
    async fn delete_read_notifications(&self, user_id: &UserId) -> GatewayResult<()>;

    /// Open the notification-insert stream for a user
    ///
    /// Returning `Ok` is the subscription acknowledgment.
    async fn subscribe_notification_inserts(
        &self,
        user_id: &UserId,
    ) -> GatewayResult<InsertSubscription>;
}

/// Run a gateway call with an upper bound on its duration
///
/// An elapsed call becomes [`GatewayError::Timeout`]. The remote effect may
/// still have happened; callers rely on idempotent remote operations rather
/// than compensating.
pub async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = GatewayResult<T>>,
) -> GatewayResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(limit)),
    }
}
