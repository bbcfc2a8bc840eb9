//! In-process simulation of the remote data platform
//!
//! Behaves like the real platform for every [`RemoteGateway`] call (row
//! storage, uniqueness of bookmark pairs, push fan-out per user) and adds
//! controls the real platform does not have: injected faults, per-operation
//! latency, call counters and forced transport drops.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{InsertSubscription, RemoteGateway};
use crate::error::{GatewayError, GatewayResult};
use crate::types::{
    Announcement, AnnouncementFilter, AnnouncementId, Bookmark, BookmarkEntry, BookmarkId,
    Notification, NotificationId, NotificationKind, Priority, UserId,
};

/// One kind of gateway call, for fault injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    FetchAnnouncements,
    FetchBookmarks,
    CreateBookmark,
    DeleteBookmark,
    FetchNotifications,
    MarkNotificationRead,
    MarkAllNotificationsRead,
    DeleteNotification,
    DeleteReadNotifications,
    SubscribeInserts,
}

#[derive(Default)]
struct Platform {
    announcements: Vec<Announcement>,
    bookmarks: Vec<Bookmark>,
    notifications: Vec<Notification>,
    streams: HashMap<UserId, Vec<mpsc::UnboundedSender<Notification>>>,
    revoked: bool,
}

impl Platform {
    fn push(&mut self, notification: &Notification) -> usize {
        let Some(senders) = self.streams.get_mut(&notification.user_id) else {
            return 0;
        };
        senders.retain(|tx| tx.send(notification.clone()).is_ok());
        senders.len()
    }
}

#[derive(Default)]
struct Control {
    faults: HashMap<GatewayOp, VecDeque<GatewayError>>,
    latency: HashMap<GatewayOp, Duration>,
    delays: HashMap<GatewayOp, VecDeque<Duration>>,
    calls: HashMap<GatewayOp, usize>,
}

/// In-memory [`RemoteGateway`] with fault injection
#[derive(Default)]
pub struct MemoryGateway {
    platform: Mutex<Platform>,
    control: Mutex<Control>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an announcement without notifying anyone
    pub fn insert_announcement(&self, announcement: Announcement) {
        self.platform.lock().announcements.push(announcement);
    }

    /// Store an announcement and notify its audience
    ///
    /// Urgent announcements produce system notifications; all others produce
    /// announcement notifications.
    pub fn publish_announcement(
        &self,
        announcement: Announcement,
        audience: &[UserId],
    ) -> Vec<Notification> {
        let (kind, label) = if announcement.priority == Priority::Urgent {
            (NotificationKind::System, "urgent announcement")
        } else {
            (NotificationKind::Announcement, "announcement")
        };
        let created: Vec<Notification> = audience
            .iter()
            .map(|user_id| {
                Notification::new(
                    user_id.clone(),
                    kind,
                    format!("New {}: {}", label, announcement.title),
                )
                .with_announcement(announcement.id.clone())
            })
            .collect();

        let mut platform = self.platform.lock();
        platform.announcements.push(announcement);
        for notification in &created {
            platform.notifications.push(notification.clone());
            platform.push(notification);
        }
        created
    }

    /// Store a notification and push it to the owner's live streams
    pub fn insert_notification(&self, notification: Notification) -> usize {
        let mut platform = self.platform.lock();
        platform.notifications.push(notification.clone());
        platform.push(&notification)
    }

    /// Push an already delivered row again, as an at-least-once transport may
    pub fn redeliver(&self, notification: &Notification) -> usize {
        self.platform.lock().push(notification)
    }

    /// Drop every live stream for a user; returns how many were closed
    pub fn drop_streams(&self, user_id: &UserId) -> usize {
        self.platform
            .lock()
            .streams
            .remove(user_id)
            .map(|senders| senders.len())
            .unwrap_or(0)
    }

    /// Number of open streams for a user
    pub fn stream_count(&self, user_id: &UserId) -> usize {
        let mut platform = self.platform.lock();
        match platform.streams.get_mut(user_id) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.len()
            }
            None => 0,
        }
    }

    /// Make every subsequent call fail with `Unauthorized`
    pub fn revoke_session(&self) {
        self.platform.lock().revoked = true;
    }

    pub fn restore_session(&self) {
        self.platform.lock().revoked = false;
    }

    /// Fail the next call of `op` with `err`; queued faults apply in order
    pub fn fail_next(&self, op: GatewayOp, err: GatewayError) {
        self.control
            .lock()
            .faults
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// Delay every call of `op` by `latency` before it touches the platform
    pub fn set_latency(&self, op: GatewayOp, latency: Duration) {
        self.control.lock().latency.insert(op, latency);
    }

    /// Delay only the next call of `op`, in place of its usual latency
    pub fn delay_next(&self, op: GatewayOp, latency: Duration) {
        self.control
            .lock()
            .delays
            .entry(op)
            .or_default()
            .push_back(latency);
    }

    /// How many times `op` has been called
    pub fn call_count(&self, op: GatewayOp) -> usize {
        self.control.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Stored bookmark rows for a user
    pub fn bookmarks(&self, user_id: &UserId) -> Vec<Bookmark> {
        self.platform
            .lock()
            .bookmarks
            .iter()
            .filter(|b| &b.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Stored notification rows for a user
    pub fn notifications(&self, user_id: &UserId) -> Vec<Notification> {
        self.platform
            .lock()
            .notifications
            .iter()
            .filter(|n| &n.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn notification(&self, id: &NotificationId) -> Option<Notification> {
        self.platform
            .lock()
            .notifications
            .iter()
            .find(|n| &n.id == id)
            .cloned()
    }

    /// Count the call, apply latency, then any injected fault
    async fn enter(&self, op: GatewayOp) -> GatewayResult<()> {
        let (latency, fault) = {
            let mut control = self.control.lock();
            *control.calls.entry(op).or_default() += 1;
            let delay = control.delays.get_mut(&op).and_then(VecDeque::pop_front);
            (
                delay.or_else(|| control.latency.get(&op).copied()),
                control.faults.get_mut(&op).and_then(VecDeque::pop_front),
            )
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = fault {
            debug!(?op, %err, "Injected gateway fault");
            return Err(err);
        }
        if self.platform.lock().revoked {
            return Err(GatewayError::Unauthorized("session revoked".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn fetch_announcements(
        &self,
        filter: &AnnouncementFilter,
    ) -> GatewayResult<Vec<Announcement>> {
        self.enter(GatewayOp::FetchAnnouncements).await?;
        let platform = self.platform.lock();
        Ok(filter.apply(&platform.announcements))
    }

    async fn fetch_bookmarks(&self, user_id: &UserId) -> GatewayResult<Vec<BookmarkEntry>> {
        self.enter(GatewayOp::FetchBookmarks).await?;
        let platform = self.platform.lock();
        let mut entries: Vec<BookmarkEntry> = platform
            .bookmarks
            .iter()
            .filter(|b| &b.user_id == user_id)
            .map(|b| {
                let announcement = platform
                    .announcements
                    .iter()
                    .find(|a| a.id == b.announcement_id && !a.is_deleted)
                    .map(Announcement::summary);
                BookmarkEntry::new(b.clone(), announcement)
            })
            .collect();
        entries.sort_by(|a, b| b.bookmark.created_at.cmp(&a.bookmark.created_at));
        Ok(entries)
    }

    async fn create_bookmark(
        &self,
        user_id: &UserId,
        announcement_id: &AnnouncementId,
    ) -> GatewayResult<Bookmark> {
        self.enter(GatewayOp::CreateBookmark).await?;
        let mut platform = self.platform.lock();
        if !platform.announcements.iter().any(|a| &a.id == announcement_id) {
            return Err(GatewayError::ValidationRejected(format!(
                "announcement {} does not exist",
                announcement_id
            )));
        }
        if platform
            .bookmarks
            .iter()
            .any(|b| &b.user_id == user_id && &b.announcement_id == announcement_id)
        {
            return Err(GatewayError::AlreadyExists(format!(
                "bookmark ({}, {})",
                user_id, announcement_id
            )));
        }
        let bookmark = Bookmark::new(BookmarkId::new(), user_id.clone(), announcement_id.clone());
        platform.bookmarks.push(bookmark.clone());
        Ok(bookmark)
    }

    async fn delete_bookmark(
        &self,
        user_id: &UserId,
        announcement_id: &AnnouncementId,
    ) -> GatewayResult<()> {
        self.enter(GatewayOp::DeleteBookmark).await?;
        let mut platform = self.platform.lock();
        let before = platform.bookmarks.len();
        platform
            .bookmarks
            .retain(|b| !(&b.user_id == user_id && &b.announcement_id == announcement_id));
        if platform.bookmarks.len() == before {
            return Err(GatewayError::NotFound(format!(
                "bookmark ({}, {})",
                user_id, announcement_id
            )));
        }
        Ok(())
    }

    async fn fetch_notifications(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> GatewayResult<Vec<Notification>> {
        self.enter(GatewayOp::FetchNotifications).await?;
        let platform = self.platform.lock();
        let mut rows: Vec<Notification> = platform
            .notifications
            .iter()
            .filter(|n| &n.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn mark_notification_read(&self, id: &NotificationId) -> GatewayResult<Notification> {
        self.enter(GatewayOp::MarkNotificationRead).await?;
        let mut platform = self.platform.lock();
        let row = platform
            .notifications
            .iter_mut()
            .find(|n| &n.id == id)
            .ok_or_else(|| GatewayError::NotFound(format!("notification {}", id)))?;
        row.is_read = true;
        Ok(row.clone())
    }

    async fn mark_all_notifications_read(
        &self,
        user_id: &UserId,
    ) -> GatewayResult<Vec<Notification>> {
        self.enter(GatewayOp::MarkAllNotificationsRead).await?;
        let mut platform = self.platform.lock();
        Ok(platform
            .notifications
            .iter_mut()
            .filter(|n| &n.user_id == user_id && !n.is_read)
            .map(|n| {
                n.is_read = true;
                n.clone()
            })
            .collect())
    }

    async fn delete_notification(&self, id: &NotificationId) -> GatewayResult<()> {
        self.enter(GatewayOp::DeleteNotification).await?;
        let mut platform = self.platform.lock();
        let before = platform.notifications.len();
        platform.notifications.retain(|n| &n.id != id);
        if platform.notifications.len() == before {
            return Err(GatewayError::NotFound(format!("notification {}", id)));
        }
        Ok(())
    }

    async fn delete_read_notifications(&self, user_id: &UserId) -> GatewayResult<()> {
        self.enter(GatewayOp::DeleteReadNotifications).await?;
        self.platform
            .lock()
            .notifications
            .retain(|n| !(&n.user_id == user_id && n.is_read));
        Ok(())
    }

    async fn subscribe_notification_inserts(
        &self,
        user_id: &UserId,
    ) -> GatewayResult<InsertSubscription> {
        self.enter(GatewayOp::SubscribeInserts).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.platform
            .lock()
            .streams
            .entry(user_id.clone())
            .or_default()
            .push(tx);
        Ok(InsertSubscription::new(user_id.clone(), rx))
    }
}
