//! Notification rows and the per-user notification collection

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{now_millis, AnnouncementId, NotificationId, UserId};

/// What triggered a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Announcement,
    System,
    Reminder,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Announcement => write!(f, "announcement"),
            NotificationKind::System => write!(f, "system"),
            NotificationKind::Reminder => write!(f, "reminder"),
        }
    }
}

/// A notification addressed to one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub message: String,
    pub related_announcement_id: Option<AnnouncementId>,
    /// Only ever moves from false to true
    pub is_read: bool,
    /// Unix timestamp (milliseconds) of creation
    pub created_at: i64,
}

impl Notification {
    pub fn new(user_id: UserId, kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            id: NotificationId::new(),
            user_id,
            kind,
            message: message.into(),
            related_announcement_id: None,
            is_read: false,
            created_at: now_millis(),
        }
    }

    pub fn with_announcement(mut self, announcement_id: AnnouncementId) -> Self {
        self.related_announcement_id = Some(announcement_id);
        self
    }

    /// Mark as read; returns true if this call flipped the flag
    pub fn mark_read(&mut self) -> bool {
        let flipped = !self.is_read;
        self.is_read = true;
        flipped
    }
}

/// One user's notifications, newest first, unique by id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationList {
    items: Vec<Notification>,
}

impl NotificationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from fetched rows; duplicates collapse with read state merged
    pub fn from_rows(rows: impl IntoIterator<Item = Notification>) -> Self {
        let mut list = Self::new();
        for row in rows {
            list.upsert(row);
        }
        list
    }

    pub fn contains(&self, id: &NotificationId) -> bool {
        self.items.iter().any(|n| &n.id == id)
    }

    pub fn get(&self, id: &NotificationId) -> Option<&Notification> {
        self.items.iter().find(|n| &n.id == id)
    }

    /// Fold a pushed row in; returns false if the id is already present
    pub fn fold_insert(&mut self, notification: Notification) -> bool {
        if self.contains(&notification.id) {
            return false;
        }
        self.insert_sorted(notification);
        true
    }

    /// Insert or replace a row, never reverting a read flag to unread
    pub fn upsert(&mut self, mut notification: Notification) {
        if let Some(pos) = self.items.iter().position(|n| n.id == notification.id) {
            let existing = self.items.remove(pos);
            notification.is_read |= existing.is_read;
        }
        self.insert_sorted(notification);
    }

    /// Mark one row read; returns true if it was unread
    pub fn mark_read(&mut self, id: &NotificationId) -> bool {
        self.items
            .iter_mut()
            .find(|n| &n.id == id)
            .map(Notification::mark_read)
            .unwrap_or(false)
    }

    /// Mark every row read; returns the ids that were unread
    pub fn mark_all_read(&mut self) -> Vec<NotificationId> {
        self.items
            .iter_mut()
            .filter_map(|n| n.mark_read().then(|| n.id.clone()))
            .collect()
    }

    /// Undo an optimistic read flip that the platform did not accept
    ///
    /// This is the only path that clears a read flag, and it only applies to
    /// flips that were never confirmed.
    pub(crate) fn revert_read(&mut self, ids: &[NotificationId]) {
        for n in self.items.iter_mut().filter(|n| ids.contains(&n.id)) {
            n.is_read = false;
        }
    }

    pub fn remove(&mut self, id: &NotificationId) -> Option<Notification> {
        let pos = self.items.iter().position(|n| &n.id == id)?;
        Some(self.items.remove(pos))
    }

    /// Remove all read rows, returning them
    pub fn remove_read(&mut self) -> Vec<Notification> {
        let (read, unread): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.items).into_iter().partition(|n| n.is_read);
        self.items = unread;
        read
    }

    /// Keep only the newest `limit` rows
    pub fn truncate(&mut self, limit: usize) {
        self.items.truncate(limit);
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.is_read).count()
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn insert_sorted(&mut self, notification: Notification) {
        let pos = self
            .items
            .iter()
            .position(|n| n.created_at < notification.created_at)
            .unwrap_or(self.items.len());
        self.items.insert(pos, notification);
    }
}
