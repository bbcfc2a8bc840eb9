//! Bookmark rows and the per-user bookmark collection

use serde::{Deserialize, Serialize};

use super::{now_millis, AnnouncementId, AnnouncementSummary, BookmarkId, UserId};

/// A bookmark row; identity is the (user, announcement) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Platform row id, or a provisional id for unconfirmed local rows
    pub id: BookmarkId,
    pub user_id: UserId,
    pub announcement_id: AnnouncementId,
    /// Unix timestamp (milliseconds) of creation
    pub created_at: i64,
}

impl Bookmark {
    /// Create a confirmed bookmark row
    pub fn new(id: BookmarkId, user_id: UserId, announcement_id: AnnouncementId) -> Self {
        Self {
            id,
            user_id,
            announcement_id,
            created_at: now_millis(),
        }
    }

    /// Create a local placeholder row for an optimistic insert
    pub fn provisional(user_id: UserId, announcement_id: AnnouncementId) -> Self {
        Self::new(BookmarkId::provisional(), user_id, announcement_id)
    }

    pub fn is_provisional(&self) -> bool {
        self.id.is_provisional()
    }
}

/// A bookmark joined with the announcement it points at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmarkEntry {
    pub bookmark: Bookmark,
    /// Missing when the announcement was deleted or is not cached yet
    pub announcement: Option<AnnouncementSummary>,
}

impl BookmarkEntry {
    pub fn new(bookmark: Bookmark, announcement: Option<AnnouncementSummary>) -> Self {
        Self {
            bookmark,
            announcement,
        }
    }

    pub fn announcement_id(&self) -> &AnnouncementId {
        &self.bookmark.announcement_id
    }
}

/// One user's bookmarks, newest first
///
/// Holds at most one entry per announcement; every insertion path replaces
/// an existing entry for the same announcement rather than adding a second.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookmarkList {
    entries: Vec<BookmarkEntry>,
}

impl BookmarkList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from fetched rows, collapsing duplicate pairs to the newest row
    pub fn from_entries(entries: impl IntoIterator<Item = BookmarkEntry>) -> Self {
        let mut list = Self::new();
        for entry in entries {
            list.insert(entry);
        }
        list
    }

    pub fn contains(&self, announcement_id: &AnnouncementId) -> bool {
        self.get(announcement_id).is_some()
    }

    pub fn get(&self, announcement_id: &AnnouncementId) -> Option<&BookmarkEntry> {
        self.entries
            .iter()
            .find(|e| e.announcement_id() == announcement_id)
    }

    /// Insert or replace the entry for this announcement
    pub fn insert(&mut self, entry: BookmarkEntry) {
        if let Some(existing) = self
            .entries
            .iter()
            .find(|e| e.announcement_id() == entry.announcement_id())
        {
            if existing.bookmark.created_at > entry.bookmark.created_at
                && !existing.bookmark.is_provisional()
            {
                return;
            }
        }
        self.entries
            .retain(|e| e.announcement_id() != entry.announcement_id());
        let pos = self
            .entries
            .iter()
            .position(|e| e.bookmark.created_at < entry.bookmark.created_at)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, entry);
    }

    /// Insert only when no entry exists for this announcement
    pub fn insert_if_absent(&mut self, entry: BookmarkEntry) -> bool {
        if self.contains(entry.announcement_id()) {
            return false;
        }
        self.insert(entry);
        true
    }

    /// Replace a provisional row with the platform's row, keeping the summary
    pub fn confirm(&mut self, bookmark: Bookmark) {
        let announcement = self
            .get(&bookmark.announcement_id)
            .and_then(|e| e.announcement.clone());
        self.entries
            .retain(|e| e.announcement_id() != &bookmark.announcement_id);
        self.insert(BookmarkEntry::new(bookmark, announcement));
    }

    pub fn remove(&mut self, announcement_id: &AnnouncementId) -> Option<BookmarkEntry> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.announcement_id() == announcement_id)?;
        Some(self.entries.remove(pos))
    }

    /// Remove the entry only if it is still an unconfirmed local row
    pub fn remove_provisional(
        &mut self,
        announcement_id: &AnnouncementId,
    ) -> Option<BookmarkEntry> {
        match self.get(announcement_id) {
            Some(entry) if entry.bookmark.is_provisional() => self.remove(announcement_id),
            _ => None,
        }
    }

    pub fn entries(&self) -> &[BookmarkEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &BookmarkEntry> {
        self.entries.iter()
    }

    pub fn announcement_ids(&self) -> Vec<AnnouncementId> {
        self.entries
            .iter()
            .map(|e| e.announcement_id().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
