//! Cached values and entry bookkeeping

use crate::types::{Announcement, AnnouncementId, BookmarkList, NotificationList};

/// Logical clock value for a cache key
pub type Version = u64;

/// A cached query result
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Announcements(Vec<Announcement>),
    Bookmarks(BookmarkList),
    Notifications(NotificationList),
}

impl CacheValue {
    pub fn as_announcements(&self) -> Option<&[Announcement]> {
        match self {
            CacheValue::Announcements(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_bookmarks(&self) -> Option<&BookmarkList> {
        match self {
            CacheValue::Bookmarks(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_notifications(&self) -> Option<&NotificationList> {
        match self {
            CacheValue::Notifications(list) => Some(list),
            _ => None,
        }
    }

    pub fn bookmarks_mut(&mut self) -> Option<&mut BookmarkList> {
        match self {
            CacheValue::Bookmarks(list) => Some(list),
            _ => None,
        }
    }

    pub fn notifications_mut(&mut self) -> Option<&mut NotificationList> {
        match self {
            CacheValue::Notifications(list) => Some(list),
            _ => None,
        }
    }

    pub(crate) fn find_announcement(&self, id: &AnnouncementId) -> Option<&Announcement> {
        self.as_announcements()?.iter().find(|a| &a.id == id)
    }

    /// Number of rows in the result set
    pub fn len(&self) -> usize {
        match self {
            CacheValue::Announcements(items) => items.len(),
            CacheValue::Bookmarks(list) => list.len(),
            CacheValue::Notifications(list) => list.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stored state for one key
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub value: CacheValue,
    pub version: Version,
    pub stale: bool,
    /// Optimistic patches applied but not yet settled
    pub pending: u32,
    /// Created by a patch or fold on a cold key, never loaded from the platform
    pub tentative: bool,
}

impl CacheEntry {
    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            value: self.value.clone(),
            version: self.version,
            stale: self.stale,
            optimistic: self.pending > 0,
            tentative: self.tentative,
        }
    }
}

/// A point-in-time read of one cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot {
    pub value: CacheValue,
    pub version: Version,
    /// A refetch is known to be needed
    pub stale: bool,
    /// Contains optimistic edits not yet confirmed by the platform
    pub optimistic: bool,
    /// Never loaded from the platform; contents may be incomplete
    pub tentative: bool,
}
