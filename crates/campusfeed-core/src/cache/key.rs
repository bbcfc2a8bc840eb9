//! Cache keys: (collection, parameters)

use std::fmt;

use crate::types::{AnnouncementFilter, UserId};

use super::CacheValue;

/// Query signature identifying one cache entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Announcements matching a filter
    Announcements(AnnouncementFilter),
    /// A user's bookmarks
    Bookmarks(UserId),
    /// A user's notifications
    Notifications(UserId),
}

impl CacheKey {
    /// Collection name
    pub fn collection(&self) -> &'static str {
        match self {
            CacheKey::Announcements(_) => "announcements",
            CacheKey::Bookmarks(_) => "bookmarks",
            CacheKey::Notifications(_) => "notifications",
        }
    }

    /// Owning user, for per-user collections
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            CacheKey::Announcements(_) => None,
            CacheKey::Bookmarks(user_id) | CacheKey::Notifications(user_id) => Some(user_id),
        }
    }

    pub fn is_announcements(&self) -> bool {
        matches!(self, CacheKey::Announcements(_))
    }

    /// The value a cold entry starts from
    pub fn empty_value(&self) -> CacheValue {
        match self {
            CacheKey::Announcements(_) => CacheValue::Announcements(Vec::new()),
            CacheKey::Bookmarks(_) => CacheValue::Bookmarks(Default::default()),
            CacheKey::Notifications(_) => CacheValue::Notifications(Default::default()),
        }
    }

    /// Whether a value has the shape this key stores
    pub fn accepts(&self, value: &CacheValue) -> bool {
        matches!(
            (self, value),
            (CacheKey::Announcements(_), CacheValue::Announcements(_))
                | (CacheKey::Bookmarks(_), CacheValue::Bookmarks(_))
                | (CacheKey::Notifications(_), CacheValue::Notifications(_))
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Announcements(filter) => write!(f, "announcements{}", filter),
            CacheKey::Bookmarks(user_id) => write!(f, "bookmarks/{}", user_id),
            CacheKey::Notifications(user_id) => write!(f, "notifications/{}", user_id),
        }
    }
}
