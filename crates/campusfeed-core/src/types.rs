//! Core types for Campus Feed
//!
//! Identifiers issued by the remote platform are opaque strings. Locally
//! generated identifiers (test fixtures, provisional bookmark rows) use ULIDs
//! so they sort by creation time.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

mod announcement;
mod bookmark;
mod notification;

pub use announcement::{Announcement, AnnouncementFilter, AnnouncementSummary, Category, Priority};
pub use bookmark::{Bookmark, BookmarkEntry, BookmarkList};
pub use notification::{Notification, NotificationKind, NotificationList};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new locally generated identifier
            pub fn new() -> Self {
                Self(Ulid::new().to_string())
            }

            /// Wrap an identifier issued by the platform
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the raw identifier
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Empty identifiers are rejected before any remote call
            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

opaque_id!(
    /// Identifier of an authenticated user
    UserId
);

opaque_id!(
    /// Identifier of an announcement
    AnnouncementId
);

opaque_id!(
    /// Identifier of a notification row
    NotificationId
);

opaque_id!(
    /// Row identifier of a bookmark
    ///
    /// Rows created optimistically carry a provisional id until the platform
    /// returns the authoritative one.
    BookmarkId
);

const PROVISIONAL_PREFIX: &str = "local_";

impl BookmarkId {
    /// Create a client-generated placeholder id
    pub fn provisional() -> Self {
        Self(format!("{}{}", PROVISIONAL_PREFIX, Ulid::new()))
    }

    /// Whether this id was generated locally and never confirmed
    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }
}

/// Current time as Unix milliseconds
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
