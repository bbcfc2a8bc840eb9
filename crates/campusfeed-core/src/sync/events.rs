//! Listener state and sync events
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ListenerState: push subscription lifecycle                     │
//! │  ├── Disconnected: no transport (initial, and after sign-out)   │
//! │  ├── Connecting: first subscribe in progress                    │
//! │  ├── Active: subscription acknowledged, events flowing          │
//! │  └── Reconnecting: transport lost, retrying with backoff        │
//! │                                                                 │
//! │  SyncEvent: notifications for UI-level indicators               │
//! │  ├── ListenerStateChanged                                       │
//! │  ├── NotificationFolded                                         │
//! │  ├── Reconciled / ReconcileFailed                               │
//! │  ├── MutationRolledBack                                         │
//! │  └── SessionExpired                                             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use crate::cache::CacheKey;
use crate::types::{NotificationId, UserId};

/// State of the push listener for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListenerState {
    /// No transport; initial state and terminal state after sign-out
    #[default]
    Disconnected,
    /// First subscription attempt in progress
    Connecting,
    /// Subscription acknowledged
    Active,
    /// Transport lost; retrying
    Reconnecting {
        /// Consecutive failed attempts so far
        attempt: u32,
    },
}

impl ListenerState {
    /// Whether a view should show a "reconnecting" indicator
    pub fn is_degraded(&self) -> bool {
        matches!(self, ListenerState::Reconnecting { .. })
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerState::Disconnected => write!(f, "Disconnected"),
            ListenerState::Connecting => write!(f, "Connecting"),
            ListenerState::Active => write!(f, "Active"),
            ListenerState::Reconnecting { attempt } => {
                write!(f, "Reconnecting (attempt {})", attempt)
            }
        }
    }
}

/// Events emitted by the synchronization core
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The push listener moved to a new state
    ListenerStateChanged {
        user_id: UserId,
        state: ListenerState,
    },
    /// A pushed notification was processed
    NotificationFolded {
        user_id: UserId,
        notification_id: NotificationId,
        /// The row was already cached and nothing changed
        duplicate: bool,
        /// Unread count after folding
        unread_count: usize,
    },
    /// The notification collection was refetched after (re)subscribing
    Reconciled {
        user_id: UserId,
        /// Rows in the refetched collection
        notifications: usize,
    },
    /// The reconciling refetch failed; the entry was marked stale
    ReconcileFailed { user_id: UserId, message: String },
    /// An optimistic mutation was undone after a remote failure
    MutationRolledBack { key: CacheKey, message: String },
    /// The platform rejected the session; the user must sign in again
    SessionExpired { user_id: UserId },
}

impl SyncEvent {
    /// Get the user associated with this event, if any
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            SyncEvent::ListenerStateChanged { user_id, .. } => Some(user_id),
            SyncEvent::NotificationFolded { user_id, .. } => Some(user_id),
            SyncEvent::Reconciled { user_id, .. } => Some(user_id),
            SyncEvent::ReconcileFailed { user_id, .. } => Some(user_id),
            SyncEvent::MutationRolledBack { key, .. } => key.user_id(),
            SyncEvent::SessionExpired { user_id } => Some(user_id),
        }
    }
}
