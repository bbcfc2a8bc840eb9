//! Synchronization layer
//!
//! Keeps the [`CacheStore`](crate::cache::CacheStore) consistent with the
//! remote platform through three paths: optimistic mutations, pull refetches
//! and the push stream of inserted notifications.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  MutationCoordinator                                            │
//! │  ├── patch cache → remote call → settle or roll back            │
//! │  └── per (user, announcement) turn queue for bookmark toggles   │
//! │                                                                 │
//! │  QueryRefresher                                                 │
//! │  └── reserve version → fetch → put_or_merge (late: merge/drop)  │
//! │                                                                 │
//! │  PushListener (one per session)                                 │
//! │  ├── Disconnected → Connecting → Active ⇄ Reconnecting          │
//! │  ├── exponential backoff with jitter between attempts           │
//! │  ├── one reconciling refetch on every (re)connect               │
//! │  └── folds inserted notifications, dropping duplicates          │
//! │                                                                 │
//! │  SyncEvent broadcast channel for UI indicators                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod backoff;
mod coordinator;
mod events;
mod push;
mod refresh;

pub use backoff::{delay_for_attempt, Backoff};
pub use coordinator::{MutationCoordinator, ToggleOutcome};
pub use events::{ListenerState, SyncEvent};
pub use push::PushListener;
pub use refresh::{QueryRefresher, Refresh};

pub(crate) use refresh::require_user;
