//! Campus Feed Core Library
//!
//! Entity synchronization for a campus-announcement reader.
//!
//! ## Overview
//!
//! Campus Feed keeps a local, per-user view of three remote collections
//! (announcements, bookmarks and notifications) consistent across optimistic
//! user mutations, pull-based refetches and a push stream of newly inserted
//! notifications. The remote data platform is consumed only through the
//! [`RemoteGateway`] trait.
//!
//! ## Components
//!
//! - **Cache Store** ([`CacheStore`]): keyed query results with logical
//!   versions, staleness flags and per-key subscribers
//! - **Mutation Coordinator** ([`MutationCoordinator`]): optimistic bookmark
//!   toggles and read-state changes with rollback
//! - **Query Refresher** ([`QueryRefresher`]): pull refetches written with a
//!   reserved version so late responses never overwrite newer data
//! - **Push Listener** ([`PushListener`]): one notification-insert
//!   subscription per session, with backoff and reconciliation on reconnect
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use campusfeed_core::{AnnouncementFilter, Category, FeedSession, MemoryGateway, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = Arc::new(MemoryGateway::new());
//!     let session = FeedSession::init("user-1".into(), gateway, SyncConfig::default()).await?;
//!
//!     let urgent = AnnouncementFilter::default().category(Category::Urgent);
//!     session.refresh_announcements(urgent.clone()).await?;
//!
//!     if let Some(snapshot) = session.announcements(&urgent) {
//!         println!("{} urgent announcements (v{})", snapshot.value.len(), snapshot.version);
//!     }
//!
//!     session.sign_out().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod session;
pub mod sync;
pub mod types;

// Re-exports
pub use cache::{
    CacheKey, CacheSnapshot, CacheStore, CacheUpdate, CacheValue, MergeOutcome, PatchReceipt,
    Subscription, SubscriptionId, UpdateKind, Version,
};
pub use config::{BackoffConfig, SyncConfig};
pub use error::{FeedError, FeedResult, GatewayError, GatewayResult};
pub use gateway::{GatewayOp, InsertSubscription, MemoryGateway, RemoteGateway};
pub use session::FeedSession;
pub use sync::{
    ListenerState, MutationCoordinator, PushListener, QueryRefresher, Refresh, SyncEvent,
    ToggleOutcome,
};
pub use types::*;
