//! Bookmark toggle scenarios
//!
//! Drives `FeedSession` against the in-memory platform and checks that the
//! cached bookmark set converges to the platform's rows after optimistic
//! toggles, failures, timeouts and concurrent toggles.

use std::sync::Arc;
use std::time::Duration;

use campusfeed_core::{
    Announcement, AnnouncementId, CacheKey, Category, FeedError, FeedSession, GatewayError,
    GatewayOp, MemoryGateway, Refresh, RemoteGateway, SyncConfig, UpdateKind, UserId,
};

// ============================================================================
// Test Utilities
// ============================================================================

fn seeded_gateway(count: usize) -> (Arc<MemoryGateway>, Vec<Announcement>) {
    let gateway = Arc::new(MemoryGateway::new());
    let announcements: Vec<Announcement> = (0..count)
        .map(|i| {
            let announcement = Announcement::new(
                format!("Announcement {}", i),
                Category::General,
                "Student Services",
                UserId::new(),
            );
            gateway.insert_announcement(announcement.clone());
            announcement
        })
        .collect();
    (gateway, announcements)
}

async fn session(gateway: &Arc<MemoryGateway>) -> FeedSession {
    session_with(gateway, SyncConfig::default()).await
}

async fn session_with(gateway: &Arc<MemoryGateway>, config: SyncConfig) -> FeedSession {
    FeedSession::init(UserId::from("student-1"), gateway.clone(), config)
        .await
        .unwrap()
}

fn cached_ids(session: &FeedSession) -> Vec<AnnouncementId> {
    session
        .bookmarks()
        .and_then(|s| s.value.as_bookmarks().map(|list| list.announcement_ids()))
        .unwrap_or_default()
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_toggle_adds_confirmed_bookmark() {
    let (gateway, announcements) = seeded_gateway(1);
    let session = session(&gateway).await;

    let outcome = session.toggle_bookmark(&announcements[0].id).await.unwrap();
    assert!(outcome.bookmarked);
    assert!(!outcome.tentative);

    let remote = gateway.bookmarks(session.user_id());
    assert_eq!(remote.len(), 1);

    let snapshot = session.bookmarks().unwrap();
    let list = snapshot.value.as_bookmarks().unwrap();
    let entry = list.get(&announcements[0].id).unwrap();
    assert_eq!(entry.bookmark.id, remote[0].id);
    assert!(!snapshot.optimistic);
}

#[tokio::test(start_paused = true)]
async fn test_toggle_twice_removes_bookmark() {
    let (gateway, announcements) = seeded_gateway(1);
    let session = session(&gateway).await;

    session.toggle_bookmark(&announcements[0].id).await.unwrap();
    let outcome = session.toggle_bookmark(&announcements[0].id).await.unwrap();

    assert!(!outcome.bookmarked);
    assert!(!session.is_bookmarked(&announcements[0].id));
    assert!(gateway.bookmarks(session.user_id()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_provisional_entry_carries_cached_summary() {
    let (gateway, announcements) = seeded_gateway(1);
    let session = session(&gateway).await;
    session
        .refresh_announcements(session.feed_filter())
        .await
        .unwrap();

    session.toggle_bookmark(&announcements[0].id).await.unwrap();

    let snapshot = session.bookmarks().unwrap();
    let entry = snapshot
        .value
        .as_bookmarks()
        .unwrap()
        .get(&announcements[0].id)
        .cloned()
        .unwrap();
    assert_eq!(entry.announcement.unwrap().title, "Announcement 0");
}

// ============================================================================
// Failure and Rollback
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_add_rolls_back() {
    let (gateway, announcements) = seeded_gateway(1);
    let session = session(&gateway).await;
    gateway.fail_next(
        GatewayOp::CreateBookmark,
        GatewayError::Transport("connection reset".into()),
    );

    let result = session.toggle_bookmark(&announcements[0].id).await;

    assert!(matches!(result, Err(FeedError::TransportFailed(_))));
    assert!(!session.is_bookmarked(&announcements[0].id));
    assert!(!session.bookmarks().unwrap().optimistic);
}

#[tokio::test(start_paused = true)]
async fn test_failed_remove_restores_row() {
    let (gateway, announcements) = seeded_gateway(1);
    let session = session(&gateway).await;
    session.toggle_bookmark(&announcements[0].id).await.unwrap();
    gateway.fail_next(
        GatewayOp::DeleteBookmark,
        GatewayError::Transport("connection reset".into()),
    );

    let result = session.toggle_bookmark(&announcements[0].id).await;

    assert!(result.is_err());
    assert!(session.is_bookmarked(&announcements[0].id));
    assert_eq!(gateway.bookmarks(session.user_id()).len(), 1);
}

/// Rollback is an inverse edit: a concurrent success on another row survives
#[tokio::test(start_paused = true)]
async fn test_rollback_keeps_concurrent_change() {
    let (gateway, announcements) = seeded_gateway(2);
    let session = session(&gateway).await;
    gateway.set_latency(GatewayOp::CreateBookmark, Duration::from_millis(100));
    gateway.fail_next(
        GatewayOp::CreateBookmark,
        GatewayError::Transport("connection reset".into()),
    );

    let (first, second) = tokio::join!(
        session.toggle_bookmark(&announcements[0].id),
        session.toggle_bookmark(&announcements[1].id),
    );

    assert!(first.is_err());
    assert!(second.unwrap().bookmarked);
    assert_eq!(cached_ids(&session), vec![announcements[1].id.clone()]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_rolls_back() {
    let (gateway, announcements) = seeded_gateway(1);
    let config = SyncConfig {
        request_timeout: Duration::from_secs(1),
        ..SyncConfig::default()
    };
    let session = session_with(&gateway, config).await;
    gateway.set_latency(GatewayOp::CreateBookmark, Duration::from_secs(5));

    let result = session.toggle_bookmark(&announcements[0].id).await;

    assert!(matches!(result, Err(FeedError::TransportFailed(_))));
    assert!(!session.is_bookmarked(&announcements[0].id));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_announcement_rejected() {
    let (gateway, _) = seeded_gateway(0);
    let session = session(&gateway).await;

    let result = session.toggle_bookmark(&AnnouncementId::new()).await;

    assert!(matches!(result, Err(FeedError::ValidationRejected(_))));
    assert_eq!(session.bookmark_count(), 0);
}

// ============================================================================
// Absorbed Outcomes
// ============================================================================

/// Another device bookmarked the same announcement; the local view was stale
#[tokio::test(start_paused = true)]
async fn test_already_exists_counts_as_success() {
    let (gateway, announcements) = seeded_gateway(1);
    let session = session(&gateway).await;
    gateway
        .create_bookmark(session.user_id(), &announcements[0].id)
        .await
        .unwrap();

    let outcome = session.toggle_bookmark(&announcements[0].id).await.unwrap();

    assert!(outcome.bookmarked);
    let snapshot = session.bookmarks().unwrap();
    assert!(snapshot.stale);
    assert!(session.is_bookmarked(&announcements[0].id));

    session.refresh_bookmarks().await.unwrap();
    let list = session.bookmarks().unwrap();
    let entry = list.value.as_bookmarks().unwrap().get(&announcements[0].id).cloned();
    assert!(!entry.unwrap().bookmark.is_provisional());
    assert_eq!(gateway.bookmarks(session.user_id()).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_not_found_on_remove_counts_as_success() {
    let (gateway, announcements) = seeded_gateway(1);
    let session = session(&gateway).await;
    session.toggle_bookmark(&announcements[0].id).await.unwrap();
    gateway
        .delete_bookmark(session.user_id(), &announcements[0].id)
        .await
        .unwrap();

    let outcome = session.toggle_bookmark(&announcements[0].id).await.unwrap();

    assert!(!outcome.bookmarked);
    assert!(!session.is_bookmarked(&announcements[0].id));
}

// ============================================================================
// Serialization and Cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_toggles_on_same_pair_are_serialized() {
    let (gateway, announcements) = seeded_gateway(1);
    let session = session(&gateway).await;
    gateway.set_latency(GatewayOp::CreateBookmark, Duration::from_millis(100));
    gateway.set_latency(GatewayOp::DeleteBookmark, Duration::from_millis(100));

    let (first, second) = tokio::join!(
        session.toggle_bookmark(&announcements[0].id),
        session.toggle_bookmark(&announcements[0].id),
    );

    assert!(first.unwrap().bookmarked);
    assert!(!second.unwrap().bookmarked);
    assert_eq!(gateway.call_count(GatewayOp::CreateBookmark), 1);
    assert_eq!(gateway.call_count(GatewayOp::DeleteBookmark), 1);
    assert!(gateway.bookmarks(session.user_id()).is_empty());
    assert!(!session.is_bookmarked(&announcements[0].id));
    assert_eq!(session.coordinator().toggles_in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_toggles_on_distinct_pairs_overlap() -> anyhow::Result<()> {
    let (gateway, announcements) = seeded_gateway(4);
    let session = session(&gateway).await;
    gateway.set_latency(GatewayOp::CreateBookmark, Duration::from_millis(100));
    let started = tokio::time::Instant::now();

    let outcomes = futures::future::join_all(
        announcements
            .iter()
            .map(|a| session.toggle_bookmark(&a.id)),
    )
    .await;

    for outcome in outcomes {
        assert!(outcome?.bookmarked);
    }
    // One round trip, not four
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(session.bookmark_count(), 4);
    assert_eq!(gateway.bookmarks(session.user_id()).len(), 4);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_toggle_still_settles() {
    let (gateway, announcements) = seeded_gateway(1);
    let session = session(&gateway).await;
    gateway.set_latency(GatewayOp::CreateBookmark, Duration::from_millis(200));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        session.toggle_bookmark(&announcements[0].id),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(session.bookmarks().unwrap().optimistic);

    tokio::time::sleep(Duration::from_millis(500)).await;

    let snapshot = session.bookmarks().unwrap();
    assert!(!snapshot.optimistic);
    let entry = snapshot.value.as_bookmarks().unwrap().get(&announcements[0].id).cloned();
    assert!(!entry.unwrap().bookmark.is_provisional());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_during_remove_does_not_resurrect_row() {
    let (gateway, announcements) = seeded_gateway(1);
    let session = session(&gateway).await;
    session.toggle_bookmark(&announcements[0].id).await.unwrap();
    gateway.set_latency(GatewayOp::DeleteBookmark, Duration::from_secs(1));

    let (removed, refreshed) = tokio::join!(
        session.toggle_bookmark(&announcements[0].id),
        async {
            // Fetch lands while the delete is still on the wire
            tokio::time::sleep(Duration::from_millis(100)).await;
            session.refresh_bookmarks().await
        },
    );

    assert!(!removed.unwrap().bookmarked);
    assert!(matches!(refreshed.unwrap(), Refresh::Applied(_)));
    assert!(gateway.bookmarks(session.user_id()).is_empty());
    assert!(!session.is_bookmarked(&announcements[0].id));
    assert_eq!(session.bookmark_count(), 0);
    assert!(!session.bookmarks().unwrap().optimistic);
}

#[tokio::test(start_paused = true)]
async fn test_watcher_sees_patch_then_settle() {
    let (gateway, announcements) = seeded_gateway(1);
    let session = session(&gateway).await;
    let mut watch = session.watch_bookmarks();

    session.toggle_bookmark(&announcements[0].id).await.unwrap();

    let patched = watch.try_recv().unwrap();
    let settled = watch.try_recv().unwrap();
    assert_eq!(patched.kind, UpdateKind::Patch);
    assert!(patched.optimistic);
    assert_eq!(settled.kind, UpdateKind::Settle);
    assert!(!settled.optimistic);
    assert!(settled.version > patched.version);
    assert_eq!(
        *watch.key(),
        CacheKey::Bookmarks(session.user_id().clone())
    );
}

// ============================================================================
// Cold Cache
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_toggle_with_failed_initial_load_is_tentative() {
    let (gateway, announcements) = seeded_gateway(1);
    gateway.fail_next(
        GatewayOp::FetchBookmarks,
        GatewayError::Transport("offline".into()),
    );
    let session = session(&gateway).await;
    assert!(session.bookmarks().is_none());

    let outcome = session.toggle_bookmark(&announcements[0].id).await.unwrap();

    assert!(outcome.bookmarked);
    assert!(outcome.tentative);
    assert!(session.bookmarks().unwrap().tentative);
}
