//! Push listener lifecycle tests
//!
//! Runs on paused tokio time so backoff delays elapse instantly. Covers the
//! Connecting → Active → Reconnecting → Active cycle, the single reconciling
//! refetch per (re)connect, duplicate suppression, and terminal states.

use std::sync::Arc;
use std::time::Duration;

use campusfeed_core::{
    Announcement, AnnouncementFilter, BackoffConfig, CacheKey, Category, FeedSession,
    GatewayError, GatewayOp, ListenerState, MemoryGateway, Notification, NotificationKind,
    Priority, SyncConfig, SyncEvent, UserId,
};
use tokio::sync::broadcast;

// ============================================================================
// Test Utilities
// ============================================================================

const USER: &str = "student-1";

fn user() -> UserId {
    UserId::from(USER)
}

async fn start(
    gateway: &Arc<MemoryGateway>,
    config: SyncConfig,
) -> (FeedSession, broadcast::Receiver<SyncEvent>) {
    let session = FeedSession::new(user(), gateway.clone(), config).unwrap();
    let events = session.subscribe_events();
    session.start().await.unwrap();
    (session, events)
}

/// Receive events until one matches, returning every event seen on the way
async fn collect_until(
    events: &mut broadcast::Receiver<SyncEvent>,
    done: impl Fn(&SyncEvent) -> bool,
) -> Vec<SyncEvent> {
    tokio::time::timeout(Duration::from_secs(300), async {
        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.unwrap();
            let finished = done(&event);
            seen.push(event);
            if finished {
                return seen;
            }
        }
    })
    .await
    .unwrap()
}

fn is_state(event: &SyncEvent, wanted: ListenerState) -> bool {
    matches!(event, SyncEvent::ListenerStateChanged { state, .. } if *state == wanted)
}

fn states(events: &[SyncEvent]) -> Vec<ListenerState> {
    events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::ListenerStateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}

fn fast_backoff(max_attempts: Option<u32>) -> SyncConfig {
    SyncConfig {
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts,
        },
        ..SyncConfig::default()
    }
}

// ============================================================================
// Connect and Reconcile
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_first_connect_reconciles_once() {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.insert_notification(Notification::new(
        user(),
        NotificationKind::System,
        "Welcome to campus",
    ));
    let (session, mut events) = start(&gateway, SyncConfig::default()).await;

    let seen = collect_until(&mut events, |e| matches!(e, SyncEvent::Reconciled { .. })).await;

    assert_eq!(
        states(&seen),
        vec![ListenerState::Connecting, ListenerState::Active]
    );
    assert_eq!(gateway.call_count(GatewayOp::FetchNotifications), 1);
    assert_eq!(session.unread_count(), 1);
    assert_eq!(session.listener_state(), ListenerState::Active);
    session.sign_out().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_issues_exactly_one_refetch() {
    let _ = tracing_subscriber::fmt::try_init();
    let gateway = Arc::new(MemoryGateway::new());
    let (session, mut events) = start(&gateway, fast_backoff(None)).await;
    collect_until(&mut events, |e| matches!(e, SyncEvent::Reconciled { .. })).await;

    // Inserted while the transport is down, so only the refetch can see it
    assert_eq!(gateway.drop_streams(&user()), 1);
    let missed = Notification::new(user(), NotificationKind::Reminder, "Room change");
    gateway.insert_notification(missed.clone());

    let seen = collect_until(&mut events, |e| matches!(e, SyncEvent::Reconciled { .. })).await;

    assert_eq!(
        states(&seen),
        vec![
            ListenerState::Reconnecting { attempt: 1 },
            ListenerState::Active
        ]
    );
    assert_eq!(gateway.call_count(GatewayOp::FetchNotifications), 2);
    assert_eq!(gateway.call_count(GatewayOp::SubscribeInserts), 2);
    let snapshot = session.notifications().unwrap();
    assert!(snapshot.value.as_notifications().unwrap().contains(&missed.id));
    session.sign_out().await;
}

/// Rows pushed during the reconciling refetch are folded after it, as duplicates
#[tokio::test(start_paused = true)]
async fn test_buffered_events_fold_after_reconcile() {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.set_latency(GatewayOp::FetchNotifications, Duration::from_millis(500));
    let (session, mut events) = start(&gateway, SyncConfig::default()).await;
    collect_until(&mut events, |e| is_state(e, ListenerState::Active)).await;

    let pushed = Notification::new(user(), NotificationKind::Reminder, "Lab safety briefing");
    gateway.insert_notification(pushed.clone());

    let seen = collect_until(&mut events, |e| {
        matches!(e, SyncEvent::NotificationFolded { .. })
    })
    .await;

    let reconciled_at = seen
        .iter()
        .position(|e| matches!(e, SyncEvent::Reconciled { .. }))
        .unwrap();
    assert_eq!(reconciled_at, seen.len() - 2);
    assert!(matches!(
        seen.last().unwrap(),
        SyncEvent::NotificationFolded { duplicate: true, unread_count: 1, .. }
    ));
    assert_eq!(session.notifications().unwrap().value.len(), 1);
    session.sign_out().await;
}

// ============================================================================
// Folding Pushed Rows
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_urgent_publish_folds_and_marks_lists_stale() {
    let gateway = Arc::new(MemoryGateway::new());
    let (session, mut events) = start(&gateway, SyncConfig::default()).await;
    collect_until(&mut events, |e| matches!(e, SyncEvent::Reconciled { .. })).await;
    let urgent_filter = AnnouncementFilter::default().category(Category::Urgent);
    session
        .refresh_announcements(urgent_filter.clone())
        .await
        .unwrap();

    let announcement = Announcement::new("Campus closed", Category::Urgent, "Admin", UserId::new())
        .with_priority(Priority::Urgent);
    gateway.publish_announcement(announcement, &[user()]);

    collect_until(&mut events, |e| matches!(e, SyncEvent::NotificationFolded { .. })).await;

    let notifications = session.notifications().unwrap();
    let row = &notifications.value.as_notifications().unwrap().items()[0];
    assert_eq!(row.kind, NotificationKind::System);
    assert!(row.message.starts_with("New urgent announcement"));
    assert!(session.announcements(&urgent_filter).unwrap().stale);
    session.sign_out().await;
}

#[tokio::test(start_paused = true)]
async fn test_redelivery_is_dropped() {
    let gateway = Arc::new(MemoryGateway::new());
    let (session, mut events) = start(&gateway, SyncConfig::default()).await;
    collect_until(&mut events, |e| matches!(e, SyncEvent::Reconciled { .. })).await;
    let mut watch = session.watch_notifications();

    let row = Notification::new(user(), NotificationKind::Announcement, "Club fair Friday");
    gateway.insert_notification(row.clone());
    gateway.redeliver(&row);
    gateway.redeliver(&row);

    let mut duplicates = 0;
    for _ in 0..3 {
        let seen = collect_until(&mut events, |e| {
            matches!(e, SyncEvent::NotificationFolded { .. })
        })
        .await;
        if let Some(SyncEvent::NotificationFolded { duplicate: true, .. }) = seen.last() {
            duplicates += 1;
        }
    }

    assert_eq!(duplicates, 2);
    assert_eq!(session.unread_count(), 1);
    // Only the first delivery wrote to the cache
    assert!(watch.try_recv().is_some());
    assert!(watch.try_recv().is_none());
    session.sign_out().await;
}

#[tokio::test(start_paused = true)]
async fn test_folded_list_respects_limit() {
    let gateway = Arc::new(MemoryGateway::new());
    let config = SyncConfig {
        notification_limit: 3,
        ..SyncConfig::default()
    };
    let (session, mut events) = start(&gateway, config).await;
    collect_until(&mut events, |e| matches!(e, SyncEvent::Reconciled { .. })).await;

    for i in 0..5 {
        let mut row =
            Notification::new(user(), NotificationKind::Reminder, format!("Reminder {}", i));
        row.created_at = 1_700_000_000_000 + i;
        gateway.insert_notification(row);
        collect_until(&mut events, |e| matches!(e, SyncEvent::NotificationFolded { .. })).await;
    }

    let snapshot = session.notifications().unwrap();
    let list = snapshot.value.as_notifications().unwrap();
    assert_eq!(list.len(), 3);
    assert_eq!(list.items()[0].message, "Reminder 4");
    session.sign_out().await;
}

// ============================================================================
// Backoff and Terminal States
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_subscribes_count_attempts() {
    let gateway = Arc::new(MemoryGateway::new());
    for _ in 0..2 {
        gateway.fail_next(
            GatewayOp::SubscribeInserts,
            GatewayError::Transport("no route".into()),
        );
    }
    let (session, mut events) = start(&gateway, fast_backoff(None)).await;

    let seen = collect_until(&mut events, |e| is_state(e, ListenerState::Active)).await;

    assert_eq!(
        states(&seen),
        vec![
            ListenerState::Connecting,
            ListenerState::Reconnecting { attempt: 1 },
            ListenerState::Reconnecting { attempt: 2 },
            ListenerState::Active,
        ]
    );
    session.sign_out().await;
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_grow() {
    let gateway = Arc::new(MemoryGateway::new());
    for _ in 0..3 {
        gateway.fail_next(
            GatewayOp::SubscribeInserts,
            GatewayError::Transport("no route".into()),
        );
    }
    let started = tokio::time::Instant::now();
    let (session, mut events) = start(&gateway, fast_backoff(None)).await;

    collect_until(&mut events, |e| is_state(e, ListenerState::Active)).await;

    // 100ms + 200ms + 400ms with jitter disabled
    assert!(started.elapsed() >= Duration::from_millis(700));
    session.sign_out().await;
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_attempts() {
    let _ = tracing_subscriber::fmt::try_init();
    let gateway = Arc::new(MemoryGateway::new());
    for _ in 0..10 {
        gateway.fail_next(
            GatewayOp::SubscribeInserts,
            GatewayError::Transport("no route".into()),
        );
    }
    let (session, mut events) = start(&gateway, fast_backoff(Some(2))).await;

    let seen = collect_until(&mut events, |e| is_state(e, ListenerState::Disconnected)).await;

    assert_eq!(
        states(&seen).last(),
        Some(&ListenerState::Disconnected)
    );
    assert_eq!(gateway.call_count(GatewayOp::SubscribeInserts), 3);
    session.sign_out().await;
}

#[tokio::test(start_paused = true)]
async fn test_revoked_session_during_reconnect_is_terminal() {
    let gateway = Arc::new(MemoryGateway::new());
    let (session, mut events) = start(&gateway, fast_backoff(None)).await;
    collect_until(&mut events, |e| matches!(e, SyncEvent::Reconciled { .. })).await;

    gateway.revoke_session();
    gateway.drop_streams(&user());

    let seen = collect_until(&mut events, |e| is_state(e, ListenerState::Disconnected)).await;

    assert!(seen
        .iter()
        .any(|e| matches!(e, SyncEvent::SessionExpired { .. })));
    assert_eq!(session.listener_state(), ListenerState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconcile_marks_entry_stale() {
    let gateway = Arc::new(MemoryGateway::new());
    let (session, mut events) = start(&gateway, fast_backoff(None)).await;
    collect_until(&mut events, |e| matches!(e, SyncEvent::Reconciled { .. })).await;

    gateway.fail_next(
        GatewayOp::FetchNotifications,
        GatewayError::Transport("flaky".into()),
    );
    gateway.drop_streams(&user());

    collect_until(&mut events, |e| matches!(e, SyncEvent::ReconcileFailed { .. })).await;

    let snapshot = session
        .cache()
        .get(&CacheKey::Notifications(user()))
        .unwrap();
    assert!(snapshot.stale);
    assert_eq!(session.listener_state(), ListenerState::Active);
    session.sign_out().await;
}

#[tokio::test(start_paused = true)]
async fn test_mark_read_during_reconcile_keeps_fetched_rows() {
    let gateway = Arc::new(MemoryGateway::new());
    let rows: Vec<Notification> = (0..2)
        .map(|i| {
            let row =
                Notification::new(user(), NotificationKind::Reminder, format!("Reminder {}", i));
            gateway.insert_notification(row.clone());
            row
        })
        .collect();
    gateway.set_latency(GatewayOp::FetchNotifications, Duration::from_secs(1));
    let (session, mut events) = start(&gateway, SyncConfig::default()).await;
    collect_until(&mut events, |e| is_state(e, ListenerState::Active)).await;
    // Reconcile has reserved its version and is waiting on the fetch
    tokio::time::sleep(Duration::from_millis(100)).await;

    session.mark_as_read(&rows[0].id).await.unwrap();
    collect_until(&mut events, |e| matches!(e, SyncEvent::Reconciled { .. })).await;

    let snapshot = session.notifications().unwrap();
    let list = snapshot.value.as_notifications().unwrap();
    assert_eq!(list.len(), 2);
    assert!(list.get(&rows[0].id).unwrap().is_read);
    assert!(!list.get(&rows[1].id).unwrap().is_read);
    assert_eq!(session.unread_count(), 1);
    session.sign_out().await;
}

#[tokio::test(start_paused = true)]
async fn test_mark_read_on_unloaded_list_leaves_entry_stale() {
    let gateway = Arc::new(MemoryGateway::new());
    let row = Notification::new(user(), NotificationKind::Reminder, "Reminder");
    gateway.insert_notification(row.clone());
    gateway.set_latency(GatewayOp::FetchNotifications, Duration::from_secs(1));
    gateway.fail_next(
        GatewayOp::FetchNotifications,
        GatewayError::Transport("flaky".into()),
    );
    let (session, mut events) = start(&gateway, SyncConfig::default()).await;
    collect_until(&mut events, |e| is_state(e, ListenerState::Active)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    session.mark_as_read(&row.id).await.unwrap();
    collect_until(&mut events, |e| matches!(e, SyncEvent::ReconcileFailed { .. })).await;

    // Only the edit's placeholder is cached, so readers must refetch
    let snapshot = session.notifications().unwrap();
    assert!(snapshot.stale);
    assert!(snapshot.value.is_empty());
    assert!(gateway.notification(&row.id).unwrap().is_read);
    session.sign_out().await;
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_closes_stream() {
    let gateway = Arc::new(MemoryGateway::new());
    let (session, mut events) = start(&gateway, SyncConfig::default()).await;
    collect_until(&mut events, |e| matches!(e, SyncEvent::Reconciled { .. })).await;
    assert_eq!(gateway.stream_count(&user()), 1);

    session.sign_out().await;

    assert_eq!(gateway.stream_count(&user()), 0);
}
