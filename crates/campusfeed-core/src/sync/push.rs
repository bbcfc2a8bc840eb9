//! Push Listener: the session's notification-insert subscription
//!
//! ```text
//!                 start()
//! Disconnected ───────────▶ Connecting
//!      ▲                       │ ok            fail
//!      │ stop() / give up      ▼          ┌──────────────┐
//!      └──────────────── Active ◀────────┤ Reconnecting │◀─┐
//!                          │   ok         └──────────────┘  │ fail
//!                          └── transport lost ──────────────┴──┘
//! ```
//!
//! Every transition to `Active` issues exactly one reconciling refetch of the
//! notification collection. Events delivered while that refetch is in flight
//! are buffered by the stream and folded afterwards; duplicates are dropped
//! by id.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::events::{ListenerState, SyncEvent};
use super::refresh::QueryRefresher;
use crate::cache::{CacheKey, CacheStore};
use crate::config::SyncConfig;
use crate::error::{FeedError, GatewayError};
use crate::gateway::{with_timeout, InsertSubscription, RemoteGateway};
use crate::types::{Notification, UserId};

/// Owns the push subscription for one signed-in user
pub struct PushListener {
    user_id: UserId,
    gateway: Arc<dyn RemoteGateway>,
    cache: Arc<CacheStore>,
    config: SyncConfig,
    event_tx: broadcast::Sender<SyncEvent>,
    state: Arc<RwLock<ListenerState>>,
    task: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl PushListener {
    pub fn new(
        user_id: UserId,
        gateway: Arc<dyn RemoteGateway>,
        cache: Arc<CacheStore>,
        config: SyncConfig,
        event_tx: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            user_id,
            gateway,
            cache,
            config,
            event_tx,
            state: Arc::new(RwLock::new(ListenerState::Disconnected)),
            task: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Current listener state
    pub fn state(&self) -> ListenerState {
        *self.state.read()
    }

    /// Whether the background task is still running
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawn the subscription task
    ///
    /// Returns false if the listener was already started or has been
    /// stopped; a session holds at most one subscription.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.is_some() || self.cancel.is_cancelled() {
            debug!(user_id = %self.user_id, "Push listener already started");
            return false;
        }

        let worker = Worker {
            user_id: self.user_id.clone(),
            gateway: self.gateway.clone(),
            cache: self.cache.clone(),
            refresher: QueryRefresher::new(
                self.gateway.clone(),
                self.cache.clone(),
                self.config.clone(),
            ),
            config: self.config.clone(),
            event_tx: self.event_tx.clone(),
            state: self.state.clone(),
            cancel: self.cancel.clone(),
        };
        *task = Some(tokio::spawn(worker.run()));
        info!(user_id = %self.user_id, "Push listener started");
        true
    }

    /// Tear down the subscription and wait for the task to exit
    ///
    /// The listener ends `Disconnected` and cannot be restarted.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(user_id = %self.user_id, error = %e, "Push listener task failed");
            }
        }
        *self.state.write() = ListenerState::Disconnected;
        info!(user_id = %self.user_id, "Push listener stopped");
    }
}

impl Drop for PushListener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Why an active subscription ended
enum Ended {
    TransportLost,
    Cancelled,
    SessionExpired,
}

struct Worker {
    user_id: UserId,
    gateway: Arc<dyn RemoteGateway>,
    cache: Arc<CacheStore>,
    refresher: QueryRefresher,
    config: SyncConfig,
    event_tx: broadcast::Sender<SyncEvent>,
    state: Arc<RwLock<ListenerState>>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        let mut backoff = Backoff::new(self.config.backoff.clone());
        self.set_state(ListenerState::Connecting);

        loop {
            let subscribed = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = with_timeout(
                    self.config.request_timeout,
                    self.gateway.subscribe_notification_inserts(&self.user_id),
                ) => result,
            };

            match subscribed {
                Ok(stream) => {
                    backoff.reset();
                    self.set_state(ListenerState::Active);
                    match self.listen(stream).await {
                        Ended::TransportLost => {
                            info!(user_id = %self.user_id, "Push transport lost");
                        }
                        Ended::Cancelled => break,
                        Ended::SessionExpired => {
                            self.expire_session();
                            break;
                        }
                    }
                }
                Err(GatewayError::Unauthorized(message)) => {
                    warn!(user_id = %self.user_id, %message, "Push subscription rejected");
                    self.expire_session();
                    break;
                }
                Err(err) => {
                    warn!(
                        user_id = %self.user_id,
                        error = %err,
                        attempt = backoff.attempt() + 1,
                        "Push subscription failed"
                    );
                }
            }

            let Some(delay) = backoff.next_delay() else {
                warn!(
                    user_id = %self.user_id,
                    attempts = backoff.attempt(),
                    "Giving up on push subscription"
                );
                break;
            };
            self.set_state(ListenerState::Reconnecting {
                attempt: backoff.attempt(),
            });
            debug!(user_id = %self.user_id, ?delay, "Waiting before resubscribing");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ListenerState::Disconnected);
    }

    /// Reconcile, then fold events until the stream closes
    async fn listen(&self, mut stream: InsertSubscription) -> Ended {
        let reconciled = tokio::select! {
            _ = self.cancel.cancelled() => return Ended::Cancelled,
            result = self.reconcile() => result,
        };
        if !reconciled {
            return Ended::SessionExpired;
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ended::Cancelled,
                next = stream.recv() => match next {
                    Some(notification) => self.fold(notification),
                    None => return Ended::TransportLost,
                },
            }
        }
    }

    /// Refetch the notification collection; false if the session expired
    async fn reconcile(&self) -> bool {
        let key = CacheKey::Notifications(self.user_id.clone());
        match self.refresher.refresh_notifications(&self.user_id).await {
            Ok(outcome) => {
                let notifications = self.cache.get(&key).map(|s| s.value.len()).unwrap_or(0);
                debug!(
                    user_id = %self.user_id,
                    ?outcome,
                    notifications,
                    "Notifications reconciled"
                );
                self.emit(SyncEvent::Reconciled {
                    user_id: self.user_id.clone(),
                    notifications,
                });
                true
            }
            Err(FeedError::Unauthorized(_)) => false,
            Err(err) => {
                self.emit(SyncEvent::ReconcileFailed {
                    user_id: self.user_id.clone(),
                    message: err.to_string(),
                });
                true
            }
        }
    }

    fn fold(&self, notification: Notification) {
        if notification.user_id != self.user_id {
            debug!(
                user_id = %self.user_id,
                recipient = %notification.user_id,
                "Ignoring notification for another user"
            );
            return;
        }

        let key = CacheKey::Notifications(self.user_id.clone());
        let notification_id = notification.id.clone();
        let touches_announcement = notification.related_announcement_id.is_some();
        let limit = self.config.notification_limit;

        let version = self.cache.put_with(&key, |value| {
            let Some(list) = value.notifications_mut() else {
                return false;
            };
            if !list.fold_insert(notification) {
                return false;
            }
            list.truncate(limit);
            true
        });
        let duplicate = version.is_none();

        if !duplicate && touches_announcement {
            let marked = self.cache.invalidate_matching(CacheKey::is_announcements);
            debug!(user_id = %self.user_id, marked, "Announcement lists marked stale");
        }

        let unread_count = self
            .cache
            .get(&key)
            .and_then(|s| s.value.as_notifications().map(|list| list.unread_count()))
            .unwrap_or(0);
        debug!(
            user_id = %self.user_id,
            %notification_id,
            duplicate,
            unread_count,
            "Folded pushed notification"
        );
        self.emit(SyncEvent::NotificationFolded {
            user_id: self.user_id.clone(),
            notification_id,
            duplicate,
            unread_count,
        });
    }

    fn set_state(&self, next: ListenerState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            info!(user_id = %self.user_id, from = %previous, to = %next, "Listener state changed");
            self.emit(SyncEvent::ListenerStateChanged {
                user_id: self.user_id.clone(),
                state: next,
            });
        }
    }

    fn expire_session(&self) {
        self.emit(SyncEvent::SessionExpired {
            user_id: self.user_id.clone(),
        });
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }
}
