//! Live status fan-out and the durable routing-cache refresh.
//!
//! Every subscriber gets its own unbounded channel. Publishing walks the
//! app's subscribers once and drops any whose receiving side has gone away,
//! so a subscriber that disconnects without unsubscribing is reclaimed on the
//! next publish at the latest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::Stream;
use launchpad_core::queue::WorkQueue;
use launchpad_core::status::StatusEvent;
use launchpad_core::{AppId, DeploymentId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Subscribers = HashMap<AppId, HashMap<u64, mpsc::UnboundedSender<StatusEvent>>>;

struct Inner {
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, app_id: AppId, id: u64) {
        let mut subscribers = self.lock();
        if let Some(app) = subscribers.get_mut(&app_id) {
            app.remove(&id);
            if app.is_empty() {
                subscribers.remove(&app_id);
            }
        }
    }
}

/// Broadcasts status events to everyone watching an app.
///
/// Delivery is at most once per subscriber and there is no replay: a
/// subscriber only sees events published after it subscribed.
#[derive(Clone)]
pub struct StatusPublisher {
    inner: Arc<Inner>,
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl StatusPublisher {
    /// `shutdown` ends every open subscription when cancelled.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    /// Send an event to the app's current subscribers, returning how many
    /// received it.
    pub fn publish(&self, event: StatusEvent) -> usize {
        let app_id = event.app_id;
        let mut subscribers = self.inner.lock();
        let Some(app) = subscribers.get_mut(&app_id) else {
            return 0;
        };

        app.retain(|_, tx| tx.send(event.clone()).is_ok());
        let delivered = app.len();
        if app.is_empty() {
            subscribers.remove(&app_id);
        }
        debug!(app_id = %app_id, delivered, "Published status event");
        delivered
    }

    /// Watch an app's status events.
    ///
    /// The stream never ends on its own; it finishes when `cancel` or the
    /// publisher's shutdown token fires. Dropping the stream unsubscribes.
    pub fn subscribe(
        &self,
        app_id: AppId,
        cancel: CancellationToken,
    ) -> impl Stream<Item = StatusEvent> + Send + 'static + use<> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().entry(app_id).or_default().insert(id, tx);

        let guard = Subscription {
            inner: self.inner.clone(),
            app_id,
            id,
        };
        let shutdown = self.inner.shutdown.clone();

        async_stream::stream! {
            let _guard = guard;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => yield event,
                        None => break,
                    },
                }
            }
        }
    }

    /// Number of open subscriptions for an app.
    pub fn subscriber_count(&self, app_id: AppId) -> usize {
        self.inner.lock().get(&app_id).map_or(0, HashMap::len)
    }

    /// End every open subscription.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

/// Removes its subscriber entry when the owning stream is dropped.
struct Subscription {
    inner: Arc<Inner>,
    app_id: AppId,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.remove(self.app_id, self.id);
    }
}

/// Message asking the edge to reload an app's routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingCacheInvalidation {
    pub app_id: AppId,
    pub deployment_id: DeploymentId,
    pub requested_at: DateTime<Utc>,
}

/// Publishes routing-cache invalidations on their own durable topic.
#[derive(Clone)]
pub struct RoutingCacheRefresher {
    queue: Arc<dyn WorkQueue>,
    topic: String,
}

impl RoutingCacheRefresher {
    pub fn new(queue: Arc<dyn WorkQueue>, topic: impl Into<String>) -> Self {
        Self {
            queue,
            topic: topic.into(),
        }
    }

    /// Request a refresh. Failure is logged and otherwise ignored; the
    /// activation it follows has already committed.
    pub async fn refresh(&self, app_id: AppId, deployment_id: DeploymentId) {
        let message = RoutingCacheInvalidation {
            app_id,
            deployment_id,
            requested_at: Utc::now(),
        };
        let payload = match serde_json::to_value(&message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(app_id = %app_id, error = %e, "Failed to encode routing refresh");
                return;
            }
        };

        if let Err(e) = self.queue.publish(&self.topic, payload).await {
            warn!(
                app_id = %app_id,
                deployment_id = %deployment_id,
                error = %e,
                "Failed to publish routing cache refresh"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use launchpad_core::BuildId;
    use launchpad_core::build::BuildStatus;
    use launchpad_core::status::StatusSubject;
    use launchpad_db::MemoryQueue;
    use std::pin::pin;
    use std::time::Duration;

    fn build_event(app_id: AppId, status: BuildStatus) -> StatusEvent {
        StatusEvent {
            app_id,
            subject: StatusSubject::Build {
                build_id: BuildId::new(),
                status,
            },
            message: None,
            at: Utc::now(),
        }
    }

    fn status_of(event: &StatusEvent) -> BuildStatus {
        match &event.subject {
            StatusSubject::Build { status, .. } => *status,
            other => panic!("unexpected subject {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fan_out_in_publish_order() {
        let publisher = StatusPublisher::default();
        let app = AppId::new();
        let mut a = pin!(publisher.subscribe(app, CancellationToken::new()));
        let mut b = pin!(publisher.subscribe(app, CancellationToken::new()));
        assert_eq!(publisher.subscriber_count(app), 2);

        assert_eq!(publisher.publish(build_event(app, BuildStatus::Queued)), 2);
        assert_eq!(publisher.publish(build_event(app, BuildStatus::Running)), 2);

        for sub in [&mut a, &mut b] {
            assert_eq!(status_of(&sub.next().await.unwrap()), BuildStatus::Queued);
            assert_eq!(status_of(&sub.next().await.unwrap()), BuildStatus::Running);
        }
    }

    #[tokio::test]
    async fn test_other_apps_and_late_subscribers_see_nothing() {
        let publisher = StatusPublisher::default();
        let app = AppId::new();
        let other = AppId::new();
        let mut watcher = pin!(publisher.subscribe(other, CancellationToken::new()));

        assert_eq!(publisher.publish(build_event(app, BuildStatus::Queued)), 0);

        let mut late = pin!(publisher.subscribe(app, CancellationToken::new()));
        let waited = tokio::time::timeout(Duration::from_millis(50), late.next()).await;
        assert!(waited.is_err());
        let waited = tokio::time::timeout(Duration::from_millis(50), watcher.next()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_cancel_ends_stream_and_releases_subscription() {
        let publisher = StatusPublisher::default();
        let app = AppId::new();
        let cancel = CancellationToken::new();
        let stream = publisher.subscribe(app, cancel.clone());
        let mut stream = Box::pin(stream);
        assert_eq!(publisher.subscriber_count(app), 1);

        cancel.cancel();
        assert!(stream.next().await.is_none());
        drop(stream);
        assert_eq!(publisher.subscriber_count(app), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let publisher = StatusPublisher::default();
        let app = AppId::new();
        let stream = publisher.subscribe(app, CancellationToken::new());
        let _kept = publisher.subscribe(app, CancellationToken::new());
        drop(stream);

        assert_eq!(publisher.subscriber_count(app), 1);
        assert_eq!(publisher.publish(build_event(app, BuildStatus::Queued)), 1);
    }

    #[tokio::test]
    async fn test_shutdown_ends_all_streams() {
        let publisher = StatusPublisher::default();
        let app = AppId::new();
        let mut stream = Box::pin(publisher.subscribe(app, CancellationToken::new()));

        publisher.shutdown();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_routing_refresh_uses_its_own_topic() {
        let queue = MemoryQueue::new();
        let refresher = RoutingCacheRefresher::new(Arc::new(queue.clone()), "routing-cache");
        let app = AppId::new();
        let deployment = DeploymentId::new();

        refresher.refresh(app, deployment).await;

        let pending = queue.pending("routing-cache").await;
        assert_eq!(pending.len(), 1);
        let message: RoutingCacheInvalidation =
            serde_json::from_value(pending[0].payload.clone()).unwrap();
        assert_eq!(message.app_id, app);
        assert_eq!(message.deployment_id, deployment);
        assert!(queue.pending("builds").await.is_empty());
    }
}
