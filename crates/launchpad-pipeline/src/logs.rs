//! Build log relay.
//!
//! A log stream is the merge of two sources keyed by entry id: the settled
//! history from the log index, fetched once, and the live per-build topic.
//! History always wins; a live entry only replaces an earlier live copy.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use launchpad_core::BuildId;
use launchpad_core::logs::{LogEntry, LogOrigin};
use launchpad_db::LogRepo;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const TOPIC_CAPACITY: usize = 1024;

/// Per-build live log topics.
#[derive(Clone, Default)]
pub struct LogBroker {
    topics: Arc<Mutex<HashMap<BuildId, broadcast::Sender<LogEntry>>>>,
}

impl LogBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<BuildId, broadcast::Sender<LogEntry>>> {
        self.topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish an entry to its build's topic, returning how many subscribers
    /// received it. Topics nobody listens to are dropped.
    pub fn publish(&self, entry: LogEntry) -> usize {
        let mut topics = self.lock();
        let build_id = entry.build_id;
        let Some(tx) = topics.get(&build_id) else {
            return 0;
        };
        match tx.send(entry) {
            Ok(received) => received,
            Err(_) => {
                topics.remove(&build_id);
                0
            }
        }
    }

    /// Listen on a build's topic. The topic is removed once its last
    /// subscription is dropped.
    pub fn subscribe(&self, build_id: BuildId) -> LogSubscription {
        let receiver = self
            .lock()
            .entry(build_id)
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();
        LogSubscription {
            live: BroadcastStream::new(receiver),
            _topic: TopicGuard {
                broker: self.clone(),
                build_id,
            },
        }
    }

    fn release(&self, build_id: BuildId) {
        let mut topics = self.lock();
        if topics
            .get(&build_id)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            topics.remove(&build_id);
        }
    }
}

/// Live entries of one build's topic.
pub struct LogSubscription {
    // Dropped before the guard so the receiver count is already down.
    live: BroadcastStream<LogEntry>,
    _topic: TopicGuard,
}

impl Stream for LogSubscription {
    type Item = Result<LogEntry, BroadcastStreamRecvError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.live).poll_next(cx)
    }
}

struct TopicGuard {
    broker: LogBroker,
    build_id: BuildId,
}

impl Drop for TopicGuard {
    fn drop(&mut self) {
        self.broker.release(self.build_id);
    }
}

/// Ordered, de-duplicated view of a build's log.
#[derive(Debug, Clone, Default)]
pub struct LogView {
    entries: Vec<LogEntry>,
}

impl LogView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one entry, returning its position afterwards, or `None` if the
    /// entry was ignored because a history copy already holds its id.
    pub fn upsert(&mut self, entry: LogEntry) -> Option<usize> {
        let id = entry.id.clone();
        match self.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => {
                if entry.origin == LogOrigin::Live && existing.origin == LogOrigin::History {
                    return None;
                }
                *existing = entry;
            }
            None => self.entries.push(entry),
        }
        self.entries.sort_by(compare_entries);
        self.entries.iter().position(|e| e.id == id)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ascending by timestamp, untimestamped entries last, ties broken by id.
fn compare_entries(a: &LogEntry, b: &LogEntry) -> Ordering {
    let by_time = match (a.timestamp, b.timestamp) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_time.then_with(|| a.id.cmp(&b.id))
}

/// A frame pushed to a log stream client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogFrame {
    /// The full merged view, sent once when the stream opens.
    Snapshot { entries: Vec<LogEntry> },
    /// One entry was inserted or replaced at `position`.
    Upsert { entry: LogEntry, position: usize },
}

/// Serves merged build logs and accepts worker log batches.
#[derive(Clone)]
pub struct LogStreamRelay {
    logs: Arc<dyn LogRepo>,
    broker: LogBroker,
    shutdown: CancellationToken,
}

impl LogStreamRelay {
    pub fn new(logs: Arc<dyn LogRepo>, broker: LogBroker, shutdown: CancellationToken) -> Self {
        Self {
            logs,
            broker,
            shutdown,
        }
    }

    /// Store a batch from the worker and publish it live.
    ///
    /// A failing log index does not stop live delivery.
    pub async fn ingest(&self, entries: Vec<LogEntry>) {
        let Some(first) = entries.first() else {
            return;
        };
        let build_id = first.build_id;

        if let Err(e) = self.logs.append(&entries).await {
            warn!(build_id = %build_id, error = %e, "Failed to store log entries");
        }

        let mut delivered = 0;
        for entry in entries {
            delivered += self.broker.publish(LogEntry {
                origin: LogOrigin::Live,
                ..entry
            });
        }
        debug!(build_id = %build_id, delivered, "Relayed log entries");
    }

    /// Stream a build's merged log.
    ///
    /// The first frame is a snapshot of the stored history. Every later
    /// frame is an upsert, including live entries that arrived while the
    /// history was being fetched. The stream only ends when `cancel` or
    /// shutdown fires.
    pub fn stream(
        &self,
        build_id: BuildId,
        cancel: CancellationToken,
    ) -> impl Stream<Item = LogFrame> + Send + 'static + use<> {
        // Subscribe before fetching history so nothing falls in between.
        let mut live = self.broker.subscribe(build_id);
        let logs = self.logs.clone();
        let shutdown = self.shutdown.clone();

        async_stream::stream! {
            let history = match logs.history(build_id).await {
                Ok(history) => history,
                Err(e) => {
                    warn!(build_id = %build_id, error = %e, "Log history unavailable, streaming live only");
                    Vec::new()
                }
            };

            let mut view = LogView::new();
            for entry in history {
                view.upsert(LogEntry { origin: LogOrigin::History, ..entry });
            }
            yield LogFrame::Snapshot { entries: view.entries().to_vec() };

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = shutdown.cancelled() => break,
                    item = live.next() => match item {
                        Some(Ok(entry)) => {
                            let entry = LogEntry { origin: LogOrigin::Live, ..entry };
                            if let Some(position) = view.upsert(entry.clone()) {
                                yield LogFrame::Upsert { entry, position };
                            }
                        }
                        Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                            warn!(build_id = %build_id, skipped, "Log subscriber lagged");
                        }
                        None => {
                            tokio::select! {
                                _ = cancel.cancelled() => {}
                                _ = shutdown.cancelled() => {}
                            }
                            break;
                        }
                    },
                }
            }
        }
    }
}
