//! In-process realtime transport over `tokio::sync::broadcast`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::realtime::{ChannelConfig, ChannelEvent, RealtimeChannel, RealtimeTransport};
use crate::error::{Error, Result};
use crate::models::PresenceState;

const TOPIC_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Envelope {
    /// Subscriber that broadcast the event; it is not echoed back to them
    origin: Option<u64>,
    event: ChannelEvent,
}

struct Topic {
    sender: broadcast::Sender<Envelope>,
    presence: HashMap<String, PresenceState>,
}

impl Topic {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            sender,
            presence: HashMap::new(),
        }
    }

    fn emit(&self, origin: Option<u64>, event: ChannelEvent) {
        // no receivers is fine
        let _ = self.sender.send(Envelope { origin, event });
    }
}

#[derive(Default)]
struct HubInner {
    topics: Mutex<HashMap<String, Topic>>,
    next_subscriber: AtomicU64,
    failing: AtomicBool,
    subscribe_attempts: AtomicUsize,
    track_counts: Mutex<HashMap<(String, String), usize>>,
}

/// Realtime hub shared by every client in the process.
///
/// Presence is kept per topic and every change is fanned out as a join or
/// leave followed by a full sync, the way hosted presence services behave.
/// Row inserts are published by the store that owns the table.
#[derive(Clone, Default)]
pub struct LocalRealtimeHub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for LocalRealtimeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics: Vec<String> = lock(&self.inner.topics).keys().cloned().collect();
        f.debug_struct("LocalRealtimeHub")
            .field("topics", &topics)
            .finish_non_exhaustive()
    }
}

impl LocalRealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a row insert to `topic`'s subscribers whose filter matches.
    pub fn publish_row(&self, topic: &str, table: &str, row: Value) {
        self.inject(
            topic,
            ChannelEvent::RowInserted {
                table: table.to_string(),
                row,
            },
        );
    }

    /// Deliver an arbitrary event to every subscriber of `topic`
    pub fn inject(&self, topic: &str, event: ChannelEvent) {
        if let Some(topic) = lock(&self.inner.topics).get(topic) {
            topic.emit(None, event);
        }
    }

    /// Refuse new subscriptions
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    pub fn subscribe_attempts(&self) -> usize {
        self.inner.subscribe_attempts.load(Ordering::SeqCst)
    }

    /// Presence publishes by `key` on `topic`
    pub fn track_count(&self, topic: &str, key: &str) -> usize {
        lock(&self.inner.track_counts)
            .get(&(topic.to_string(), key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn presence(&self, topic: &str) -> HashMap<String, PresenceState> {
        lock(&self.inner.topics)
            .get(topic)
            .map(|topic| topic.presence.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RealtimeTransport for LocalRealtimeHub {
    async fn subscribe(&self, config: ChannelConfig) -> Result<Arc<dyn RealtimeChannel>> {
        self.inner.subscribe_attempts.fetch_add(1, Ordering::SeqCst);
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(Error::Realtime(format!(
                "subscription to {} refused",
                config.topic
            )));
        }

        let receiver = lock(&self.inner.topics)
            .entry(config.topic.clone())
            .or_insert_with(Topic::new)
            .sender
            .subscribe();
        let subscriber = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Subscriber {subscriber} joined {}", config.topic);

        Ok(Arc::new(LocalChannel {
            hub: self.clone(),
            config,
            subscriber,
            receiver: tokio::sync::Mutex::new(receiver),
            closed: AtomicBool::new(false),
        }))
    }
}

struct LocalChannel {
    hub: LocalRealtimeHub,
    config: ChannelConfig,
    subscriber: u64,
    receiver: tokio::sync::Mutex<broadcast::Receiver<Envelope>>,
    closed: AtomicBool,
}

impl LocalChannel {
    fn with_topic<R>(&self, apply: impl FnOnce(&mut Topic) -> R) -> Result<R> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Realtime(format!("{} is closed", self.config.topic)));
        }
        let mut topics = lock(&self.hub.inner.topics);
        let topic = topics
            .get_mut(&self.config.topic)
            .ok_or_else(|| Error::Realtime(format!("{} does not exist", self.config.topic)))?;
        Ok(apply(topic))
    }

    fn accepts(&self, envelope: &Envelope) -> bool {
        match &envelope.event {
            ChannelEvent::Broadcast { .. } => envelope.origin != Some(self.subscriber),
            ChannelEvent::RowInserted { table, row } => {
                *table == self.config.table && matches_filter(&self.config.filter, row)
            }
            _ => true,
        }
    }
}

#[async_trait]
impl RealtimeChannel for LocalChannel {
    fn topic(&self) -> &str {
        &self.config.topic
    }

    async fn track(&self, state: &PresenceState) -> Result<()> {
        self.with_topic(|topic| {
            topic
                .presence
                .insert(self.config.presence_key.clone(), state.clone());
            topic.emit(None, ChannelEvent::PresenceJoin(state.clone()));
            topic.emit(None, ChannelEvent::PresenceSync(topic.presence.clone()));
        })?;
        *lock(&self.hub.inner.track_counts)
            .entry((self.config.topic.clone(), self.config.presence_key.clone()))
            .or_default() += 1;
        Ok(())
    }

    async fn send(&self, event: &str, payload: Value) -> Result<()> {
        self.with_topic(|topic| {
            topic.emit(
                Some(self.subscriber),
                ChannelEvent::Broadcast {
                    event: event.to_string(),
                    payload,
                },
            );
        })
    }

    async fn next_event(&self) -> Option<ChannelEvent> {
        let mut receiver = self.receiver.lock().await;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            match receiver.recv().await {
                Ok(envelope) if self.accepts(&envelope) => return Some(envelope.event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "Subscriber {} on {} lagged by {skipped} event(s)",
                        self.subscriber,
                        self.config.topic
                    );
                }
                Err(RecvError::Closed) => {
                    self.closed.store(true, Ordering::SeqCst);
                    return None;
                }
            }
        }
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.with_topic(|topic| {
            if let Some(mut left) = topic.presence.remove(&self.config.presence_key) {
                left.online = false;
                topic.emit(None, ChannelEvent::PresenceLeave(left));
                topic.emit(None, ChannelEvent::PresenceSync(topic.presence.clone()));
            }
        })?;
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!(
            "Subscriber {} left {}",
            self.subscriber,
            self.config.topic
        );
        Ok(())
    }
}

/// `column=eq.value` filters; an empty filter matches everything.
fn matches_filter(filter: &str, row: &Value) -> bool {
    if filter.is_empty() {
        return true;
    }
    let Some((column, expected)) = filter
        .split_once('=')
        .and_then(|(column, rest)| rest.strip_prefix("eq.").map(|value| (column, value)))
    else {
        return false;
    };
    match row.get(column) {
        Some(Value::String(value)) => value == expected,
        Some(other) => other.to_string() == expected,
        None => false,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
