//! Push-channel seam and the adapter that folds channel events into
//! [`CollabState`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior};

use super::state::CollabState;
use crate::error::{Error, Result};
use crate::models::{LiveStroke, PeerCursor, PresenceState};
use crate::telemetry::{context, Telemetry};
use crate::util::ScopedTask;

/// Table whose inserts are pushed to session channels
pub const LIVE_STROKES_TABLE: &str = "live_strokes";
/// Broadcast event carrying a [`PeerCursor`]
pub const CURSOR_EVENT: &str = "cursor";
/// Presence republish interval
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// A peer silent for three heartbeats is considered gone
pub const PEER_TIMEOUT: Duration = Duration::from_secs(15);

/// Channel name for a collaboration session
pub fn channel_topic(session_id: &str) -> String {
    format!("collab:{session_id}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError(String),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    RowInserted { table: String, row: Value },
    PresenceSync(HashMap<String, PresenceState>),
    PresenceJoin(PresenceState),
    PresenceLeave(PresenceState),
    Broadcast { event: String, payload: Value },
    Status(ChannelStatus),
}

/// What a channel subscription listens to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub topic: String,
    /// Presence is keyed by this (the local user id)
    pub presence_key: String,
    /// Row inserts on this table are delivered...
    pub table: String,
    /// ...when they match this PostgREST-style filter, e.g. `session_id=eq.x`
    pub filter: String,
}

impl ChannelConfig {
    pub fn for_session(session_id: &str, user_id: &str) -> Self {
        Self {
            topic: channel_topic(session_id),
            presence_key: user_id.to_string(),
            table: LIVE_STROKES_TABLE.to_string(),
            filter: format!("session_id=eq.{session_id}"),
        }
    }
}

/// Opens push channels
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn subscribe(&self, config: ChannelConfig) -> Result<Arc<dyn RealtimeChannel>>;
}

/// One subscribed channel
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    fn topic(&self) -> &str;

    /// Publish (or republish) this client's presence
    async fn track(&self, state: &PresenceState) -> Result<()>;

    /// Broadcast to the other subscribers
    async fn send(&self, event: &str, payload: Value) -> Result<()>;

    /// Next inbound event; `None` once the channel is closed
    async fn next_event(&self) -> Option<ChannelEvent>;

    async fn unsubscribe(&self) -> Result<()>;
}

struct ActiveChannel {
    channel: Arc<dyn RealtimeChannel>,
    _heartbeat: ScopedTask,
    _pump: ScopedTask,
}

/// Keeps one session channel alive and mirrors its events into local state.
pub struct RealtimeAdapter {
    transport: Arc<dyn RealtimeTransport>,
    telemetry: Arc<dyn Telemetry>,
    state: Arc<Mutex<CollabState>>,
    active: tokio::sync::Mutex<Option<ActiveChannel>>,
}

impl std::fmt::Debug for RealtimeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeAdapter")
            .field("state", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl RealtimeAdapter {
    pub fn new(transport: Arc<dyn RealtimeTransport>, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            transport,
            telemetry,
            state: Arc::new(Mutex::new(CollabState::new())),
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Subscribe to `session_id`'s channel as `me`, replacing any previous
    /// subscription. Failures are reported and returned; there is no
    /// automatic retry.
    pub async fn subscribe(&self, session_id: &str, me: PresenceState) -> Result<()> {
        self.cleanup().await;

        let config = ChannelConfig::for_session(session_id, &me.user_id);
        let topic = config.topic.clone();
        let channel = match self.transport.subscribe(config).await {
            Ok(channel) => channel,
            Err(error) => {
                tracing::warn!("Failed to subscribe to {topic}: {error}");
                self.telemetry.capture_exception(
                    &error.to_string(),
                    context([("topic", topic), ("operation", "subscribe".to_string())]),
                );
                return Err(error);
            }
        };

        if let Err(error) = channel.track(&me).await {
            tracing::warn!("Initial presence publish on {topic} failed: {error}");
        }

        let heartbeat = {
            let channel = Arc::clone(&channel);
            let mut me = me;
            ScopedTask::spawn(async move {
                let mut ticker =
                    tokio::time::interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    me.last_seen = Utc::now();
                    if let Err(error) = channel.track(&me).await {
                        tracing::debug!("Presence heartbeat failed: {error}");
                    }
                }
            })
        };

        let pump = {
            let channel = Arc::clone(&channel);
            let state = Arc::clone(&self.state);
            let telemetry = Arc::clone(&self.telemetry);
            let session_id = session_id.to_string();
            ScopedTask::spawn(async move {
                while let Some(event) = channel.next_event().await {
                    handle_event(&state, telemetry.as_ref(), &session_id, event);
                }
                tracing::debug!("Channel for {session_id} closed");
            })
        };

        tracing::info!("Subscribed to {topic}");
        *self.active.lock().await = Some(ActiveChannel {
            channel,
            _heartbeat: heartbeat,
            _pump: pump,
        });
        Ok(())
    }

    pub async fn is_subscribed(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Broadcast the local cursor to peers.
    pub async fn send_cursor(&self, cursor: &PeerCursor) -> Result<()> {
        let channel = self
            .active
            .lock()
            .await
            .as_ref()
            .map(|active| Arc::clone(&active.channel))
            .ok_or_else(|| Error::Realtime("no active channel".to_string()))?;
        channel
            .send(CURSOR_EVENT, serde_json::to_value(cursor)?)
            .await
    }

    /// Unsubscribe, stop the heartbeat and reset the local view.
    pub async fn cleanup(&self) {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            if let Err(error) = active.channel.unsubscribe().await {
                tracing::debug!("Unsubscribe from {} failed: {error}", active.channel.topic());
            }
            // dropping `active` aborts the heartbeat and pump tasks
        }
        self.update(CollabState::clear);
    }

    pub fn snapshot(&self) -> CollabState {
        lock(&self.state).clone()
    }

    pub fn update<R>(&self, apply: impl FnOnce(&mut CollabState) -> R) -> R {
        apply(&mut lock(&self.state))
    }
}

fn handle_event(
    state: &Mutex<CollabState>,
    telemetry: &dyn Telemetry,
    session_id: &str,
    event: ChannelEvent,
) {
    match event {
        ChannelEvent::RowInserted { table, row } if table == LIVE_STROKES_TABLE => {
            match serde_json::from_value::<LiveStroke>(row) {
                Ok(stroke) if stroke.session_id == session_id => {
                    lock(state).push_live_stroke(stroke);
                }
                Ok(stroke) => {
                    tracing::debug!("Ignoring live stroke for session {}", stroke.session_id);
                }
                Err(error) => tracing::debug!("Malformed live stroke row: {error}"),
            }
        }
        ChannelEvent::RowInserted { table, .. } => {
            tracing::debug!("Ignoring insert on {table}");
        }
        ChannelEvent::PresenceSync(snapshot) => lock(state).apply_sync(snapshot, Utc::now()),
        ChannelEvent::PresenceJoin(presence) => lock(state).apply_join(presence, Utc::now()),
        ChannelEvent::PresenceLeave(presence) => lock(state).apply_leave(&presence),
        ChannelEvent::Broadcast { event, payload } if event == CURSOR_EVENT => {
            match serde_json::from_value::<PeerCursor>(payload) {
                Ok(cursor) => lock(state).merge_cursor(cursor),
                Err(error) => tracing::debug!("Malformed cursor broadcast: {error}"),
            }
        }
        ChannelEvent::Broadcast { event, .. } => {
            tracing::debug!("Ignoring broadcast '{event}'");
        }
        ChannelEvent::Status(ChannelStatus::ChannelError(message)) => {
            tracing::warn!("Realtime channel error on {session_id}: {message}");
            telemetry.capture_exception(
                &format!("Realtime channel error: {message}"),
                context([("session_id", session_id.to_string())]),
            );
        }
        ChannelEvent::Status(ChannelStatus::TimedOut) => {
            tracing::warn!("Realtime channel for {session_id} timed out");
            telemetry.capture_exception(
                "Realtime channel timed out",
                context([("session_id", session_id.to_string())]),
            );
        }
        ChannelEvent::Status(status) => {
            tracing::debug!("Channel status for {session_id}: {status:?}");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::collab::LocalRealtimeHub;
    use crate::models::{CursorPoint, Role};
    use crate::telemetry::MemoryTelemetry;

    fn me(user_id: &str, role: Role) -> PresenceState {
        PresenceState {
            user_id: user_id.to_string(),
            role,
            online: true,
            last_seen: Utc::now(),
            cursor_position: None,
        }
    }

    fn live_stroke_row(id: &str, session_id: &str) -> Value {
        json!({
            "id": id,
            "session_id": session_id,
            "author_id": "teacher-1",
            "stroke_data": "",
            "color": "#000000",
            "stroke_width": 2.0,
            "line_number": 0,
            "created_at": Utc::now(),
        })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn presence_and_rows_flow_into_state() {
        let hub = LocalRealtimeHub::new();
        let teacher = RealtimeAdapter::new(Arc::new(hub.clone()), Arc::new(MemoryTelemetry::new()));
        let student = RealtimeAdapter::new(Arc::new(hub.clone()), Arc::new(MemoryTelemetry::new()));

        teacher.subscribe("s1", me("teacher-1", Role::Teacher)).await.unwrap();
        student.subscribe("s1", me("student-1", Role::Student)).await.unwrap();
        settle().await;

        let view = teacher.snapshot();
        assert_eq!(view.connected_teacher(), Some("teacher-1"));
        assert_eq!(view.active_students(), ["student-1"]);

        hub.publish_row(&channel_topic("s1"), LIVE_STROKES_TABLE, live_stroke_row("ls1", "s1"));
        hub.publish_row(&channel_topic("s1"), LIVE_STROKES_TABLE, live_stroke_row("ls2", "other"));
        settle().await;
        assert_eq!(student.snapshot().live_stroke_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cursors_reach_peers_only() {
        let hub = LocalRealtimeHub::new();
        let teacher = RealtimeAdapter::new(Arc::new(hub.clone()), Arc::new(MemoryTelemetry::new()));
        let student = RealtimeAdapter::new(Arc::new(hub.clone()), Arc::new(MemoryTelemetry::new()));
        teacher.subscribe("s1", me("teacher-1", Role::Teacher)).await.unwrap();
        student.subscribe("s1", me("student-1", Role::Student)).await.unwrap();

        let cursor = PeerCursor {
            user_id: "teacher-1".to_string(),
            position: CursorPoint { x: 3.0, y: 4.0 },
            timestamp: 1,
        };
        teacher.send_cursor(&cursor).await.unwrap();
        settle().await;

        assert_eq!(student.snapshot().peer_cursors(), [cursor]);
        assert!(teacher.snapshot().peer_cursors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_republishes_presence() {
        let hub = LocalRealtimeHub::new();
        let teacher = RealtimeAdapter::new(Arc::new(hub.clone()), Arc::new(MemoryTelemetry::new()));
        let student = RealtimeAdapter::new(Arc::new(hub.clone()), Arc::new(MemoryTelemetry::new()));
        teacher.subscribe("s1", me("teacher-1", Role::Teacher)).await.unwrap();
        student.subscribe("s1", me("student-1", Role::Student)).await.unwrap();
        settle().await;
        let first_seen = student.snapshot().presence()["teacher-1"].last_seen;

        tokio::time::sleep(HEARTBEAT_INTERVAL * 2).await;
        settle().await;
        let later_seen = student.snapshot().presence()["teacher-1"].last_seen;
        assert!(later_seen >= first_seen);
        assert!(hub.track_count(&channel_topic("s1"), "teacher-1") >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_subscribe_is_reported_not_retried() {
        let hub = LocalRealtimeHub::new();
        hub.set_failing(true);
        let telemetry = MemoryTelemetry::new();
        let adapter = RealtimeAdapter::new(Arc::new(hub.clone()), Arc::new(telemetry.clone()));

        assert!(adapter.subscribe("s1", me("teacher-1", Role::Teacher)).await.is_err());
        assert!(!adapter.is_subscribed().await);
        assert_eq!(telemetry.exceptions().len(), 1);

        tokio::time::sleep(HEARTBEAT_INTERVAL * 4).await;
        assert_eq!(hub.subscribe_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn channel_errors_are_captured() {
        let hub = LocalRealtimeHub::new();
        let telemetry = MemoryTelemetry::new();
        let adapter = RealtimeAdapter::new(Arc::new(hub.clone()), Arc::new(telemetry.clone()));
        adapter.subscribe("s1", me("teacher-1", Role::Teacher)).await.unwrap();

        hub.inject(
            &channel_topic("s1"),
            ChannelEvent::Status(ChannelStatus::ChannelError("socket closed".to_string())),
        );
        hub.inject(&channel_topic("s1"), ChannelEvent::Status(ChannelStatus::TimedOut));
        settle().await;
        assert_eq!(telemetry.exceptions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_stops_heartbeat_and_leaves() {
        let hub = LocalRealtimeHub::new();
        let teacher = RealtimeAdapter::new(Arc::new(hub.clone()), Arc::new(MemoryTelemetry::new()));
        let student = RealtimeAdapter::new(Arc::new(hub.clone()), Arc::new(MemoryTelemetry::new()));
        teacher.subscribe("s1", me("teacher-1", Role::Teacher)).await.unwrap();
        student.subscribe("s1", me("student-1", Role::Student)).await.unwrap();
        settle().await;

        teacher.cleanup().await;
        settle().await;
        assert!(!teacher.is_subscribed().await);
        assert!(teacher.snapshot().presence().is_empty());
        assert_eq!(student.snapshot().connected_teacher(), None);

        let tracks = hub.track_count(&channel_topic("s1"), "teacher-1");
        tokio::time::sleep(HEARTBEAT_INTERVAL * 4).await;
        assert_eq!(hub.track_count(&channel_topic("s1"), "teacher-1"), tracks);
        assert!(teacher.send_cursor(&PeerCursor {
            user_id: "teacher-1".to_string(),
            position: CursorPoint { x: 0.0, y: 0.0 },
            timestamp: 2,
        })
        .await
        .is_err());
    }
}
