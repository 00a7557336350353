//! Teacher/student pairing and live collaboration sessions.
//!
//! [`SessionManager`] owns the session slot state machine
//! (disconnected -> connecting -> connected -> disconnected). Pairing links
//! and session records are durable and go through the sync client; live
//! strokes and cursors are ephemeral and are never queued.

mod hub;
mod invite;
mod realtime;
mod state;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};

use crate::auth::Identity;
use crate::codec;
use crate::error::{Error, Result};
use crate::ids;
use crate::models::{
    CollaborationSession, CollaborationStatus, CursorPoint, LinkStatus, LiveStroke, PeerCursor,
    PresenceState, Role, StrokePoint, TeacherStudentLink,
};
use crate::queue::SyncPayload;
use crate::remote::CLAIM_INVITE_CODE_RPC;
use crate::sync::SyncClient;
use crate::telemetry::{context, Telemetry};
use crate::util::{unix_timestamp_millis, ScopedTask};

pub use hub::LocalRealtimeHub;
pub use invite::{generate_code, is_valid_code, normalize_code, INVITE_ALPHABET, INVITE_CODE_LEN};
pub use realtime::{
    channel_topic, ChannelConfig, ChannelEvent, ChannelStatus, RealtimeAdapter, RealtimeChannel,
    RealtimeTransport, CURSOR_EVENT, HEARTBEAT_INTERVAL, LIVE_STROKES_TABLE, PEER_TIMEOUT,
};
pub use state::{CollabState, MAX_LIVE_STROKES, MAX_PEER_CURSORS};

/// Teacher strokes in this color are tagged as annotations
pub const ANNOTATION_COLOR: &str = "#FF3B30";

const LINKS_TABLE: &str = "teacher_student_links";
const SESSIONS_TABLE: &str = "collaboration_sessions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// Outcome of an ephemeral send. Safe to ignore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestEffort {
    Delivered,
    /// Sent but lost; the reason is only logged
    Dropped(String),
    /// Nothing to send to (no connected session)
    Skipped,
}

#[derive(Debug, Clone)]
struct ActiveSession {
    record: CollaborationSession,
    identity: Identity,
    role: Role,
    /// Local clock; `record.started_at` may come from the partner's device
    connected_at: DateTime<Utc>,
}

impl ActiveSession {
    fn partner_id(&self) -> &str {
        match self.role {
            Role::Teacher => &self.record.student_id,
            Role::Student => &self.record.teacher_id,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    links: Vec<TeacherStudentLink>,
    session: Option<ActiveSession>,
}

impl Slot {
    fn remember_link(&mut self, link: TeacherStudentLink) {
        match self.links.iter_mut().find(|held| held.id == link.id) {
            Some(held) => *held = link,
            None => self.links.push(link),
        }
    }
}

pub struct SessionManager {
    sync: Arc<SyncClient>,
    telemetry: Arc<dyn Telemetry>,
    adapter: RealtimeAdapter,
    connection: watch::Sender<ConnectionState>,
    slot: Mutex<Slot>,
    /// Held for the whole of a start or end so the slot moves through one
    /// transition at a time
    lifecycle: Mutex<()>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("connection", &self.connection_state())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(
        sync: Arc<SyncClient>,
        transport: Arc<dyn RealtimeTransport>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            sync,
            adapter: RealtimeAdapter::new(transport, Arc::clone(&telemetry)),
            telemetry,
            connection,
            slot: Mutex::new(Slot::default()),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Receiver notified on every connection state change
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// Create a pending invite as the signed-in teacher.
    ///
    /// Returns the code, or an empty string when the link could not be saved.
    pub async fn generate_invite_code(&self) -> String {
        let identity = match self.foreground_identity().await {
            Ok(identity) => identity,
            Err(error) => {
                tracing::warn!("Cannot create invite code: {error}");
                return String::new();
            }
        };

        let code = generate_code();
        let link = TeacherStudentLink::pending(identity.user_id, code.clone());
        match self
            .sync
            .try_upsert(SyncPayload::TeacherStudentLink(link.clone()))
            .await
        {
            Ok(()) => {
                tracing::info!("Created invite link {}", link.id);
                self.slot.lock().await.remember_link(link);
                code
            }
            Err(error) => {
                tracing::warn!("Failed to save invite link: {error}");
                self.telemetry.capture_exception(
                    &error.to_string(),
                    context([("operation", "generate_invite_code".to_string())]),
                );
                String::new()
            }
        }
    }

    /// Claim `code` as the signed-in student.
    pub async fn accept_invite_code(&self, code: &str) -> Result<TeacherStudentLink> {
        let identity = self.foreground_identity().await?;
        let code = normalize_code(code);
        if !is_valid_code(&code) {
            return Err(Error::InvalidInput(format!(
                "invite codes are {INVITE_CODE_LEN} characters from {}",
                String::from_utf8_lossy(INVITE_ALPHABET)
            )));
        }

        let response = self
            .sync
            .remote()
            .rpc(
                &identity,
                CLAIM_INVITE_CODE_RPC,
                json!({ "invite_code": code }),
            )
            .await?;
        let row = match response {
            Value::Array(rows) => rows.into_iter().next().unwrap_or(Value::Null),
            other => other,
        };
        if row.is_null() {
            return Err(Error::Collaboration(
                "invite code is invalid, expired or already used".to_string(),
            ));
        }

        let link: TeacherStudentLink = serde_json::from_value(row)?;
        tracing::info!("Accepted invite link {}", link.id);
        self.slot.lock().await.remember_link(link.clone());
        Ok(link)
    }

    /// Mark a link revoked. Revoking an already revoked link does nothing.
    pub async fn revoke_link(&self, link_id: &str) -> Result<()> {
        let cached = self.cached_link(link_id).await;
        let link = match cached {
            Some(link) => link,
            None => self
                .load_links()
                .await?
                .into_iter()
                .find(|link| link.id == link_id)
                .ok_or_else(|| Error::NotFound(format!("link {link_id}")))?,
        };
        if link.status == LinkStatus::Revoked {
            return Ok(());
        }

        let mut revoked = link;
        revoked.status = LinkStatus::Revoked;
        revoked.revoked_at = Some(Utc::now());
        self.sync
            .try_upsert(SyncPayload::TeacherStudentLink(revoked.clone()))
            .await?;
        tracing::info!("Revoked link {link_id}");

        let uses_link = {
            let mut slot = self.slot.lock().await;
            slot.remember_link(revoked);
            slot.session
                .as_ref()
                .is_some_and(|active| active.record.link_id == link_id)
        };
        if uses_link {
            self.end_session().await;
        }
        Ok(())
    }

    /// Links where the signed-in user is teacher or student, refreshed from
    /// the remote store.
    pub async fn load_links(&self) -> Result<Vec<TeacherStudentLink>> {
        let identity = self.foreground_identity().await?;
        let remote = self.sync.remote();
        let mut rows = remote
            .select(Some(&identity), LINKS_TABLE, &[("teacher_id", &identity.user_id)])
            .await?;
        rows.extend(
            remote
                .select(Some(&identity), LINKS_TABLE, &[("student_id", &identity.user_id)])
                .await?,
        );

        let mut slot = self.slot.lock().await;
        for row in rows {
            slot.remember_link(serde_json::from_value(row)?);
        }
        Ok(slot.links.clone())
    }

    pub async fn links(&self) -> Vec<TeacherStudentLink> {
        self.slot.lock().await.links.clone()
    }

    /// Open a session with `partner_id` over an active link.
    ///
    /// Overlapping calls are serialized: only the first succeeds and the
    /// rest see the session it opened. An [`Self::end_session`] issued while
    /// connecting waits for the connect and then tears it down.
    pub async fn start_session(&self, partner_id: &str) -> Result<CollaborationSession> {
        let _transition = self.lifecycle.lock().await;
        if self.slot.lock().await.session.is_some() {
            return Err(Error::Collaboration(
                "a collaboration session is already active".to_string(),
            ));
        }

        self.set_connection(ConnectionState::Connecting);
        let active = match self.open_session(partner_id).await {
            Ok(active) => active,
            Err(error) => {
                tracing::warn!("Failed to start session with {partner_id}: {error}");
                self.set_connection(ConnectionState::Disconnected);
                return Err(error);
            }
        };

        let record = active.record.clone();
        let me = PresenceState {
            user_id: active.identity.user_id.clone(),
            role: active.role,
            online: true,
            last_seen: Utc::now(),
            cursor_position: None,
        };
        self.slot.lock().await.session = Some(active);
        self.set_connection(ConnectionState::Connected);
        tracing::info!("Collaboration session {} started", record.id);

        // the adapter reports subscription failures; see `resubscribe`
        let _ = self.adapter.subscribe(&record.id, me).await;
        Ok(record)
    }

    /// Retry the realtime subscription for the connected session.
    pub async fn resubscribe(&self) -> Result<()> {
        let active = self
            .slot
            .lock()
            .await
            .session
            .clone()
            .ok_or_else(|| Error::Collaboration("no active session".to_string()))?;
        let me = PresenceState {
            user_id: active.identity.user_id,
            role: active.role,
            online: true,
            last_seen: Utc::now(),
            cursor_position: None,
        };
        self.adapter.subscribe(&active.record.id, me).await
    }

    /// Close the active session: mark it ended remotely, tear down the channel
    /// and drop every cached live stroke, presence entry and cursor.
    pub async fn end_session(&self) -> Option<CollaborationSession> {
        let _transition = self.lifecycle.lock().await;
        let active = self.slot.lock().await.session.take();
        self.adapter.cleanup().await;

        let ended = match active {
            Some(active) => {
                let mut record = active.record;
                record.status = CollaborationStatus::Ended;
                record.ended_at = Some(Utc::now());
                self.sync.upsert_collaboration_session(&record).await;
                tracing::info!("Collaboration session {} ended", record.id);
                Some(record)
            }
            None => None,
        };

        if self.connection_state() != ConnectionState::Disconnected {
            self.set_connection(ConnectionState::Disconnected);
        }
        ended
    }

    /// Share a stroke with the session. Strokes are encoded here, so a corrupt
    /// stroke is an error; delivery itself is best effort.
    pub async fn broadcast_stroke(
        &self,
        points: &[StrokePoint],
        color: &str,
        stroke_width: f32,
        line_number: u32,
    ) -> Result<BestEffort> {
        let Some(active) = self.slot.lock().await.session.clone() else {
            return Ok(BestEffort::Skipped);
        };

        let encoded = codec::encode(points)?;
        let stroke = LiveStroke {
            id: ids::generate(Some("live")),
            session_id: active.record.id.clone(),
            author_id: active.identity.user_id.clone(),
            stroke_data: serde_json::to_string(&encoded)?,
            color: color.to_string(),
            stroke_width,
            line_number,
            is_annotation: active.role == Role::Teacher
                && color.eq_ignore_ascii_case(ANNOTATION_COLOR),
            created_at: Utc::now(),
        };

        let row = serde_json::to_value(&stroke)?;
        self.adapter.update(|state| state.push_live_stroke(stroke));

        match self
            .sync
            .remote()
            .insert(&active.identity, LIVE_STROKES_TABLE, row)
            .await
        {
            Ok(()) => Ok(BestEffort::Delivered),
            Err(error) => {
                tracing::debug!("Live stroke dropped: {error}");
                Ok(BestEffort::Dropped(error.to_string()))
            }
        }
    }

    /// Share the local cursor position with peers.
    pub async fn update_cursor_position(&self, position: CursorPoint) -> BestEffort {
        let Some(user_id) = self
            .slot
            .lock()
            .await
            .session
            .as_ref()
            .map(|active| active.identity.user_id.clone())
        else {
            return BestEffort::Skipped;
        };

        let cursor = PeerCursor {
            user_id,
            position,
            timestamp: unix_timestamp_millis(),
        };
        match self.adapter.send_cursor(&cursor).await {
            Ok(()) => BestEffort::Delivered,
            Err(error) => {
                tracing::debug!("Cursor update dropped: {error}");
                BestEffort::Dropped(error.to_string())
            }
        }
    }

    /// End the session when the partner has been silent for longer than
    /// [`PEER_TIMEOUT`]. Returns whether a session is still connected.
    ///
    /// Silence is measured on this device's clock from the last presence
    /// event received. A partner who has not joined yet gets the same grace
    /// period from when this client connected.
    pub async fn check_peer_liveness(&self, now: DateTime<Utc>) -> bool {
        let Some(active) = self.slot.lock().await.session.clone() else {
            return false;
        };

        let timeout =
            chrono::Duration::from_std(PEER_TIMEOUT).unwrap_or_else(|_| chrono::Duration::seconds(15));
        let last_heard = self
            .adapter
            .snapshot()
            .last_heard(active.partner_id())
            .unwrap_or(active.connected_at);
        if now - last_heard <= timeout {
            return true;
        }

        tracing::info!(
            "Partner {} silent since {last_heard}; ending session {}",
            active.partner_id(),
            active.record.id
        );
        self.telemetry.breadcrumb("collab", "peer timed out");
        self.end_session().await;
        false
    }

    /// Run [`Self::check_peer_liveness`] every heartbeat until dropped.
    pub fn spawn_liveness_watch(self: &Arc<Self>) -> ScopedTask {
        let manager = Arc::clone(self);
        ScopedTask::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                manager.check_peer_liveness(Utc::now()).await;
            }
        })
    }

    pub async fn active_session(&self) -> Option<CollaborationSession> {
        self.slot
            .lock()
            .await
            .session
            .as_ref()
            .map(|active| active.record.clone())
    }

    pub async fn role(&self) -> Option<Role> {
        self.slot.lock().await.session.as_ref().map(|active| active.role)
    }

    /// Snapshot of live strokes, presence and cursors
    pub fn state(&self) -> CollabState {
        self.adapter.snapshot()
    }

    pub fn live_strokes(&self) -> Vec<LiveStroke> {
        self.adapter.snapshot().live_strokes().cloned().collect()
    }

    pub fn peer_cursors(&self) -> Vec<PeerCursor> {
        self.adapter.snapshot().peer_cursors().to_vec()
    }

    async fn open_session(&self, partner_id: &str) -> Result<ActiveSession> {
        let identity = self.foreground_identity().await?;
        let link = match self.find_active_link(&identity.user_id, partner_id).await {
            Some(link) => link,
            None => self
                .load_links()
                .await?
                .into_iter()
                .find(|link| link.is_active() && link.connects(&identity.user_id, partner_id))
                .ok_or_else(|| {
                    Error::Collaboration(format!("no active link with {partner_id}"))
                })?,
        };

        let role = if link.teacher_id == identity.user_id {
            Role::Teacher
        } else {
            Role::Student
        };
        let (teacher_id, student_id) = match role {
            Role::Teacher => (identity.user_id.clone(), partner_id.to_string()),
            Role::Student => (partner_id.to_string(), identity.user_id.clone()),
        };
        let now = Utc::now();
        // join the partner's session when they opened one over this link
        let open = self.find_open_session(&identity, &link.id).await?;
        let mut record = match open {
            Some(record) => record,
            None => CollaborationSession {
                id: ids::generate(Some("collab")),
                student_id,
                teacher_id,
                link_id: link.id,
                status: CollaborationStatus::Active,
                started_at: now,
                ended_at: None,
                student_last_seen: None,
                teacher_last_seen: None,
            },
        };
        match role {
            Role::Teacher => record.teacher_last_seen = Some(now),
            Role::Student => record.student_last_seen = Some(now),
        }
        self.sync
            .try_upsert(SyncPayload::CollaborationSession(record.clone()))
            .await?;

        Ok(ActiveSession {
            record,
            identity,
            role,
            connected_at: now,
        })
    }

    async fn find_open_session(
        &self,
        identity: &Identity,
        link_id: &str,
    ) -> Result<Option<CollaborationSession>> {
        let rows = self
            .sync
            .remote()
            .select(
                Some(identity),
                SESSIONS_TABLE,
                &[("link_id", link_id), ("status", "ACTIVE")],
            )
            .await?;
        let mut sessions = rows
            .into_iter()
            .map(serde_json::from_value::<CollaborationSession>)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        sessions.sort_by_key(|session| session.started_at);
        Ok(sessions.pop())
    }

    async fn find_active_link(&self, user_id: &str, partner_id: &str) -> Option<TeacherStudentLink> {
        self.slot
            .lock()
            .await
            .links
            .iter()
            .find(|link| link.is_active() && link.connects(user_id, partner_id))
            .cloned()
    }

    async fn cached_link(&self, link_id: &str) -> Option<TeacherStudentLink> {
        self.slot
            .lock()
            .await
            .links
            .iter()
            .find(|link| link.id == link_id)
            .cloned()
    }

    async fn foreground_identity(&self) -> Result<Identity> {
        if !self.sync.is_cloud_sync_enabled() {
            return Err(Error::SyncDisabled);
        }
        self.sync
            .current_identity()
            .await
            .ok_or(Error::NotAuthenticated)
    }

    fn set_connection(&self, state: ConnectionState) {
        self.connection.send_replace(state);
        self.telemetry.breadcrumb("collab", state.as_str());
    }
}

/// Decode the points carried by a live stroke
pub fn live_stroke_points(stroke: &LiveStroke) -> Result<Vec<StrokePoint>> {
    let encoded: codec::EncodedStroke = serde_json::from_str(&stroke.stroke_data)?;
    Ok(codec::decode(&encoded.encoding, &encoded.payload)?)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::auth::StaticIdentity;
    use crate::queue::{DurableQueue, RetryPolicy};
    use crate::remote::{MemoryRemote, RemoteStore};
    use crate::storage::MemoryKeyValueStore;
    use crate::telemetry::MemoryTelemetry;

    /// Yields before every call so overlapping futures interleave.
    struct YieldingRemote(Arc<MemoryRemote>);

    #[async_trait::async_trait]
    impl RemoteStore for YieldingRemote {
        async fn upsert(&self, identity: &Identity, table: &str, rows: Vec<Value>) -> Result<()> {
            tokio::task::yield_now().await;
            self.0.upsert(identity, table, rows).await
        }

        async fn insert(&self, identity: &Identity, table: &str, row: Value) -> Result<()> {
            tokio::task::yield_now().await;
            self.0.insert(identity, table, row).await
        }

        async fn select(
            &self,
            identity: Option<&Identity>,
            table: &str,
            filters: &[(&str, &str)],
        ) -> Result<Vec<Value>> {
            tokio::task::yield_now().await;
            self.0.select(identity, table, filters).await
        }

        async fn rpc(&self, identity: &Identity, function: &str, params: Value) -> Result<Value> {
            tokio::task::yield_now().await;
            self.0.rpc(identity, function, params).await
        }
    }

    struct Peer {
        manager: SessionManager,
        identity: Arc<StaticIdentity>,
        telemetry: MemoryTelemetry,
    }

    fn peer(user_id: &str, remote: &Arc<MemoryRemote>, hub: &LocalRealtimeHub) -> Peer {
        peer_on(user_id, remote.clone(), hub)
    }

    fn peer_on(user_id: &str, remote: Arc<dyn RemoteStore>, hub: &LocalRealtimeHub) -> Peer {
        let identity = Arc::new(StaticIdentity::signed_in(user_id));
        let telemetry = MemoryTelemetry::new();
        let queue = Arc::new(DurableQueue::new(
            Arc::new(MemoryKeyValueStore::new()),
            RetryPolicy::default(),
            Arc::new(telemetry.clone()),
        ));
        let sync = Arc::new(SyncClient::new(
            remote,
            queue,
            identity.clone(),
            Arc::new(telemetry.clone()),
        ));
        Peer {
            manager: SessionManager::new(sync, Arc::new(hub.clone()), Arc::new(telemetry.clone())),
            identity,
            telemetry,
        }
    }

    fn setup() -> (Arc<MemoryRemote>, LocalRealtimeHub) {
        let hub = LocalRealtimeHub::new();
        let remote = Arc::new(MemoryRemote::new().with_realtime(hub.clone()));
        (remote, hub)
    }

    async fn paired(remote: &Arc<MemoryRemote>, hub: &LocalRealtimeHub) -> (Peer, Peer) {
        let teacher = peer("teacher-1", remote, hub);
        let student = peer("student-1", remote, hub);
        let code = teacher.manager.generate_invite_code().await;
        student.manager.accept_invite_code(&code).await.unwrap();
        (teacher, student)
    }

    fn active_sessions(remote: &MemoryRemote) -> usize {
        remote
            .rows(SESSIONS_TABLE)
            .iter()
            .filter(|row| row["status"] == "ACTIVE")
            .count()
    }

    /// A teacher on an interleaving remote, linked to `students`
    async fn interleaved_teacher(
        remote: &Arc<MemoryRemote>,
        hub: &LocalRealtimeHub,
        students: &[&str],
    ) -> Peer {
        let teacher = peer_on("teacher-1", Arc::new(YieldingRemote(remote.clone())), hub);
        for student_id in students {
            let code = teacher.manager.generate_invite_code().await;
            peer(student_id, remote, hub)
                .manager
                .accept_invite_code(&code)
                .await
                .unwrap();
        }
        teacher
    }

    fn dot() -> Vec<StrokePoint> {
        vec![StrokePoint::new(1.0, 1.0, 0, 0.5)]
    }

    #[tokio::test]
    async fn invite_requires_identity() {
        let (remote, hub) = setup();
        let teacher = peer("teacher-1", &remote, &hub);
        teacher.identity.sign_out();
        assert_eq!(teacher.manager.generate_invite_code().await, "");
        assert!(matches!(
            teacher.manager.accept_invite_code("ABC234").await,
            Err(Error::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn invite_fails_soft_when_remote_is_down() {
        let (remote, hub) = setup();
        let teacher = peer("teacher-1", &remote, &hub);
        remote.set_offline(true);
        assert_eq!(teacher.manager.generate_invite_code().await, "");
        assert!(teacher.manager.links().await.is_empty());
        assert_eq!(teacher.telemetry.exceptions().len(), 1);
    }

    #[tokio::test]
    async fn malformed_codes_are_rejected_locally() {
        let (remote, hub) = setup();
        let student = peer("student-1", &remote, &hub);
        assert!(matches!(
            student.manager.accept_invite_code("AB0").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn accepting_lowercase_code_pairs() {
        let (remote, hub) = setup();
        let teacher = peer("teacher-1", &remote, &hub);
        let student = peer("student-1", &remote, &hub);
        let code = teacher.manager.generate_invite_code().await;

        let link = student
            .manager
            .accept_invite_code(&code.to_ascii_lowercase())
            .await
            .unwrap();
        assert_eq!(link.status, LinkStatus::Active);
        assert_eq!(link.student_id.as_deref(), Some("student-1"));
        assert_eq!(student.manager.links().await, vec![link]);
    }

    #[tokio::test]
    async fn start_session_requires_active_link() {
        let (remote, hub) = setup();
        let teacher = peer("teacher-1", &remote, &hub);
        let result = teacher.manager.start_session("stranger").await;
        assert!(matches!(result, Err(Error::Collaboration(_))));
        assert_eq!(teacher.manager.connection_state(), ConnectionState::Disconnected);
        assert_eq!(
            teacher.telemetry.breadcrumbs("collab"),
            vec!["connecting", "disconnected"]
        );
    }

    #[tokio::test]
    async fn link_lookup_works_from_either_side() {
        let (remote, hub) = setup();
        let (teacher, student) = paired(&remote, &hub).await;

        // the teacher's cache still holds the pending link; start refreshes it
        let session = teacher.manager.start_session("student-1").await.unwrap();
        assert_eq!(teacher.manager.role().await, Some(Role::Teacher));
        assert_eq!(session.teacher_id, "teacher-1");
        assert_eq!(session.student_id, "student-1");

        let joined = student.manager.start_session("teacher-1").await.unwrap();
        assert_eq!(student.manager.role().await, Some(Role::Student));
        assert_eq!(joined.id, session.id);
        assert!(joined.teacher_last_seen.is_some());
        assert!(joined.student_last_seen.is_some());
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let (remote, hub) = setup();
        let (teacher, _student) = paired(&remote, &hub).await;
        teacher.manager.start_session("student-1").await.unwrap();
        assert!(teacher.manager.start_session("student-1").await.is_err());
        assert_eq!(teacher.manager.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn overlapping_starts_open_one_session() {
        let (remote, hub) = setup();
        let teacher = interleaved_teacher(&remote, &hub, &["student-1", "student-2"]).await;

        let (first, second) = tokio::join!(
            teacher.manager.start_session("student-1"),
            teacher.manager.start_session("student-2")
        );
        assert_eq!(usize::from(first.is_ok()) + usize::from(second.is_ok()), 1);
        assert_eq!(active_sessions(&remote), 1);
        assert_eq!(teacher.manager.connection_state(), ConnectionState::Connected);

        teacher.manager.end_session().await;
        assert_eq!(active_sessions(&remote), 0);
    }

    #[tokio::test]
    async fn end_during_connect_wins() {
        let (remote, hub) = setup();
        let teacher = interleaved_teacher(&remote, &hub, &["student-1"]).await;

        let (started, ended) = tokio::join!(
            teacher.manager.start_session("student-1"),
            teacher.manager.end_session()
        );
        let started = started.unwrap();
        assert_eq!(ended.map(|record| record.id), Some(started.id.clone()));
        assert_eq!(teacher.manager.connection_state(), ConnectionState::Disconnected);
        assert!(teacher.manager.active_session().await.is_none());
        assert_eq!(
            remote.row(SESSIONS_TABLE, &started.id).unwrap()["status"],
            "ENDED"
        );
    }

    #[tokio::test]
    async fn teacher_annotations_are_tagged() {
        let (remote, hub) = setup();
        let (teacher, student) = paired(&remote, &hub).await;
        teacher.manager.start_session("student-1").await.unwrap();
        student.manager.start_session("teacher-1").await.unwrap();

        teacher
            .manager
            .broadcast_stroke(&dot(), "#ff3b30", 3.0, 1)
            .await
            .unwrap();
        student
            .manager
            .broadcast_stroke(&dot(), ANNOTATION_COLOR, 3.0, 1)
            .await
            .unwrap();

        let rows = remote.rows(LIVE_STROKES_TABLE);
        let teacher_row = rows.iter().find(|row| row["author_id"] == "teacher-1").unwrap();
        let student_row = rows.iter().find(|row| row["author_id"] == "student-1").unwrap();
        assert_eq!(teacher_row["is_annotation"], true);
        assert_eq!(student_row["is_annotation"], false);
    }

    #[tokio::test]
    async fn live_strokes_round_trip_points() {
        let (remote, hub) = setup();
        let (teacher, _student) = paired(&remote, &hub).await;
        teacher.manager.start_session("student-1").await.unwrap();

        let points = vec![
            StrokePoint::new(1.5, 2.5, 10, 0.3),
            StrokePoint::new(4.0, 8.0, 26, 0.9),
        ];
        let outcome = teacher
            .manager
            .broadcast_stroke(&points, "#000000", 2.0, 0)
            .await
            .unwrap();
        assert_eq!(outcome, BestEffort::Delivered);
        let held = teacher.manager.live_strokes();
        assert_eq!(live_stroke_points(&held[0]).unwrap(), points);
    }

    #[tokio::test]
    async fn corrupt_strokes_are_errors() {
        let (remote, hub) = setup();
        let (teacher, _student) = paired(&remote, &hub).await;
        teacher.manager.start_session("student-1").await.unwrap();
        let result = teacher
            .manager
            .broadcast_stroke(&[StrokePoint::new(f64::NAN, 0.0, 0, 1.0)], "#000000", 2.0, 0)
            .await;
        assert!(matches!(result, Err(Error::Codec(_))));
    }

    #[tokio::test]
    async fn ephemeral_sends_without_session_are_skipped() {
        let (remote, hub) = setup();
        let teacher = peer("teacher-1", &remote, &hub);
        assert_eq!(
            teacher.manager.broadcast_stroke(&dot(), "#000000", 2.0, 0).await.unwrap(),
            BestEffort::Skipped
        );
        assert_eq!(
            teacher
                .manager
                .update_cursor_position(CursorPoint { x: 0.0, y: 0.0 })
                .await,
            BestEffort::Skipped
        );
        assert_eq!(remote.write_count(LIVE_STROKES_TABLE), 0);
    }

    #[tokio::test]
    async fn revoking_is_idempotent_and_ends_the_session() {
        let (remote, hub) = setup();
        let (teacher, _student) = paired(&remote, &hub).await;
        let session = teacher.manager.start_session("student-1").await.unwrap();

        teacher.manager.revoke_link(&session.link_id).await.unwrap();
        assert_eq!(teacher.manager.connection_state(), ConnectionState::Disconnected);
        let writes = remote.write_count(LINKS_TABLE);

        teacher.manager.revoke_link(&session.link_id).await.unwrap();
        assert_eq!(remote.write_count(LINKS_TABLE), writes);
        assert_eq!(
            remote.row(LINKS_TABLE, &session.link_id).unwrap()["status"],
            "REVOKED"
        );
        assert!(teacher.manager.start_session("student-1").await.is_err());
    }

    #[tokio::test]
    async fn revoking_unknown_link_is_not_found() {
        let (remote, hub) = setup();
        let teacher = peer("teacher-1", &remote, &hub);
        assert!(matches!(
            teacher.manager.revoke_link("link_missing").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn silent_partner_ends_the_session() {
        let (remote, hub) = setup();
        let (teacher, _student) = paired(&remote, &hub).await;
        let session = teacher.manager.start_session("student-1").await.unwrap();

        let within = session.started_at + chrono::Duration::seconds(10);
        assert!(teacher.manager.check_peer_liveness(within).await);

        let beyond = session.started_at + chrono::Duration::seconds(16);
        assert!(!teacher.manager.check_peer_liveness(beyond).await);
        assert_eq!(teacher.manager.connection_state(), ConnectionState::Disconnected);
        assert_eq!(
            remote.row("collaboration_sessions", &session.id).unwrap()["status"],
            "ENDED"
        );
    }

    #[tokio::test]
    async fn liveness_uses_local_receipt_time() {
        let (remote, hub) = setup();
        let (teacher, _student) = paired(&remote, &hub).await;
        let session = teacher.manager.start_session("student-1").await.unwrap();

        // the student's clock runs an hour behind
        let now = Utc::now();
        hub.inject(
            &channel_topic(&session.id),
            ChannelEvent::PresenceJoin(PresenceState {
                user_id: "student-1".to_string(),
                role: Role::Student,
                online: true,
                last_seen: now - chrono::Duration::hours(1),
                cursor_position: None,
            }),
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let heard = teacher.manager.state().last_heard("student-1").unwrap();
        assert!(heard >= now);
        assert!(teacher.manager.check_peer_liveness(heard + chrono::Duration::seconds(10)).await);
        assert!(!teacher.manager.check_peer_liveness(heard + chrono::Duration::seconds(16)).await);
    }
}
