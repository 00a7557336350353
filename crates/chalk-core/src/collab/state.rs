use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::models::{LiveStroke, PeerCursor, PresenceState, Role};

/// Live strokes kept for the current session
pub const MAX_LIVE_STROKES: usize = 1000;
/// Remote cursors kept for the current session
pub const MAX_PEER_CURSORS: usize = 10;

/// In-memory view of the active collaboration session.
///
/// Written only by the realtime adapter's event handlers and the session
/// manager's own broadcasts. Nothing here is persisted.
#[derive(Debug, Default, Clone)]
pub struct CollabState {
    live_strokes: VecDeque<LiveStroke>,
    presence: HashMap<String, PresenceState>,
    /// Local clock time each peer's presence was last received
    heard_at: HashMap<String, DateTime<Utc>>,
    connected_teacher: Option<String>,
    active_students: Vec<String>,
    peer_cursors: Vec<PeerCursor>,
}

impl CollabState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stroke, dropping the oldest past [`MAX_LIVE_STROKES`].
    /// Returns `false` when a stroke with the same id is already held.
    pub fn push_live_stroke(&mut self, stroke: LiveStroke) -> bool {
        if self.live_strokes.iter().any(|held| held.id == stroke.id) {
            return false;
        }
        if self.live_strokes.len() == MAX_LIVE_STROKES {
            self.live_strokes.pop_front();
        }
        self.live_strokes.push_back(stroke);
        true
    }

    pub fn live_strokes(&self) -> impl Iterator<Item = &LiveStroke> {
        self.live_strokes.iter()
    }

    pub fn live_stroke_count(&self) -> usize {
        self.live_strokes.len()
    }

    /// Replace the presence map with a full snapshot received at
    /// `received_at`.
    pub fn apply_sync(
        &mut self,
        snapshot: HashMap<String, PresenceState>,
        received_at: DateTime<Utc>,
    ) {
        self.heard_at = snapshot
            .keys()
            .map(|user_id| (user_id.clone(), received_at))
            .collect();
        self.presence = snapshot;
        self.refresh_roles();
    }

    pub fn apply_join(&mut self, state: PresenceState, received_at: DateTime<Utc>) {
        self.heard_at.insert(state.user_id.clone(), received_at);
        self.presence.insert(state.user_id.clone(), state);
        self.refresh_roles();
    }

    pub fn apply_leave(&mut self, state: &PresenceState) {
        self.presence.remove(&state.user_id);
        self.heard_at.remove(&state.user_id);
        self.peer_cursors
            .retain(|cursor| cursor.user_id != state.user_id);
        self.refresh_roles();
    }

    pub fn presence(&self) -> &HashMap<String, PresenceState> {
        &self.presence
    }

    /// When `user_id`'s presence last arrived, by this device's clock.
    /// The peer's own `last_seen` stamp is not used for liveness.
    pub fn last_heard(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.heard_at.get(user_id).copied()
    }

    pub fn connected_teacher(&self) -> Option<&str> {
        self.connected_teacher.as_deref()
    }

    pub fn active_students(&self) -> &[String] {
        &self.active_students
    }

    /// Insert or update a peer's cursor, evicting the stalest entry past
    /// [`MAX_PEER_CURSORS`].
    pub fn merge_cursor(&mut self, cursor: PeerCursor) {
        if let Some(held) = self
            .peer_cursors
            .iter_mut()
            .find(|held| held.user_id == cursor.user_id)
        {
            *held = cursor;
            return;
        }

        if self.peer_cursors.len() >= MAX_PEER_CURSORS {
            if let Some(oldest) = self
                .peer_cursors
                .iter()
                .enumerate()
                .min_by_key(|(_, held)| held.timestamp)
                .map(|(index, _)| index)
            {
                self.peer_cursors.swap_remove(oldest);
            }
        }
        self.peer_cursors.push(cursor);
    }

    pub fn peer_cursors(&self) -> &[PeerCursor] {
        &self.peer_cursors
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn refresh_roles(&mut self) {
        self.connected_teacher = self
            .presence
            .values()
            .find(|state| state.role == Role::Teacher && state.online)
            .map(|state| state.user_id.clone());

        let mut students: Vec<String> = self
            .presence
            .values()
            .filter(|state| state.role == Role::Student && state.online)
            .map(|state| state.user_id.clone())
            .collect();
        students.sort();
        self.active_students = students;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::CursorPoint;

    fn stroke(id: &str) -> LiveStroke {
        LiveStroke {
            id: id.to_string(),
            session_id: "collab-1".to_string(),
            author_id: "teacher-1".to_string(),
            stroke_data: String::new(),
            color: "#000000".to_string(),
            stroke_width: 2.0,
            line_number: 0,
            is_annotation: false,
            created_at: Utc::now(),
        }
    }

    fn presence(user_id: &str, role: Role) -> PresenceState {
        PresenceState {
            user_id: user_id.to_string(),
            role,
            online: true,
            last_seen: Utc::now(),
            cursor_position: None,
        }
    }

    fn cursor(user_id: &str, timestamp: i64) -> PeerCursor {
        PeerCursor {
            user_id: user_id.to_string(),
            position: CursorPoint { x: 1.0, y: 2.0 },
            timestamp,
        }
    }

    #[test]
    fn live_strokes_are_a_ring_buffer() {
        let mut state = CollabState::new();
        for index in 0..=MAX_LIVE_STROKES {
            assert!(state.push_live_stroke(stroke(&format!("ls{index}"))));
        }
        assert_eq!(state.live_stroke_count(), MAX_LIVE_STROKES);
        assert_eq!(state.live_strokes().next().map(|s| s.id.as_str()), Some("ls1"));
        assert!(!state.push_live_stroke(stroke("ls5")));
    }

    #[test]
    fn presence_tracks_teacher_and_students() {
        let mut state = CollabState::new();
        let now = Utc::now();
        state.apply_join(presence("teacher-1", Role::Teacher), now);
        state.apply_join(presence("student-2", Role::Student), now);
        state.apply_join(presence("student-1", Role::Student), now);
        assert_eq!(state.connected_teacher(), Some("teacher-1"));
        assert_eq!(state.active_students(), ["student-1", "student-2"]);

        state.apply_leave(&presence("teacher-1", Role::Teacher));
        assert_eq!(state.connected_teacher(), None);

        state.apply_sync(
            HashMap::from([(
                "student-3".to_string(),
                presence("student-3", Role::Student),
            )]),
            now,
        );
        assert_eq!(state.active_students(), ["student-3"]);
        assert_eq!(state.last_heard("student-3"), Some(now));
        assert_eq!(state.last_heard("student-1"), None);
    }

    #[test]
    fn cursor_cache_evicts_oldest_timestamp() {
        let mut state = CollabState::new();
        // insertion order differs from timestamp order
        for (index, timestamp) in [50, 10, 90, 30, 70, 20, 80, 60, 40, 100].into_iter().enumerate() {
            state.merge_cursor(cursor(&format!("user-{index}"), timestamp));
        }
        assert_eq!(state.peer_cursors().len(), MAX_PEER_CURSORS);

        state.merge_cursor(cursor("newcomer", 200));
        assert_eq!(state.peer_cursors().len(), MAX_PEER_CURSORS);
        assert!(state.peer_cursors().iter().all(|c| c.user_id != "user-1"));
        assert!(state.peer_cursors().iter().any(|c| c.user_id == "newcomer"));

        // updates replace in place
        state.merge_cursor(cursor("user-0", 300));
        assert_eq!(state.peer_cursors().len(), MAX_PEER_CURSORS);
    }

    #[test]
    fn clear_resets_everything() {
        let mut state = CollabState::new();
        state.push_live_stroke(stroke("ls1"));
        state.apply_join(presence("teacher-1", Role::Teacher), Utc::now());
        state.merge_cursor(cursor("teacher-1", 1));
        state.clear();
        assert_eq!(state.live_stroke_count(), 0);
        assert!(state.presence().is_empty());
        assert!(state.peer_cursors().is_empty());
        assert_eq!(state.connected_teacher(), None);
        assert_eq!(state.last_heard("teacher-1"), None);
    }

    #[test]
    fn receipt_time_ignores_peer_clock() {
        let mut state = CollabState::new();
        let received_at = Utc::now();
        let mut skewed = presence("student-1", Role::Student);
        skewed.last_seen = received_at - chrono::Duration::hours(1);

        state.apply_join(skewed, received_at);
        assert_eq!(state.last_heard("student-1"), Some(received_at));

        state.apply_leave(&presence("student-1", Role::Student));
        assert_eq!(state.last_heard("student-1"), None);
    }
}
