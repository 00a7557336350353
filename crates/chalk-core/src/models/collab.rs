//! Teacher/student pairing and live collaboration models

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ids;

/// How long an unaccepted invite code stays claimable.
pub const INVITE_TTL_HOURS: i64 = 24;

/// Participant role in a collaboration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "teacher" => Ok(Self::Teacher),
            "student" => Ok(Self::Student),
            other => Err(format!("unknown role '{other}' (expected teacher or student)")),
        }
    }
}

/// Lifecycle of a teacher/student link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStatus {
    Pending,
    Active,
    Revoked,
}

impl LinkStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Revoked => "REVOKED",
        }
    }
}

/// Capabilities the teacher holds over the student's work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct LinkPermissions {
    pub can_write: bool,
    pub can_view_all: bool,
    pub can_annotate: bool,
}

impl Default for LinkPermissions {
    fn default() -> Self {
        Self {
            can_write: true,
            can_view_all: true,
            can_annotate: true,
        }
    }
}

/// Pairing between a teacher and (once accepted) a student
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeacherStudentLink {
    pub id: String,
    pub teacher_id: String,
    #[serde(default)]
    pub student_id: Option<String>,
    pub invite_code: String,
    pub status: LinkStatus,
    #[serde(default)]
    pub permissions: LinkPermissions,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl TeacherStudentLink {
    /// Create a pending link for `teacher_id` that expires after 24 hours.
    #[must_use]
    pub fn pending(teacher_id: impl Into<String>, invite_code: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ids::generate(Some("link")),
            teacher_id: teacher_id.into(),
            student_id: None,
            invite_code: invite_code.into(),
            status: LinkStatus::Pending,
            permissions: LinkPermissions::default(),
            created_at: now,
            expires_at: now + Duration::hours(INVITE_TTL_HOURS),
            accepted_at: None,
            revoked_at: None,
        }
    }

    /// A pending link whose invite window has passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == LinkStatus::Pending && self.expires_at <= now
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == LinkStatus::Active
    }

    /// Whether this link pairs `a` and `b`, in either direction.
    #[must_use]
    pub fn connects(&self, a: &str, b: &str) -> bool {
        let student = self.student_id.as_deref();
        (self.teacher_id == a && student == Some(b)) || (self.teacher_id == b && student == Some(a))
    }
}

/// Remote status of a collaboration session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollaborationStatus {
    Active,
    Ended,
}

/// A live teacher/student working session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaborationSession {
    pub id: String,
    pub student_id: String,
    pub teacher_id: String,
    pub link_id: String,
    pub status: CollaborationStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub student_last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub teacher_last_seen: Option<DateTime<Utc>>,
}

/// Stroke broadcast to collaboration peers; never durably queued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveStroke {
    pub id: String,
    pub session_id: String,
    pub author_id: String,
    pub stroke_data: String,
    pub color: String,
    pub stroke_width: f32,
    pub line_number: u32,
    #[serde(default)]
    pub is_annotation: bool,
    pub created_at: DateTime<Utc>,
}

/// Cursor coordinates on the shared canvas
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPoint {
    pub x: f64,
    pub y: f64,
}

/// A peer's last reported cursor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerCursor {
    pub user_id: String,
    pub position: CursorPoint,
    /// Unix ms when the peer reported it
    pub timestamp: i64,
}

/// Presence payload tracked on the realtime channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceState {
    pub user_id: String,
    pub role: Role,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub cursor_position: Option<CursorPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_link_expires_after_a_day() {
        let link = TeacherStudentLink::pending("teacher-1", "ABC234");
        assert_eq!(link.status, LinkStatus::Pending);
        assert_eq!(link.expires_at - link.created_at, Duration::hours(24));
        assert!(!link.is_expired(link.created_at));
        assert!(link.is_expired(link.created_at + Duration::hours(25)));
    }

    #[test]
    fn link_connects_in_both_directions() {
        let mut link = TeacherStudentLink::pending("teacher-1", "ABC234");
        link.student_id = Some("student-1".to_string());
        assert!(link.connects("teacher-1", "student-1"));
        assert!(link.connects("student-1", "teacher-1"));
        assert!(!link.connects("teacher-1", "student-2"));
    }

    #[test]
    fn link_status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_value(LinkStatus::Active).unwrap(),
            serde_json::json!("ACTIVE")
        );
        assert_eq!(
            serde_json::to_value(Role::Teacher).unwrap(),
            serde_json::json!("teacher")
        );
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Teacher".parse::<Role>().unwrap(), Role::Teacher);
        assert!("admin".parse::<Role>().is_err());
    }
}
