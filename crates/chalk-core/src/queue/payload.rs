//! Record kinds routed through the sync queue

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{
    Assessment, AssessmentStroke, Attempt, CollaborationSession, Hint, PracticeSession, Step,
    StrokeRecord, TeacherStudentLink, TutorialProgress,
};

/// Domain record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Session,
    Attempt,
    Step,
    Stroke,
    Hint,
    TeacherStudentLink,
    CollaborationSession,
    TutorialProgress,
    Assessment,
    AssessmentStroke,
}

impl RecordKind {
    pub const ALL: [Self; 10] = [
        Self::Session,
        Self::Attempt,
        Self::Step,
        Self::Stroke,
        Self::Hint,
        Self::TeacherStudentLink,
        Self::CollaborationSession,
        Self::TutorialProgress,
        Self::Assessment,
        Self::AssessmentStroke,
    ];

    /// Drain priority; lower drains first. Parents outrank the children
    /// that reference them remotely.
    pub const fn priority(self) -> u8 {
        match self {
            Self::Session | Self::TeacherStudentLink => 0,
            Self::Attempt | Self::CollaborationSession | Self::Assessment => 1,
            Self::Step | Self::TutorialProgress => 2,
            Self::Stroke | Self::AssessmentStroke => 3,
            Self::Hint => 4,
        }
    }

    /// Remote collection the kind is upserted into
    pub const fn table(self) -> &'static str {
        match self {
            Self::Session => "sessions",
            Self::Attempt => "attempts",
            Self::Step => "steps",
            Self::Stroke => "strokes",
            Self::Hint => "hints",
            Self::TeacherStudentLink => "teacher_student_links",
            Self::CollaborationSession => "collaboration_sessions",
            Self::TutorialProgress => "tutorial_progress",
            Self::Assessment => "assessments",
            Self::AssessmentStroke => "assessment_strokes",
        }
    }

    /// Kinds whose rows carry the owner's `user_id`
    pub const fn is_user_owned(self) -> bool {
        matches!(
            self,
            Self::Session | Self::Attempt | Self::TutorialProgress | Self::Assessment
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Attempt => "attempt",
            Self::Step => "step",
            Self::Stroke => "stroke",
            Self::Hint => "hint",
            Self::TeacherStudentLink => "teacher_student_link",
            Self::CollaborationSession => "collaboration_session",
            Self::TutorialProgress => "tutorial_progress",
            Self::Assessment => "assessment",
            Self::AssessmentStroke => "assessment_stroke",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued record, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SyncPayload {
    Session(PracticeSession),
    Attempt(Attempt),
    Step(Step),
    Stroke(StrokeRecord),
    Hint(Hint),
    TeacherStudentLink(TeacherStudentLink),
    CollaborationSession(CollaborationSession),
    TutorialProgress(TutorialProgress),
    Assessment(Assessment),
    AssessmentStroke(AssessmentStroke),
}

impl SyncPayload {
    pub const fn kind(&self) -> RecordKind {
        match self {
            Self::Session(_) => RecordKind::Session,
            Self::Attempt(_) => RecordKind::Attempt,
            Self::Step(_) => RecordKind::Step,
            Self::Stroke(_) => RecordKind::Stroke,
            Self::Hint(_) => RecordKind::Hint,
            Self::TeacherStudentLink(_) => RecordKind::TeacherStudentLink,
            Self::CollaborationSession(_) => RecordKind::CollaborationSession,
            Self::TutorialProgress(_) => RecordKind::TutorialProgress,
            Self::Assessment(_) => RecordKind::Assessment,
            Self::AssessmentStroke(_) => RecordKind::AssessmentStroke,
        }
    }

    /// The record's client-generated id
    pub fn record_id(&self) -> &str {
        match self {
            Self::Session(record) => &record.id,
            Self::Attempt(record) => &record.id,
            Self::Step(record) => &record.id,
            Self::Stroke(record) => &record.id,
            Self::Hint(record) => &record.id,
            Self::TeacherStudentLink(record) => &record.id,
            Self::CollaborationSession(record) => &record.id,
            Self::TutorialProgress(record) => &record.id,
            Self::Assessment(record) => &record.id,
            Self::AssessmentStroke(record) => &record.id,
        }
    }
}
