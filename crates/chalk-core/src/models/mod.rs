//! Data models for Chalk

mod collab;
mod practice;
mod stroke;
mod tutorial;

pub use collab::{
    CollaborationSession, CollaborationStatus, CursorPoint, LinkPermissions, LinkStatus,
    LiveStroke, PeerCursor, PresenceState, Role, TeacherStudentLink,
};
pub use practice::{Attempt, Hint, PracticeSession, Step, StrokeRecord};
pub use stroke::{Bounds, StrokePoint};
pub use tutorial::{Assessment, AssessmentStroke, TutorialLesson, TutorialProgress};
