//! Practice records: sessions, attempts, steps, strokes and hints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StrokePoint;
use crate::ids;

/// A practice sitting that groups attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PracticeSession {
    pub id: String,
    /// Owning user; stamped from the signed-in identity at upload time when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub problem_set_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl PracticeSession {
    #[must_use]
    pub fn new(problem_set_id: Option<String>) -> Self {
        Self {
            id: ids::generate(Some("session")),
            user_id: None,
            problem_set_id,
            started_at: Utc::now(),
            ended_at: None,
        }
    }
}

/// One attempt at solving a problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub problem_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_correct: Option<bool>,
    #[serde(default)]
    pub hints_used: u32,
}

impl Attempt {
    #[must_use]
    pub fn new(session_id: impl Into<String>, problem_id: impl Into<String>) -> Self {
        Self {
            id: ids::generate(Some("attempt")),
            session_id: session_id.into(),
            user_id: None,
            problem_id: problem_id.into(),
            started_at: Utc::now(),
            completed_at: None,
            is_correct: None,
            hints_used: 0,
        }
    }
}

/// A recognized, validated line of work within an attempt.
///
/// The step owns its strokes so that a successful step upload can fan them
/// out for independent upload; strokes are not part of the step row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub attempt_id: String,
    pub step_number: u32,
    pub latex: String,
    #[serde(default)]
    pub is_valid: Option<bool>,
    #[serde(default)]
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub strokes: Vec<StrokeRecord>,
}

impl Step {
    #[must_use]
    pub fn new(attempt_id: impl Into<String>, step_number: u32, latex: impl Into<String>) -> Self {
        Self {
            id: ids::generate(Some("step")),
            attempt_id: attempt_id.into(),
            step_number,
            latex: latex.into(),
            is_valid: None,
            feedback: None,
            created_at: Utc::now(),
            strokes: Vec::new(),
        }
    }
}

/// A durable handwriting stroke tied to a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeRecord {
    pub id: String,
    pub step_id: String,
    pub attempt_id: String,
    pub points: Vec<StrokePoint>,
    pub color: String,
    pub stroke_width: f32,
    pub created_at: DateTime<Utc>,
}

impl StrokeRecord {
    #[must_use]
    pub fn new(
        step_id: impl Into<String>,
        attempt_id: impl Into<String>,
        points: Vec<StrokePoint>,
    ) -> Self {
        Self {
            id: ids::generate(Some("stroke")),
            step_id: step_id.into(),
            attempt_id: attempt_id.into(),
            points,
            color: "#000000".to_string(),
            stroke_width: 2.0,
            created_at: Utc::now(),
        }
    }
}

/// A progressive hint shown during an attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    pub id: String,
    pub attempt_id: String,
    #[serde(default)]
    pub step_id: Option<String>,
    /// 1 = nudge, higher levels reveal more of the solution
    pub level: u8,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Hint {
    #[must_use]
    pub fn new(attempt_id: impl Into<String>, level: u8, content: impl Into<String>) -> Self {
        Self {
            id: ids::generate(Some("hint")),
            attempt_id: attempt_id.into(),
            step_id: None,
            level,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_assign_prefixed_ids() {
        let attempt = Attempt::new("session-1", "problem-1");
        assert!(attempt.id.starts_with("attempt_"));
        assert_eq!(attempt.hints_used, 0);

        let step = Step::new(&attempt.id, 1, "x = 2");
        assert!(step.id.starts_with("step_"));
        assert!(step.strokes.is_empty());
    }

    #[test]
    fn unset_user_id_is_not_serialized() {
        let session = PracticeSession::new(None);
        let value = serde_json::to_value(&session).unwrap();
        assert!(value.get("user_id").is_none());
        assert!(value["started_at"].as_str().unwrap().contains('T'));
    }
}
