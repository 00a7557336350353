//! Tutorial and assessment records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StrokePoint;
use crate::ids;

/// A tutorial video lesson (read-only catalogue row)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TutorialLesson {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub sort_order: i32,
}

/// Per-user playback progress through a lesson
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TutorialProgress {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub lesson_id: String,
    pub last_position_seconds: f64,
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TutorialProgress {
    #[must_use]
    pub fn new(lesson_id: impl Into<String>) -> Self {
        Self {
            id: ids::generate(Some("progress")),
            user_id: None,
            lesson_id: lesson_id.into(),
            last_position_seconds: 0.0,
            completed: false,
            completed_at: None,
            updated_at: Utc::now(),
        }
    }
}

/// A placement or review assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub assessment_type: String,
    #[serde(default)]
    pub score: Option<f64>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Assessment {
    #[must_use]
    pub fn new(assessment_type: impl Into<String>) -> Self {
        Self {
            id: ids::generate(Some("assessment")),
            user_id: None,
            assessment_type: assessment_type.into(),
            score: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// A stroke written while answering an assessment question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentStroke {
    pub id: String,
    pub assessment_id: String,
    pub question_id: String,
    pub points: Vec<StrokePoint>,
    pub color: String,
    pub stroke_width: f32,
    pub created_at: DateTime<Utc>,
}

impl AssessmentStroke {
    #[must_use]
    pub fn new(
        assessment_id: impl Into<String>,
        question_id: impl Into<String>,
        points: Vec<StrokePoint>,
    ) -> Self {
        Self {
            id: ids::generate(Some("astroke")),
            assessment_id: assessment_id.into(),
            question_id: question_id.into(),
            points,
            color: "#000000".to_string(),
            stroke_width: 2.0,
            created_at: Utc::now(),
        }
    }
}
