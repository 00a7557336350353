//! Domain record -> remote row mapping

use serde_json::{Map, Value};

use crate::codec;
use crate::error::{Error, Result};
use crate::models::StrokePoint;
use crate::queue::SyncPayload;

/// Build the flat snake_case row for `payload`.
///
/// Steps drop their owned strokes (uploaded separately), stroke points are
/// replaced by the encoded payload, and user-owned rows without an owner are
/// stamped with `user_id`.
pub fn to_row(payload: &SyncPayload, user_id: &str) -> Result<Value> {
    let mut row = match payload {
        SyncPayload::Session(record) => object(serde_json::to_value(record)?)?,
        SyncPayload::Attempt(record) => object(serde_json::to_value(record)?)?,
        SyncPayload::Step(record) => {
            let mut row = object(serde_json::to_value(record)?)?;
            row.remove("strokes");
            row
        }
        SyncPayload::Stroke(record) => {
            let mut row = object(serde_json::to_value(record)?)?;
            encode_points(&mut row, &record.points)?;
            row
        }
        SyncPayload::Hint(record) => object(serde_json::to_value(record)?)?,
        SyncPayload::TeacherStudentLink(record) => object(serde_json::to_value(record)?)?,
        SyncPayload::CollaborationSession(record) => object(serde_json::to_value(record)?)?,
        SyncPayload::TutorialProgress(record) => object(serde_json::to_value(record)?)?,
        SyncPayload::Assessment(record) => object(serde_json::to_value(record)?)?,
        SyncPayload::AssessmentStroke(record) => {
            let mut row = object(serde_json::to_value(record)?)?;
            encode_points(&mut row, &record.points)?;
            row
        }
    };

    if payload.kind().is_user_owned() {
        let missing = row.get("user_id").map_or(true, Value::is_null);
        if missing {
            row.insert("user_id".to_string(), Value::String(user_id.to_string()));
        }
    }

    Ok(Value::Object(row))
}

/// Decode the points of a stroke row produced by [`to_row`].
pub fn stroke_points(row: &Value) -> Result<Vec<StrokePoint>> {
    let field = |name: &str| {
        row.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidInput(format!("stroke row is missing '{name}'")))
    };
    Ok(codec::decode(field("encoding")?, field("stroke_data")?)?)
}

fn encode_points(row: &mut Map<String, Value>, points: &[StrokePoint]) -> Result<()> {
    let encoded = codec::encode(points)?;
    row.remove("points");
    row.insert("stroke_data".to_string(), Value::String(encoded.payload));
    row.insert("encoding".to_string(), Value::String(encoded.encoding));
    row.insert("point_count".to_string(), encoded.point_count.into());
    row.insert("bounds".to_string(), serde_json::to_value(encoded.bounds)?);
    row.insert("original_bytes".to_string(), encoded.original_bytes.into());
    row.insert("compressed_bytes".to_string(), encoded.compressed_bytes.into());
    Ok(())
}

fn object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::InvalidInput(format!(
            "expected a JSON object row, got {other}"
        ))),
    }
}
