//! Record codec: validates a streamed case payload and builds a typed [`Record`].
//!
//! Payloads are JSON objects. Field names are accepted in both `snake_case`
//! and the upstream's `camelCase`. Only `id` and the age are required; every
//! other attribute is optional but must have the right type when present.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use casestats_core::{AssignmentStatus, Record};

/// Payload excerpts attached to errors are cut to this many bytes.
const MAX_PAYLOAD_EXCERPT: usize = 512;

/// A payload that could not be turned into a [`Record`].
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} (payload: {payload})")]
pub struct CodecError {
    pub kind: CodecErrorKind,
    /// The offending payload, truncated for logging.
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecErrorKind {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl CodecError {
    pub(crate) fn new(kind: CodecErrorKind, payload: &str) -> Self {
        Self {
            kind,
            payload: excerpt(payload),
        }
    }
}

/// Cut `payload` to at most [`MAX_PAYLOAD_EXCERPT`] bytes on a char boundary.
pub(crate) fn excerpt(payload: &str) -> String {
    if payload.len() <= MAX_PAYLOAD_EXCERPT {
        return payload.to_string();
    }
    let mut end = MAX_PAYLOAD_EXCERPT;
    while !payload.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &payload[..end])
}

/// Parse a raw upsert payload into a [`Record`].
pub fn parse_record(raw: &str) -> Result<Record, CodecError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| CodecError::new(CodecErrorKind::InvalidJson(e.to_string()), raw))?;
    record_from_value(&value).map_err(|kind| CodecError::new(kind, raw))
}

/// Validate an already-decoded JSON value as a record.
pub fn record_from_value(value: &Value) -> Result<Record, CodecErrorKind> {
    let obj = value.as_object().ok_or(CodecErrorKind::NotAnObject)?;

    let id = match lookup(obj, &["id", "caseId", "case_id"]) {
        None => return Err(CodecErrorKind::MissingField("id")),
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::String(_)) => {
            return Err(invalid("id", "must not be empty"));
        }
        // Numeric identities are normalized to their decimal form.
        Some(Value::Number(n)) if n.is_u64() || n.is_i64() => n.to_string(),
        Some(_) => return Err(invalid("id", "must be a string")),
    };

    let age_days = match lookup(obj, &["age_days", "ageDays", "age"]) {
        None => return Err(CodecErrorKind::MissingField("age_days")),
        Some(v) => parse_age(v)?,
    };

    let assignment_status = match opt_string(obj, "assignment_status", &["assignment_status", "assignmentStatus", "status"])? {
        Some(s) => AssignmentStatus::from_wire(&s),
        None => AssignmentStatus::Unknown,
    };

    let on_hold = match lookup(obj, &["on_hold", "onHold"]) {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(invalid("on_hold", "must be a boolean")),
    };

    let deadline = match opt_string(obj, "deadline", &["deadline", "dueDate", "due_date"])? {
        Some(s) => Some(parse_date(&s).ok_or_else(|| invalid("deadline", "must be an ISO-8601 date"))?),
        None => None,
    };

    let registered_at = match opt_string(obj, "registered_at", &["registered_at", "registeredAt"])? {
        Some(s) => Some(
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| invalid("registered_at", "must be an RFC 3339 timestamp"))?,
        ),
        None => None,
    };

    Ok(Record {
        id,
        age_days,
        case_type: opt_string(obj, "case_type", &["case_type", "caseType", "type"])?,
        benefit_category: opt_string(obj, "benefit_category", &["benefit_category", "benefitCategory"])?,
        assigned_unit: opt_string(obj, "assigned_unit", &["assigned_unit", "assignedUnit", "unit"])?,
        assignment_status,
        on_hold,
        hold_reason: opt_string(obj, "hold_reason", &["hold_reason", "holdReason"])?,
        deadline,
        registered_at,
    })
}

fn lookup<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k))
}

fn invalid(field: &'static str, reason: &str) -> CodecErrorKind {
    CodecErrorKind::InvalidField {
        field,
        reason: reason.to_string(),
    }
}

/// Optional string attribute: absent and `null` are both `None`.
fn opt_string(
    obj: &Map<String, Value>,
    field: &'static str,
    keys: &[&str],
) -> Result<Option<String>, CodecErrorKind> {
    match lookup(obj, keys) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(invalid(field, "must be a string")),
    }
}

fn parse_age(value: &Value) -> Result<u32, CodecErrorKind> {
    let n = match value {
        Value::Number(n) => n,
        _ => return Err(invalid("age_days", "must be numeric")),
    };
    if let Some(u) = n.as_u64() {
        return u32::try_from(u).map_err(|_| invalid("age_days", "is out of range"));
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 => Ok(f as u32),
        Some(f) if f < 0.0 => Err(invalid("age_days", "must not be negative")),
        _ => Err(invalid("age_days", "must be a whole number of days")),
    }
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp (date part is kept).
fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
}
