//! Wire protocol of the upstream case stream.
//!
//! The upstream speaks `text/event-stream`. [`SseDecoder`] turns arbitrary
//! byte chunks into [`SseFrame`]s and [`decode`] maps each frame onto the
//! closed set of [`StreamEvent`]s the ingestor understands.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use casestats_core::Record;

use crate::codec::{self, excerpt, CodecError};

/// Event names used by the upstream stream.
pub mod names {
    pub const UPSERT: &str = "upsert";
    pub const DELETE: &str = "delete";
    pub const PROGRESS: &str = "progress";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const COMPLETE: &str = "complete";
    pub const ERROR: &str = "error";
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, `message` when absent.
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: None,
        }
    }
}

/// Incremental `text/event-stream` parser.
///
/// Chunks may split lines (and UTF-8 sequences) anywhere; bytes are buffered
/// until a full line is available.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Option<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing frame that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => match self.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "id" => self.id = Some(value.to_string()),
            // `retry:` and unknown fields carry nothing we act on.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.event.is_none() && self.data.is_none() {
            self.id = None;
            return None;
        }
        Some(SseFrame {
            event: self.event.take().unwrap_or_else(|| "message".to_string()),
            data: self.data.take().unwrap_or_default(),
            id: self.id.take(),
        })
    }
}

/// Decoded upstream event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Upsert(Record),
    Delete { id: String },
    Progress { count: u64, total: Option<u64> },
    Heartbeat,
    Complete,
    Error { reason: String },
}

/// A frame that does not map onto a [`StreamEvent`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("unknown event type '{event}'")]
    UnknownEvent { event: String },

    #[error("malformed {event} payload: {reason} (payload: {payload})")]
    Malformed {
        event: &'static str,
        reason: String,
        payload: String,
    },

    #[error("rejected record: {0}")]
    Record(#[from] CodecError),
}

#[derive(Deserialize)]
struct DeletePayload {
    #[serde(alias = "caseId")]
    id: Value,
}

#[derive(Deserialize)]
struct ProgressPayload {
    count: u64,
    #[serde(default)]
    total: Option<u64>,
}

/// Map a frame onto a typed event, validating its payload.
pub fn decode(frame: &SseFrame) -> Result<StreamEvent, DecodeError> {
    match frame.event.as_str() {
        names::UPSERT => Ok(StreamEvent::Upsert(codec::parse_record(&frame.data)?)),
        names::DELETE => decode_delete(&frame.data),
        names::PROGRESS => {
            let p: ProgressPayload = serde_json::from_str(&frame.data)
                .map_err(|e| malformed(names::PROGRESS, e.to_string(), &frame.data))?;
            Ok(StreamEvent::Progress {
                count: p.count,
                total: p.total,
            })
        }
        names::HEARTBEAT => Ok(StreamEvent::Heartbeat),
        names::COMPLETE => Ok(StreamEvent::Complete),
        names::ERROR => Ok(StreamEvent::Error {
            reason: error_reason(&frame.data),
        }),
        other => Err(DecodeError::UnknownEvent {
            event: other.to_string(),
        }),
    }
}

fn malformed(event: &'static str, reason: String, payload: &str) -> DecodeError {
    DecodeError::Malformed {
        event,
        reason,
        payload: excerpt(payload),
    }
}

/// `{"id": "..."}` or a bare JSON string.
fn decode_delete(data: &str) -> Result<StreamEvent, DecodeError> {
    let id = match serde_json::from_str::<Value>(data) {
        Ok(Value::String(s)) => s,
        Ok(obj @ Value::Object(_)) => {
            let payload: DeletePayload = serde_json::from_value(obj)
                .map_err(|e| malformed(names::DELETE, e.to_string(), data))?;
            match payload.id {
                Value::String(s) => s,
                Value::Number(n) if n.is_u64() || n.is_i64() => n.to_string(),
                _ => return Err(malformed(names::DELETE, "id must be a string".into(), data)),
            }
        }
        Ok(_) => return Err(malformed(names::DELETE, "expected an object with 'id'".into(), data)),
        Err(e) => return Err(malformed(names::DELETE, e.to_string(), data)),
    };
    let id = id.trim();
    if id.is_empty() {
        return Err(malformed(names::DELETE, "id must not be empty".into(), data));
    }
    Ok(StreamEvent::Delete { id: id.to_string() })
}

/// Upstream errors come as `{"reason": ...}`, `{"message": ...}` or plain text.
fn error_reason(data: &str) -> String {
    serde_json::from_str::<Value>(data)
        .ok()
        .and_then(|v| {
            v.get("reason")
                .or_else(|| v.get("message"))
                .and_then(|r| r.as_str().map(String::from))
        })
        .unwrap_or_else(|| {
            let trimmed = data.trim();
            if trimmed.is_empty() {
                "unspecified upstream error".to_string()
            } else {
                excerpt(trimmed)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_split_chunks() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"event: ups").is_empty());
        assert!(dec.push(b"ert\ndata: {\"id\":\"A\",").is_empty());
        let frames = dec.push(b"\"age\":10}\n\n");
        assert_eq!(frames, vec![SseFrame::new("upsert", r#"{"id":"A","age":10}"#)]);
    }

    #[test]
    fn decoder_handles_crlf_comments_and_multiline_data() {
        let mut dec = SseDecoder::new();
        let frames = dec.push(b": keep-alive\r\nevent: error\r\ndata: line one\r\ndata: line two\r\nid: 7\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "error");
        assert_eq!(frames[0].data, "line one\nline two");
        assert_eq!(frames[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn decoder_keeps_utf8_split_across_chunks() {
        let mut dec = SseDecoder::new();
        let payload = "data: {\"unit\":\"Bodø\"}\n\n".as_bytes();
        let split = payload.iter().position(|&b| b == 0xC3).unwrap() + 1;
        assert!(dec.push(&payload[..split]).is_empty());
        let frames = dec.push(&payload[split..]);
        assert_eq!(frames[0].event, "message");
        assert!(frames[0].data.contains("Bodø"));
    }

    #[test]
    fn decoder_dispatches_event_without_data() {
        let mut dec = SseDecoder::new();
        let frames = dec.push(b"event: heartbeat\n\nevent: complete\ndata:\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], SseFrame::new("heartbeat", ""));
        assert_eq!(frames[1], SseFrame::new("complete", ""));
    }

    #[test]
    fn decoder_finish_flushes_unterminated_frame() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"event: complete\ndata: {}").is_empty());
        assert_eq!(dec.finish(), Some(SseFrame::new("complete", "{}")));
        assert_eq!(dec.finish(), None);
    }

    #[test]
    fn decodes_every_event_kind() {
        assert!(matches!(
            decode(&SseFrame::new("upsert", r#"{"id":"A","age":1}"#)).unwrap(),
            StreamEvent::Upsert(r) if r.id == "A"
        ));
        assert_eq!(
            decode(&SseFrame::new("delete", r#"{"id":"A"}"#)).unwrap(),
            StreamEvent::Delete { id: "A".into() }
        );
        assert_eq!(
            decode(&SseFrame::new("delete", r#""B""#)).unwrap(),
            StreamEvent::Delete { id: "B".into() }
        );
        assert_eq!(
            decode(&SseFrame::new("progress", r#"{"count":2,"total":5}"#)).unwrap(),
            StreamEvent::Progress { count: 2, total: Some(5) }
        );
        assert_eq!(
            decode(&SseFrame::new("progress", r#"{"count":2}"#)).unwrap(),
            StreamEvent::Progress { count: 2, total: None }
        );
        assert_eq!(decode(&SseFrame::new("heartbeat", "")).unwrap(), StreamEvent::Heartbeat);
        assert_eq!(decode(&SseFrame::new("complete", "")).unwrap(), StreamEvent::Complete);
        assert_eq!(
            decode(&SseFrame::new("error", r#"{"reason":"rebalancing"}"#)).unwrap(),
            StreamEvent::Error { reason: "rebalancing".into() }
        );
        assert_eq!(
            decode(&SseFrame::new("error", "boom")).unwrap(),
            StreamEvent::Error { reason: "boom".into() }
        );
    }

    #[test]
    fn protocol_violations_are_errors() {
        assert_eq!(
            decode(&SseFrame::new("rename", "{}")).unwrap_err(),
            DecodeError::UnknownEvent { event: "rename".into() }
        );
        assert!(matches!(
            decode(&SseFrame::new("progress", r#"{"count":"two"}"#)).unwrap_err(),
            DecodeError::Malformed { event: "progress", .. }
        ));
        assert!(matches!(
            decode(&SseFrame::new("delete", r#"{"id":""}"#)).unwrap_err(),
            DecodeError::Malformed { event: "delete", .. }
        ));
        assert!(matches!(
            decode(&SseFrame::new("upsert", r#"{"id":"A"}"#)).unwrap_err(),
            DecodeError::Record(_)
        ));
    }
}
