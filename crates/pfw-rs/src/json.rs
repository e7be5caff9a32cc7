//! Single-line JSON validation and event identity extraction.
//!
//! Trace bodies are JSON arrays with one object per line; interior lines
//! usually carry a trailing comma and the first and last lines are the bare
//! array delimiters. Validation is a per-line trim-and-check that never
//! errors: a line either yields its trimmed object bytes or it is a drop.

use serde_json::Value;

/// Strip surrounding whitespace and one trailing comma, then require the
/// remainder to parse as a complete JSON object. Returns the trimmed slice.
pub fn trim_and_validate(line: &[u8]) -> Option<&[u8]> {
    let mut s = trim_ascii(line);
    if let [head @ .., b','] = s {
        s = trim_ascii_end(head);
    }
    if s.is_empty() || s[0] != b'{' {
        return None;
    }
    match serde_json::from_slice::<Value>(s) {
        Ok(Value::Object(_)) => Some(s),
        _ => None,
    }
}

/// Identity triple used for verification. `id < 0` marks an event that had
/// no usable `id` field.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct EventId {
    pub id: i64,
    pub pid: i64,
    pub tid: i64,
}

impl EventId {
    pub fn invalid() -> EventId {
        EventId {
            id: -1,
            pid: -1,
            tid: -1,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.id >= 0
    }
}

/// Pull `(id, pid, tid)` out of one JSON object line; missing or
/// non-integer fields become -1.
pub fn extract_event_id(json: &[u8]) -> EventId {
    let value: Value = match serde_json::from_slice(json) {
        Ok(v) => v,
        Err(_) => return EventId::invalid(),
    };
    if !value.is_object() {
        return EventId::invalid();
    }
    let field = |name: &str| value.get(name).and_then(Value::as_i64).unwrap_or(-1);
    EventId {
        id: field("id"),
        pid: field("pid"),
        tid: field("tid"),
    }
}

fn trim_ascii(mut s: &[u8]) -> &[u8] {
    while let [b, rest @ ..] = s {
        if b.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    trim_ascii_end(s)
}

fn trim_ascii_end(mut s: &[u8]) -> &[u8] {
    while let [rest @ .., b] = s {
        if b.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    s
}
