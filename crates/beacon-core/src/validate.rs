//! Structural event validation.
//!
//! The same predicate runs on the write path (before an event enters the
//! buffer) and on the read path (filtering corrupted persisted records), so a
//! damaged store self-heals on next access. The predicate is pure and never
//! panics; invalid input answers `false`.

use serde_json::Value;

use crate::types::{ActivityEvent, EventKind};

/// Structural predicate over the JSON form of an event.
///
/// Rejects when:
/// - the input is not an object,
/// - `kind` is missing, not a string, or not a known capture kind,
/// - `data` is missing or not an object,
/// - `timestamp` is missing,
/// - `data.url` or `data.title` are present but not strings.
pub fn is_valid(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };

    let Some(kind) = obj.get("kind").and_then(Value::as_str) else {
        return false;
    };
    if EventKind::from_name(kind).is_none() {
        return false;
    }

    let Some(Value::Object(data)) = obj.get("data") else {
        return false;
    };
    for key in ["url", "title"] {
        if let Some(v) = data.get(key) {
            if !v.is_string() {
                return false;
            }
        }
    }

    obj.contains_key("timestamp")
}

/// Validate a typed event through the same predicate the read path uses.
pub fn event_is_valid(event: &ActivityEvent) -> bool {
    serde_json::to_value(event).map(|v| is_valid(&v)).unwrap_or(false)
}
