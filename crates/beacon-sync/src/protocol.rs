//! Wire protocol of the ingestion endpoint.
//!
//! `POST /api/activity/activities` accepts at most [`BATCH_SIZE`] records per
//! request and answers `{stored_count, errors?}` on success or `{error}` on
//! failure. The teardown path `POST /api/browser/activities` is fire-and-forget
//! and carries the user id in the body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use beacon_core::{ActivityEvent, SessionId};

/// Per-request item cap. A backend constraint, not a tuning knob.
pub const BATCH_SIZE: usize = 100;

/// Literal substring the server uses to signal activity overload.
pub const OVERLOAD_SIGNAL: &str = "Too many activities";

/// Wire form of one activity event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub activity_type: String,
    pub activity_data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
    pub url: Option<String>,
    pub page_title: Option<String>,
    pub engagement_score: f64,
}

impl From<&ActivityEvent> for ActivityRecord {
    fn from(event: &ActivityEvent) -> Self {
        Self {
            activity_type: event.kind.name().to_string(),
            activity_data: event.data.clone(),
            timestamp: event.timestamp,
            session_id: event.session_id,
            url: event.url().map(str::to_string),
            page_title: event.title().map(str::to_string),
            engagement_score: event.kind.engagement_weight(),
        }
    }
}

/// One upload request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub activities: Vec<ActivityRecord>,
}

impl BatchRequest {
    pub fn from_events<'a, I>(events: I) -> Self
    where
        I: IntoIterator<Item = &'a ActivityEvent>,
    {
        Self {
            activities: events.into_iter().map(ActivityRecord::from).collect(),
        }
    }
}

/// Success response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub stored_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Failure response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body of the fire-and-forget teardown delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownRequest {
    pub user_id: String,
    pub activities: Vec<ActivityRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{EventKind, TabId, UserId};
    use serde_json::json;

    fn make_event() -> ActivityEvent {
        let mut data = Map::new();
        data.insert("url".into(), json!("https://example.com/docs"));
        data.insert("title".into(), json!("Docs"));
        data.insert("element".into(), json!("a#next"));
        ActivityEvent::new(
            EventKind::Click,
            data,
            SessionId::new(),
            TabId::new(),
            UserId::new("u"),
        )
    }

    #[test]
    fn test_record_from_event() {
        let event = make_event();
        let record = ActivityRecord::from(&event);
        assert_eq!(record.activity_type, "click");
        assert_eq!(record.url.as_deref(), Some("https://example.com/docs"));
        assert_eq!(record.page_title.as_deref(), Some("Docs"));
        assert_eq!(record.session_id, event.session_id);
        assert!((record.engagement_score - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_without_url_or_title() {
        let mut event = make_event();
        event.data.clear();
        let record = ActivityRecord::from(&event);
        assert!(record.url.is_none());
        assert!(record.page_title.is_none());
    }

    #[test]
    fn test_batch_request_serialization() {
        let event = make_event();
        let request = BatchRequest::from_events([&event]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["activities"].as_array().unwrap().len(), 1);
        assert_eq!(json["activities"][0]["activity_type"], "click");
        assert!(json["activities"][0]["activity_data"].is_object());
    }

    #[test]
    fn test_batch_response_errors_default_empty() {
        let response: BatchResponse = serde_json::from_str(r#"{"stored_count": 42}"#).unwrap();
        assert_eq!(response.stored_count, 42);
        assert!(response.errors.is_empty());

        let response: BatchResponse =
            serde_json::from_str(r#"{"stored_count": 1, "errors": ["bad record"]}"#).unwrap();
        assert_eq!(response.errors.len(), 1);
    }

    #[test]
    fn test_overload_signal_matches_error_body() {
        let response: ErrorResponse =
            serde_json::from_str(r#"{"error": "Too many activities for user"}"#).unwrap();
        assert!(response.error.contains(OVERLOAD_SIGNAL));
    }
}
