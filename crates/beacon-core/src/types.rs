use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// The closed set of capture kinds.
///
/// The validator rejects any record whose `kind` is not one of these names,
/// so unknown kinds never reach the buffer or the durable store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A page/view became visible.
    PageView,
    /// A pointer click on an interactive element.
    Click,
    /// A scroll gesture past the report threshold.
    Scroll,
    /// An in-origin navigation.
    Navigation,
    /// A query the producer classified as search-related.
    SearchQuery,
    /// A text selection.
    Selection,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [EventKind; 6] = [
        EventKind::PageView,
        EventKind::Click,
        EventKind::Scroll,
        EventKind::Navigation,
        EventKind::SearchQuery,
        EventKind::Selection,
    ];

    /// The wire/storage name of the kind.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::PageView => "page_view",
            EventKind::Click => "click",
            EventKind::Scroll => "scroll",
            EventKind::Navigation => "navigation",
            EventKind::SearchQuery => "search_query",
            EventKind::Selection => "selection",
        }
    }

    /// Parse a wire/storage name. Returns `None` for unknown names.
    pub fn from_name(name: &str) -> Option<EventKind> {
        EventKind::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Fixed engagement weight reported to the ingestion endpoint.
    pub fn engagement_weight(&self) -> f64 {
        match self {
            EventKind::PageView => 1.0,
            EventKind::Click => 2.0,
            EventKind::Scroll => 0.5,
            EventKind::Navigation => 1.0,
            EventKind::SearchQuery => 3.0,
            EventKind::Selection => 1.5,
        }
    }
}

// =============================================================================
// Newtype Wrappers - Identity
// =============================================================================

/// Unique identifier for one client instance ("tab"). Fresh per process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(pub Uuid);

impl TabId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for one tracking session (enable → stop).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque user identity. Scopes every durable-store key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Entity Structs
// =============================================================================

/// One captured user-interaction record.
///
/// Events are immutable after capture except for the `synced`/`synced_at`
/// pair, which the uploader sets once the backend confirms acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Opaque unique id, assigned at capture time.
    pub id: String,
    pub kind: EventKind,
    /// Free-form context payload. `url` and `title`, when present, must be
    /// strings; the validator enforces this.
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
    pub tab_id: TabId,
    pub user_id: UserId,
    #[serde(default)]
    pub synced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
    /// True when the event was ingested from a sibling instance. Peer events
    /// are never re-broadcast.
    #[serde(default)]
    pub from_peer: bool,
}

impl ActivityEvent {
    /// Synthesize a new event at the current instant.
    pub fn new(
        kind: EventKind,
        data: Map<String, Value>,
        session_id: SessionId,
        tab_id: TabId,
        user_id: UserId,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            data,
            timestamp: Utc::now(),
            session_id,
            tab_id,
            user_id,
            synced: false,
            synced_at: None,
            from_peer: false,
        }
    }

    /// Mark the event as accepted by the backend.
    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.synced = true;
        self.synced_at = Some(at);
    }

    /// Convenience accessors into the data payload.
    pub fn url(&self) -> Option<&str> {
        self.data.get("url").and_then(Value::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.data.get("title").and_then(Value::as_str)
    }
}

/// Durable per-user tracking switch. Defaults to disabled; every capture and
/// sync path reads this before acting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingPreference {
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl Default for TrackingPreference {
    fn default() -> Self {
        Self {
            enabled: false,
            updated_at: Utc::now(),
        }
    }
}

impl TrackingPreference {
    pub fn enabled_now() -> Self {
        Self {
            enabled: true,
            updated_at: Utc::now(),
        }
    }

    pub fn disabled_now() -> Self {
        Self {
            enabled: false,
            updated_at: Utc::now(),
        }
    }
}

/// The single-slot cross-instance broadcast record. Overwritten on every
/// publish; not an append log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabEnvelope {
    pub event: ActivityEvent,
    pub published_at_ms: i64,
    pub origin_tab: TabId,
}

impl TabEnvelope {
    pub fn new(event: ActivityEvent, origin_tab: TabId) -> Self {
        Self {
            event,
            published_at_ms: Utc::now().timestamp_millis(),
            origin_tab,
        }
    }
}

/// Durable per-user session bookkeeping, written on session start and after
/// each successful upload cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundState {
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl BackgroundState {
    pub fn started(session_id: SessionId) -> Self {
        Self {
            session_id,
            started_at: Utc::now(),
            last_sync_at: None,
        }
    }
}

/// One entry of the capped search-query log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQueryRecord {
    pub query: String,
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================
