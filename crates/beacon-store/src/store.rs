//! The per-user activity store.
//!
//! All records live under user-scoped string keys in the kv table: the event
//! log (one JSON array), the tracking preference, the background-state record,
//! the capped search-query log, and the cross-instance envelope slot.
//!
//! The event log is always rewritten as a whole (read-merge-write). Every
//! record is re-validated on read, so a corrupted log self-heals on the next
//! flush. Writers from sibling instances can race; the merge is an idempotent
//! union keyed by event id, so interleaved read-merge-write cycles converge.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use beacon_core::{
    is_valid, ActivityEvent, BackgroundState, SearchQueryRecord, TabEnvelope,
    TrackingPreference, UserId,
};

use crate::db::Database;
use crate::error::StoreError;
use crate::retention::RetentionPolicy;

/// Upper bound on the search-query log.
pub const SEARCH_QUERY_CAP: usize = 50;

/// Statistics from one flush cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Events in the log after the write.
    pub stored: usize,
    /// Records dropped by the validator (persisted or buffered).
    pub dropped_invalid: usize,
    /// Events removed by the retention window.
    pub evicted: usize,
}

/// Statistics from an emergency compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactStats {
    /// Events discarded outright.
    pub discarded: usize,
    /// Events retained (and written off as synced).
    pub retained: usize,
}

/// Event-log counts for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCounts {
    pub total: usize,
    pub unsynced: usize,
}

/// User-scoped persistence over the shared [`Database`].
pub struct ActivityStore {
    db: Arc<Database>,
    policy: RetentionPolicy,
}

impl ActivityStore {
    pub fn new(db: Arc<Database>, policy: RetentionPolicy) -> Self {
        Self { db, policy }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    fn events_key(user: &UserId) -> String {
        format!("activity:{}:events", user.as_str())
    }

    fn preference_key(user: &UserId) -> String {
        format!("activity:{}:preference", user.as_str())
    }

    fn background_key(user: &UserId) -> String {
        format!("activity:{}:background", user.as_str())
    }

    fn queries_key(user: &UserId) -> String {
        format!("activity:{}:queries", user.as_str())
    }

    fn envelope_key(user: &UserId) -> String {
        format!("activity:{}:envelope", user.as_str())
    }

    // =========================================================================
    // Event log
    // =========================================================================

    /// Load the event log, dropping any record the validator rejects.
    ///
    /// A log blob that fails to parse entirely degrades to an empty log.
    pub fn load_events(&self, user: &UserId) -> Result<Vec<ActivityEvent>, StoreError> {
        let Some(raw) = self.db.get(&Self::events_key(user))? else {
            return Ok(Vec::new());
        };
        let parsed: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(user = user.as_str(), error = %e, "Event log unreadable; starting empty");
                return Ok(Vec::new());
            }
        };
        let Value::Array(items) = parsed else {
            warn!(user = user.as_str(), "Event log is not an array; starting empty");
            return Ok(Vec::new());
        };

        let mut events = Vec::with_capacity(items.len());
        let mut dropped = 0usize;
        for item in items {
            if !is_valid(&item) {
                dropped += 1;
                continue;
            }
            match serde_json::from_value::<ActivityEvent>(item) {
                Ok(event) => events.push(event),
                Err(_) => dropped += 1,
            }
        }
        if dropped > 0 {
            warn!(user = user.as_str(), dropped, "Dropped invalid persisted events");
        }
        Ok(events)
    }

    /// Merge buffered events into the persisted log and write it back.
    ///
    /// Persisted and buffered records are both validated (invalid ones are
    /// dropped), merged as a union keyed by event id with `synced` flags
    /// OR-merged, sorted timestamp-descending, bounded by the retention
    /// window, and written in a single store write. Two events sharing a
    /// timestamp have unspecified relative order after the sort.
    pub fn flush_events(
        &self,
        user: &UserId,
        buffered: &[ActivityEvent],
    ) -> Result<FlushStats, StoreError> {
        let existing = self.load_events(user)?;

        let mut dropped_invalid = 0usize;
        let mut merged: BTreeMap<String, ActivityEvent> = BTreeMap::new();
        for event in existing {
            merged.insert(event.id.clone(), event);
        }
        for event in buffered {
            if !beacon_core::event_is_valid(event) {
                dropped_invalid += 1;
                continue;
            }
            match merged.get_mut(&event.id) {
                Some(present) => {
                    // Re-flushed duplicate: keep the synced confirmation from
                    // whichever copy has it.
                    if event.synced && !present.synced {
                        present.synced = true;
                        present.synced_at = event.synced_at;
                    }
                }
                None => {
                    merged.insert(event.id.clone(), event.clone());
                }
            }
        }

        let mut events: Vec<ActivityEvent> = merged.into_values().collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let evicted = self.policy.apply(&mut events, Utc::now());

        self.write_events(user, &events)?;
        debug!(
            user = user.as_str(),
            stored = events.len(),
            dropped_invalid,
            evicted,
            "Event log flushed"
        );
        Ok(FlushStats {
            stored: events.len(),
            dropped_invalid,
            evicted,
        })
    }

    fn write_events(&self, user: &UserId, events: &[ActivityEvent]) -> Result<(), StoreError> {
        let blob = serde_json::to_string(events)?;
        self.db.put(&Self::events_key(user), &blob)
    }

    /// All persisted events not yet confirmed by the backend, newest first.
    pub fn unsynced_events(&self, user: &UserId) -> Result<Vec<ActivityEvent>, StoreError> {
        Ok(self
            .load_events(user)?
            .into_iter()
            .filter(|e| !e.synced)
            .collect())
    }

    /// Persist the synced confirmation for the given event ids.
    pub fn mark_synced(
        &self,
        user: &UserId,
        ids: &HashSet<String>,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut events = self.load_events(user)?;
        let mut marked = 0usize;
        for event in events.iter_mut() {
            if !event.synced && ids.contains(&event.id) {
                event.mark_synced(at);
                marked += 1;
            }
        }
        if marked > 0 {
            self.write_events(user, &events)?;
        }
        Ok(marked)
    }

    /// Event-log counts for one user.
    pub fn counts(&self, user: &UserId) -> Result<StoreCounts, StoreError> {
        let events = self.load_events(user)?;
        let unsynced = events.iter().filter(|e| !e.synced).count();
        Ok(StoreCounts {
            total: events.len(),
            unsynced,
        })
    }

    /// Emergency compaction: retain only the `keep` most recent events and
    /// write them off as synced, discarding the rest.
    pub fn compact(
        &self,
        user: &UserId,
        keep: usize,
        at: DateTime<Utc>,
    ) -> Result<CompactStats, StoreError> {
        let mut events = self.load_events(user)?;
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let discarded = events.len().saturating_sub(keep);
        events.truncate(keep);
        for event in events.iter_mut() {
            if !event.synced {
                event.mark_synced(at);
            }
        }
        self.write_events(user, &events)?;

        warn!(
            user = user.as_str(),
            discarded,
            retained = events.len(),
            "Emergency compaction applied"
        );
        Ok(CompactStats {
            discarded,
            retained: events.len(),
        })
    }

    // =========================================================================
    // Tracking preference
    // =========================================================================

    /// Read the tracking preference; absent or unreadable records answer the
    /// default (disabled).
    pub fn preference(&self, user: &UserId) -> Result<TrackingPreference, StoreError> {
        match self.db.get(&Self::preference_key(user))? {
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
            None => Ok(TrackingPreference::default()),
        }
    }

    pub fn set_preference(&self, user: &UserId, enabled: bool) -> Result<(), StoreError> {
        let pref = if enabled {
            TrackingPreference::enabled_now()
        } else {
            TrackingPreference::disabled_now()
        };
        let blob = serde_json::to_string(&pref)?;
        self.db.put(&Self::preference_key(user), &blob)
    }

    /// Preference read for hot paths: any storage failure gates to disabled.
    pub fn is_enabled(&self, user: &UserId) -> bool {
        match self.preference(user) {
            Ok(pref) => pref.enabled,
            Err(e) => {
                warn!(user = user.as_str(), error = %e, "Preference read failed; treating as disabled");
                false
            }
        }
    }

    // =========================================================================
    // Background state
    // =========================================================================

    pub fn background_state(&self, user: &UserId) -> Result<Option<BackgroundState>, StoreError> {
        match self.db.get(&Self::background_key(user))? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    pub fn set_background_state(
        &self,
        user: &UserId,
        state: &BackgroundState,
    ) -> Result<(), StoreError> {
        let blob = serde_json::to_string(state)?;
        self.db.put(&Self::background_key(user), &blob)
    }

    // =========================================================================
    // Search-query log
    // =========================================================================

    /// Prepend a query to the capped, most-recent-first query log.
    pub fn push_search_query(&self, user: &UserId, query: &str) -> Result<(), StoreError> {
        let mut log = self.search_queries(user)?;
        log.insert(
            0,
            SearchQueryRecord {
                query: query.to_string(),
                recorded_at: Utc::now(),
            },
        );
        log.truncate(SEARCH_QUERY_CAP);
        let blob = serde_json::to_string(&log)?;
        self.db.put(&Self::queries_key(user), &blob)
    }

    pub fn search_queries(&self, user: &UserId) -> Result<Vec<SearchQueryRecord>, StoreError> {
        match self.db.get(&Self::queries_key(user))? {
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    // =========================================================================
    // Cross-instance envelope slot
    // =========================================================================

    /// Overwrite the one-slot envelope record for this user.
    pub fn put_envelope(&self, user: &UserId, envelope: &TabEnvelope) -> Result<(), StoreError> {
        let blob = serde_json::to_string(envelope)?;
        self.db.put(&Self::envelope_key(user), &blob)
    }

    pub fn envelope(&self, user: &UserId) -> Result<Option<TabEnvelope>, StoreError> {
        match self.db.get(&Self::envelope_key(user))? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{EventKind, SessionId, TabId};
    use serde_json::Map;

    fn make_store() -> ActivityStore {
        ActivityStore::new(
            Arc::new(Database::in_memory().unwrap()),
            RetentionPolicy::new(1000, 7),
        )
    }

    fn user() -> UserId {
        UserId::new("u-1")
    }

    fn make_event(kind: EventKind) -> ActivityEvent {
        let mut data = Map::new();
        data.insert("url".into(), Value::String("https://example.com".into()));
        ActivityEvent::new(kind, data, SessionId::new(), TabId::new(), user())
    }

    #[test]
    fn test_empty_log() {
        let store = make_store();
        assert!(store.load_events(&user()).unwrap().is_empty());
        assert_eq!(
            store.counts(&user()).unwrap(),
            StoreCounts {
                total: 0,
                unsynced: 0
            }
        );
    }

    #[test]
    fn test_flush_and_load() {
        let store = make_store();
        let events = vec![make_event(EventKind::Click), make_event(EventKind::Scroll)];
        let stats = store.flush_events(&user(), &events).unwrap();
        assert_eq!(stats.stored, 2);
        assert_eq!(stats.dropped_invalid, 0);

        let loaded = store.load_events(&user()).unwrap();
        assert_eq!(loaded.len(), 2);
        // Sorted newest first.
        assert!(loaded[0].timestamp >= loaded[1].timestamp);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let store = make_store();
        let events = vec![make_event(EventKind::Click), make_event(EventKind::Click)];
        store.flush_events(&user(), &events).unwrap();
        let stats = store.flush_events(&user(), &events).unwrap();
        assert_eq!(stats.stored, 2);
        assert_eq!(store.load_events(&user()).unwrap().len(), 2);
    }

    #[test]
    fn test_flush_drops_invalid_buffered_event() {
        let store = make_store();
        let mut bad = make_event(EventKind::Click);
        bad.data
            .insert("url".into(), Value::Number(serde_json::Number::from(5)));
        let stats = store
            .flush_events(&user(), &[bad, make_event(EventKind::Scroll)])
            .unwrap();
        assert_eq!(stats.stored, 1);
        assert_eq!(stats.dropped_invalid, 1);
    }

    #[test]
    fn test_corrupted_log_self_heals() {
        let store = make_store();
        store
            .database()
            .put("activity:u-1:events", "[{\"kind\":\"unknown\"}, 42]")
            .unwrap();
        assert!(store.load_events(&user()).unwrap().is_empty());

        // A flush replaces the corrupted contents with valid records only.
        store
            .flush_events(&user(), &[make_event(EventKind::PageView)])
            .unwrap();
        assert_eq!(store.load_events(&user()).unwrap().len(), 1);
    }

    #[test]
    fn test_unreadable_blob_degrades_to_empty() {
        let store = make_store();
        store.database().put("activity:u-1:events", "not-json").unwrap();
        assert!(store.load_events(&user()).unwrap().is_empty());
    }

    #[test]
    fn test_mark_synced() {
        let store = make_store();
        let events = vec![make_event(EventKind::Click), make_event(EventKind::Scroll)];
        let ids: HashSet<String> = events.iter().map(|e| e.id.clone()).collect();
        store.flush_events(&user(), &events).unwrap();

        let marked = store.mark_synced(&user(), &ids, Utc::now()).unwrap();
        assert_eq!(marked, 2);
        assert!(store.unsynced_events(&user()).unwrap().is_empty());
        assert!(store
            .load_events(&user())
            .unwrap()
            .iter()
            .all(|e| e.synced && e.synced_at.is_some()));
    }

    #[test]
    fn test_synced_flag_survives_reflush() {
        let store = make_store();
        let event = make_event(EventKind::Click);
        let ids: HashSet<String> = [event.id.clone()].into();
        store.flush_events(&user(), &[event.clone()]).unwrap();
        store.mark_synced(&user(), &ids, Utc::now()).unwrap();

        // Re-flushing the stale unsynced copy must not clear the flag.
        store.flush_events(&user(), &[event]).unwrap();
        assert!(store.unsynced_events(&user()).unwrap().is_empty());
    }

    #[test]
    fn test_retention_cap_enforced_on_flush() {
        let store = ActivityStore::new(
            Arc::new(Database::in_memory().unwrap()),
            RetentionPolicy::new(5, 7),
        );
        let events: Vec<ActivityEvent> =
            (0..12).map(|_| make_event(EventKind::Click)).collect();
        let stats = store.flush_events(&user(), &events).unwrap();
        assert_eq!(stats.stored, 5);
        assert_eq!(stats.evicted, 7);
        assert_eq!(store.load_events(&user()).unwrap().len(), 5);
    }

    #[test]
    fn test_unsynced_survive_retention() {
        let store = ActivityStore::new(
            Arc::new(Database::in_memory().unwrap()),
            RetentionPolicy::new(4, 7),
        );
        let mut events: Vec<ActivityEvent> = Vec::new();
        for i in 0..8 {
            let mut e = make_event(EventKind::Click);
            e.timestamp = Utc::now() - chrono::Duration::minutes(i);
            if i % 2 == 0 {
                e.mark_synced(e.timestamp);
            }
            events.push(e);
        }
        store.flush_events(&user(), &events).unwrap();

        let stored = store.load_events(&user()).unwrap();
        assert_eq!(stored.len(), 4);
        assert_eq!(stored.iter().filter(|e| !e.synced).count(), 4);
    }

    #[test]
    fn test_compact_keeps_most_recent_and_marks_synced() {
        let store = make_store();
        let mut events: Vec<ActivityEvent> = Vec::new();
        for i in 0..10 {
            let mut e = make_event(EventKind::Navigation);
            e.timestamp = Utc::now() - chrono::Duration::seconds(i);
            events.push(e);
        }
        let newest = events[0].id.clone();
        store.flush_events(&user(), &events).unwrap();

        let stats = store.compact(&user(), 3, Utc::now()).unwrap();
        assert_eq!(stats.discarded, 7);
        assert_eq!(stats.retained, 3);

        let remaining = store.load_events(&user()).unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(remaining.iter().all(|e| e.synced));
        assert_eq!(remaining[0].id, newest);
        assert!(store.unsynced_events(&user()).unwrap().is_empty());
    }

    #[test]
    fn test_preference_defaults_disabled() {
        let store = make_store();
        assert!(!store.preference(&user()).unwrap().enabled);
        assert!(!store.is_enabled(&user()));

        store.set_preference(&user(), true).unwrap();
        assert!(store.is_enabled(&user()));

        store.set_preference(&user(), false).unwrap();
        assert!(!store.is_enabled(&user()));
    }

    #[test]
    fn test_background_state_round_trip() {
        let store = make_store();
        assert!(store.background_state(&user()).unwrap().is_none());

        let state = BackgroundState::started(SessionId::new());
        store.set_background_state(&user(), &state).unwrap();
        let loaded = store.background_state(&user()).unwrap().unwrap();
        assert_eq!(loaded.session_id, state.session_id);
    }

    #[test]
    fn test_search_query_log_capped_most_recent_first() {
        let store = make_store();
        for i in 0..(SEARCH_QUERY_CAP + 10) {
            store
                .push_search_query(&user(), &format!("query {}", i))
                .unwrap();
        }
        let log = store.search_queries(&user()).unwrap();
        assert_eq!(log.len(), SEARCH_QUERY_CAP);
        assert_eq!(log[0].query, format!("query {}", SEARCH_QUERY_CAP + 9));
    }

    #[test]
    fn test_envelope_slot_overwrites() {
        let store = make_store();
        assert!(store.envelope(&user()).unwrap().is_none());

        let first = make_event(EventKind::Click);
        let origin = first.tab_id;
        store
            .put_envelope(&user(), &TabEnvelope::new(first, origin))
            .unwrap();

        let second = make_event(EventKind::Scroll);
        let second_id = second.id.clone();
        store
            .put_envelope(&user(), &TabEnvelope::new(second, origin))
            .unwrap();

        let slot = store.envelope(&user()).unwrap().unwrap();
        assert_eq!(slot.event.id, second_id);
    }

    #[test]
    fn test_users_are_isolated() {
        let store = make_store();
        let other = UserId::new("u-2");
        store
            .flush_events(&user(), &[make_event(EventKind::Click)])
            .unwrap();
        assert!(store.load_events(&other).unwrap().is_empty());
    }
}
