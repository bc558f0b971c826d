//! Retention window over the persisted event log.
//!
//! The log is a bounded ring, most-recent-first. Unsynced events are retained
//! regardless of age; synced events past the horizon are evicted first. The
//! drop order when over capacity is: synced-and-stale, then synced-and-recent,
//! then (only when they alone exceed the cap) unsynced, oldest first within
//! each class.

use chrono::{DateTime, Duration, Utc};

use beacon_core::ActivityEvent;

/// Eviction parameters for one user's log.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Most events held per user.
    pub max_activities: usize,
    /// Synced events older than this are first in line for eviction.
    pub horizon: Duration,
}

impl RetentionPolicy {
    pub fn new(max_activities: usize, retention_days: u32) -> Self {
        Self {
            max_activities,
            horizon: Duration::days(i64::from(retention_days)),
        }
    }

    /// Apply the policy to a timestamp-descending event list in place.
    ///
    /// Returns the number of evicted events.
    pub fn apply(&self, events: &mut Vec<ActivityEvent>, now: DateTime<Utc>) -> usize {
        if events.len() <= self.max_activities {
            return 0;
        }

        let stale_before = now - self.horizon;
        let mut to_drop = events.len() - self.max_activities;
        let mut dropped = vec![false; events.len()];

        // Three passes in eviction-priority order; the list is newest-first,
        // so walking from the back visits oldest first.
        let stale_synced = |e: &ActivityEvent| e.synced && e.timestamp < stale_before;
        let any_synced = |e: &ActivityEvent| e.synced;
        let any = |_: &ActivityEvent| true;
        let passes: [&dyn Fn(&ActivityEvent) -> bool; 3] = [&stale_synced, &any_synced, &any];
        for pass in passes {
            if to_drop == 0 {
                break;
            }
            for i in (0..events.len()).rev() {
                if to_drop == 0 {
                    break;
                }
                if !dropped[i] && pass(&events[i]) {
                    dropped[i] = true;
                    to_drop -= 1;
                }
            }
        }

        let mut idx = 0;
        let before = events.len();
        events.retain(|_| {
            let keep = !dropped[idx];
            idx += 1;
            keep
        });
        before - events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{EventKind, SessionId, TabId, UserId};
    use serde_json::Map;

    fn event_at(age_days: i64, synced: bool) -> ActivityEvent {
        let mut e = ActivityEvent::new(
            EventKind::Click,
            Map::new(),
            SessionId::new(),
            TabId::new(),
            UserId::new("u"),
        );
        e.timestamp = Utc::now() - Duration::days(age_days);
        if synced {
            e.mark_synced(e.timestamp);
        }
        e
    }

    fn sorted_desc(mut events: Vec<ActivityEvent>) -> Vec<ActivityEvent> {
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events
    }

    #[test]
    fn test_under_cap_is_untouched() {
        let policy = RetentionPolicy::new(10, 7);
        let mut events = sorted_desc(vec![event_at(30, true), event_at(1, false)]);
        assert_eq!(policy.apply(&mut events, Utc::now()), 0);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_stale_synced_dropped_first() {
        let policy = RetentionPolicy::new(3, 7);
        let mut events = sorted_desc(vec![
            event_at(0, false),
            event_at(1, true),
            event_at(2, false),
            event_at(30, true), // the only stale synced entry
        ]);
        let evicted = policy.apply(&mut events, Utc::now());
        assert_eq!(evicted, 1);
        assert!(events.iter().all(|e| e.timestamp > Utc::now() - Duration::days(10)));
    }

    #[test]
    fn test_unsynced_survive_over_synced() {
        let policy = RetentionPolicy::new(4, 7);
        let mut events = sorted_desc(vec![
            event_at(0, true),
            event_at(1, false),
            event_at(2, true),
            event_at(3, false),
            event_at(4, true),
            event_at(5, false),
        ]);
        let evicted = policy.apply(&mut events, Utc::now());
        assert_eq!(evicted, 2);
        assert_eq!(events.len(), 4);
        // All three unsynced events survive; the two oldest synced are gone.
        assert_eq!(events.iter().filter(|e| !e.synced).count(), 3);
        assert_eq!(events.iter().filter(|e| e.synced).count(), 1);
        assert!(events.iter().any(|e| e.synced)); // the newest synced one
    }

    #[test]
    fn test_unsynced_evicted_only_as_last_resort() {
        let policy = RetentionPolicy::new(2, 7);
        let mut events = sorted_desc(vec![
            event_at(0, false),
            event_at(1, false),
            event_at(2, false),
            event_at(3, false),
        ]);
        let evicted = policy.apply(&mut events, Utc::now());
        assert_eq!(evicted, 2);
        // Oldest unsynced dropped; newest retained.
        assert_eq!(events.len(), 2);
        assert!(events[0].timestamp > events[1].timestamp);
        assert!(events.iter().all(|e| !e.synced));
    }

    #[test]
    fn test_cap_holds_for_large_logs() {
        let policy = RetentionPolicy::new(50, 7);
        let mut events = sorted_desc((0..200).map(|i| event_at(i % 20, i % 3 == 0)).collect());
        policy.apply(&mut events, Utc::now());
        assert!(events.len() <= 50);
    }
}
