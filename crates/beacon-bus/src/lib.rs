//! Beacon Bus crate - cross-instance envelope broadcast.
//!
//! An explicit publish/subscribe channel between client instances of the same
//! user, carrying [`TabEnvelope`] records with the sender's tab id. The
//! dispatch is explicit: a publish reaches every current subscriber even when
//! the envelope equals one they have already seen. Self-suppression is the
//! subscriber's job, by comparing `origin_tab` against its own id.
//!
//! Delivery is best effort. A publish with no live subscribers is not an
//! error, and a slow subscriber that lags past the channel capacity loses the
//! oldest envelopes -- the durable store, not the bus, is the source of truth.

use tokio::sync::broadcast;
use tracing::debug;

use beacon_core::TabEnvelope;

/// Default envelope channel capacity.
const DEFAULT_CAPACITY: usize = 64;

/// Shared broadcast channel between sibling instances.
///
/// Cloning a `TabBus` yields another handle onto the same channel.
#[derive(Clone)]
pub struct TabBus {
    tx: broadcast::Sender<TabEnvelope>,
}

impl TabBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Dispatch an envelope to every current subscriber.
    ///
    /// Returns the number of subscribers reached; zero when none are
    /// listening (not an error).
    pub fn publish(&self, envelope: TabEnvelope) -> usize {
        match self.tx.send(envelope) {
            Ok(n) => n,
            Err(_) => {
                debug!("Envelope published with no subscribers");
                0
            }
        }
    }

    /// Subscribe to envelopes published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<TabEnvelope> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for TabBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{ActivityEvent, EventKind, SessionId, TabId, UserId};
    use serde_json::Map;

    fn make_envelope() -> TabEnvelope {
        let event = ActivityEvent::new(
            EventKind::Click,
            Map::new(),
            SessionId::new(),
            TabId::new(),
            UserId::new("u"),
        );
        let origin = event.tab_id;
        TabEnvelope::new(event, origin)
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = TabBus::new();
        let mut rx = bus.subscribe();

        let envelope = make_envelope();
        let id = envelope.event.id.clone();
        assert_eq!(bus.publish(envelope), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event.id, id);
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = TabBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.publish(make_envelope()), 2);
        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = TabBus::new();
        assert_eq!(bus.publish(make_envelope()), 0);
    }

    #[tokio::test]
    async fn test_identical_envelopes_each_dispatch() {
        let bus = TabBus::new();
        let mut rx = bus.subscribe();

        let envelope = make_envelope();
        bus.publish(envelope.clone());
        bus.publish(envelope.clone());

        assert!(rx.recv().await.is_ok());
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_cloned_bus_shares_channel() {
        let bus = TabBus::new();
        let clone = bus.clone();
        let mut rx = bus.subscribe();

        clone.publish(make_envelope());
        assert!(rx.recv().await.is_ok());
        assert_eq!(bus.subscriber_count(), 1);
    }
}
