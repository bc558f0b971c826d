//! Beacon Tracker crate - the activity tracking service object.
//!
//! A [`Tracker`] owns the capture buffer for one client instance and wires the
//! pipeline together: producers call [`Tracker::record`], events flow through
//! validation into the buffer, then to the durable store on a debounced flush
//! and to sibling instances over the bus, and the dual-timer scheduler decides
//! when the batch uploader pushes the backlog to the ingestion service.
//!
//! There is no process-wide singleton: the application entry point constructs
//! the tracker, calls [`Tracker::start`], and owns its shutdown. None of the
//! public operations raise; failures are logged and absorbed, and only
//! eventual server-side visibility degrades.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use beacon_bus::TabBus;
use beacon_core::{
    event_is_valid, ActivityEvent, BackgroundState, BeaconConfig, EventKind, SessionId, TabEnvelope,
    TabId, UserId,
};
use beacon_store::ActivityStore;
use beacon_sync::{
    BatchUploader, IngestClient, QuietWindow, SyncOutcome, SyncScheduler, TokenProvider,
    UploaderConfig,
};

/// The per-instance tracking service.
///
/// Cloning yields another handle onto the same instance.
pub struct Tracker<C, T> {
    inner: Arc<TrackerInner<C, T>>,
}

impl<C, T> Clone for Tracker<C, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct TrackerInner<C, T> {
    user: UserId,
    tab: TabId,
    session: SessionId,
    store: Arc<ActivityStore>,
    bus: TabBus,
    uploader: BatchUploader<C, T>,
    buffer: Mutex<Vec<ActivityEvent>>,
    flush_window: QuietWindow,
    scheduler: SyncScheduler,
    retry_delay: Duration,
    backlog_high_water: usize,
    compact_keep_recent: usize,
    shutdown: tokio::sync::Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<C, T> Tracker<C, T>
where
    C: IngestClient + 'static,
    T: TokenProvider + 'static,
{
    pub fn new(
        config: &BeaconConfig,
        store: Arc<ActivityStore>,
        bus: TabBus,
        client: C,
        tokens: T,
    ) -> Self {
        let user = UserId::new(config.general.user_id.clone());
        let uploader = BatchUploader::new(
            Arc::clone(&store),
            client,
            tokens,
            user.clone(),
            UploaderConfig {
                batch_delay: Duration::from_millis(config.sync.batch_delay_ms),
                compact_keep_recent: config.sync.compact_keep_recent,
            },
        );
        Self {
            inner: Arc::new(TrackerInner {
                user,
                tab: TabId::new(),
                session: SessionId::new(),
                store,
                bus,
                uploader,
                buffer: Mutex::new(Vec::new()),
                flush_window: QuietWindow::new(Duration::from_millis(
                    config.tracking.persist_debounce_ms,
                )),
                scheduler: SyncScheduler::new(
                    Duration::from_millis(config.sync.debounce_ms),
                    Duration::from_millis(config.sync.max_wait_ms),
                ),
                retry_delay: Duration::from_millis(config.sync.retry_delay_ms),
                backlog_high_water: config.sync.backlog_high_water,
                compact_keep_recent: config.sync.compact_keep_recent,
                shutdown: tokio::sync::Notify::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn tab_id(&self) -> TabId {
        self.inner.tab
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.session
    }

    /// Events buffered but not yet flushed to the store.
    pub fn pending_events(&self) -> usize {
        self.inner.buffer.lock().unwrap().len()
    }

    /// Spawn the background loops: debounced persistence, scheduled sync, and
    /// bus ingestion. Idempotent only in the sense that it should be called
    /// once, from the owner of the tracker's lifecycle.
    pub fn start(&self) {
        let mut tasks = self.inner.tasks.lock().unwrap();

        // Debounced persistence loop.
        {
            let inner = Arc::clone(&self.inner);
            let signal = inner.flush_window.signal();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = inner.shutdown.notified() => break,
                        _ = signal.notified() => inner.flush(),
                    }
                }
            }));
        }

        // Scheduled sync loop.
        {
            let inner = Arc::clone(&self.inner);
            let signal = inner.scheduler.signal();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = inner.shutdown.notified() => break,
                        _ = signal.notified() => {
                            // Persist stragglers so the uploader sees them.
                            inner.flush();
                            let outcome = inner.uploader.sync().await;
                            inner.after_sync(&outcome);
                        }
                    }
                }
            }));
        }

        // Bus ingestion loop.
        {
            let inner = Arc::clone(&self.inner);
            let mut rx = inner.bus.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = inner.shutdown.notified() => break,
                        received = rx.recv() => match received {
                            Ok(envelope) => inner.ingest_envelope(envelope),
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                                debug!(missed, "Bus subscriber lagged; envelopes dropped");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
            }));
        }

        info!(tab = ?self.inner.tab.0, session = ?self.inner.session.0, "Tracker started");
    }

    /// Turn tracking on for this user and reset the session bookkeeping.
    pub fn enable(&self) {
        if let Err(e) = self.inner.store.set_preference(&self.inner.user, true) {
            warn!(error = %e, "Could not persist tracking preference");
            return;
        }
        let state = BackgroundState::started(self.inner.session);
        if let Err(e) = self.inner.store.set_background_state(&self.inner.user, &state) {
            warn!(error = %e, "Could not persist background state");
        }
        info!(user = self.inner.user.as_str(), "Tracking enabled");
    }

    /// Turn tracking off. Events captured before the switch are still
    /// persisted and uploaded once; afterwards the timers are torn down.
    pub async fn disable(&self) {
        if let Err(e) = self.inner.store.set_preference(&self.inner.user, false) {
            warn!(error = %e, "Could not persist tracking preference");
        }
        self.inner.flush();
        let outcome = self.inner.uploader.sync().await;
        debug!(outcome = ?outcome, "Final upload after disable");
        self.inner.scheduler.cancel();
        self.inner.flush_window.cancel();
        info!(user = self.inner.user.as_str(), "Tracking disabled");
    }

    /// Capture one event. A no-op unless tracking is enabled; invalid events
    /// are dropped with a log line, never an error.
    pub fn record(&self, kind: EventKind, data: Map<String, Value>) {
        if !self.inner.store.is_enabled(&self.inner.user) {
            return;
        }
        let event = ActivityEvent::new(
            kind,
            data,
            self.inner.session,
            self.inner.tab,
            self.inner.user.clone(),
        );
        if !event_is_valid(&event) {
            warn!(kind = kind.name(), "Dropping structurally invalid event");
            return;
        }
        self.inner.buffer_event(event.clone());
        self.inner.broadcast(event);
    }

    /// Append to the capped, most-recent-first search-query log.
    pub fn record_search_query(&self, query: &str) {
        if !self.inner.store.is_enabled(&self.inner.user) {
            return;
        }
        if let Err(e) = self.inner.store.push_search_query(&self.inner.user, query) {
            warn!(error = %e, "Could not persist search query");
        }
    }

    /// Flush the buffer to the durable store immediately.
    pub fn flush_now(&self) {
        self.inner.flush();
    }

    /// Run one upload cycle immediately (flushing first).
    pub async fn sync_now(&self) -> SyncOutcome {
        self.inner.flush();
        let outcome = self.inner.uploader.sync().await;
        self.inner.after_sync(&outcome);
        outcome
    }

    /// Tear the instance down: cancel timers, stop the loops, perform one
    /// final flush and upload attempt, and fire the teardown beacon for
    /// whatever is still unsynced.
    pub async fn stop(&self) {
        self.inner.scheduler.cancel();
        self.inner.flush_window.cancel();
        self.inner.shutdown.notify_waiters();
        for task in self.inner.tasks.lock().unwrap().drain(..) {
            task.abort();
        }

        self.inner.flush();
        let outcome = self.inner.uploader.sync().await;
        debug!(outcome = ?outcome, "Final upload at stop");
        self.inner.uploader.send_teardown().await;
        info!(tab = ?self.inner.tab.0, "Tracker stopped");
    }
}

impl<C, T> TrackerInner<C, T>
where
    C: IngestClient + 'static,
    T: TokenProvider + 'static,
{
    /// Append to the buffer and arm both the persistence window and the sync
    /// scheduler. The caller has already checked the tracking preference.
    fn buffer_event(&self, event: ActivityEvent) {
        self.buffer.lock().unwrap().push(event);
        self.flush_window.poke();
        self.scheduler.on_event();
    }

    /// Best-effort cross-instance publish: write the envelope slot, then
    /// dispatch explicitly so siblings are notified even when the slot value
    /// repeats. A storage failure skips the broadcast; the event is still
    /// retained locally and still uploaded.
    fn broadcast(&self, event: ActivityEvent) {
        let envelope = TabEnvelope::new(event, self.tab);
        if let Err(e) = self.store.put_envelope(&self.user, &envelope) {
            debug!(error = %e, "Envelope slot write failed; skipping broadcast");
            return;
        }
        self.bus.publish(envelope);
    }

    /// Ingest a sibling's envelope through the same path as a local capture,
    /// except it is never re-broadcast (only original capture sites publish,
    /// which is what prevents amplification loops).
    fn ingest_envelope(&self, envelope: TabEnvelope) {
        if envelope.origin_tab == self.tab {
            return;
        }
        if !self.store.is_enabled(&self.user) {
            return;
        }
        let mut event = envelope.event;
        event.from_peer = true;
        if !event_is_valid(&event) {
            warn!("Dropping invalid event from sibling instance");
            return;
        }
        self.buffer_event(event);
    }

    /// Drain the buffer into the durable store. The buffer keeps its contents
    /// on a failed write and drops only the flushed ids on success, so events
    /// recorded mid-flush are never lost.
    fn flush(&self) {
        let snapshot: Vec<ActivityEvent> = self.buffer.lock().unwrap().clone();
        if snapshot.is_empty() {
            return;
        }
        match self.store.flush_events(&self.user, &snapshot) {
            Ok(stats) => {
                let flushed: HashSet<&str> = snapshot.iter().map(|e| e.id.as_str()).collect();
                self.buffer
                    .lock()
                    .unwrap()
                    .retain(|e| !flushed.contains(e.id.as_str()));
                debug!(
                    stored = stats.stored,
                    dropped_invalid = stats.dropped_invalid,
                    evicted = stats.evicted,
                    "Buffer flushed"
                );
                self.check_backlog();
            }
            Err(e) => {
                warn!(error = %e, "Flush failed; keeping events buffered");
            }
        }
    }

    /// Emergency valve: when the unsynced backlog passes the high-water mark,
    /// compact the log to the most recent few (written off as synced) and
    /// reset the sync timers.
    fn check_backlog(&self) {
        let counts = match self.store.counts(&self.user) {
            Ok(counts) => counts,
            Err(_) => return,
        };
        if counts.unsynced <= self.backlog_high_water {
            return;
        }
        warn!(
            unsynced = counts.unsynced,
            high_water = self.backlog_high_water,
            "Unsynced backlog over high-water mark; compacting"
        );
        if let Err(e) = self
            .store
            .compact(&self.user, self.compact_keep_recent, Utc::now())
        {
            warn!(error = %e, "Backlog compaction failed");
        }
        self.scheduler.cancel();
    }

    fn after_sync(&self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Completed { uploaded, .. } if *uploaded > 0 => {
                self.touch_last_sync();
            }
            SyncOutcome::Overloaded { .. } => {
                self.touch_last_sync();
                self.scheduler.cancel();
            }
            _ => {}
        }
        if outcome.wants_retry() {
            debug!(delay_ms = self.retry_delay.as_millis() as u64, "Scheduling upload retry");
            self.scheduler.schedule_retry(self.retry_delay);
        }
    }

    fn touch_last_sync(&self) {
        let mut state = match self.store.background_state(&self.user) {
            Ok(Some(state)) => state,
            _ => BackgroundState::started(self.session),
        };
        state.last_sync_at = Some(Utc::now());
        if let Err(e) = self.store.set_background_state(&self.user, &state) {
            debug!(error = %e, "Could not update background state");
        }
    }
}
