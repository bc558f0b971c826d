//! The batched upload cycle.
//!
//! One cycle reads the unsynced backlog, partitions it into request-sized
//! batches, uploads them sequentially (oldest first), and persists the synced
//! confirmation for every accepted id. A batch failure skips to the next
//! batch; the overload rejection aborts the cycle and compacts the local log.
//! At most one cycle runs per instance at a time.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use beacon_core::UserId;
use beacon_store::ActivityStore;

use crate::auth::TokenProvider;
use crate::client::IngestClient;
use crate::protocol::{BatchRequest, TeardownRequest, BATCH_SIZE};

/// Result of one upload cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another cycle is already in flight for this instance.
    AlreadyRunning,
    /// No unsynced events, or the backlog could not be read.
    NothingPending,
    /// No bearer token; the cycle aborted before any request.
    NoToken,
    /// The cycle ran to the end.
    Completed {
        uploaded: usize,
        failed_batches: usize,
        remaining: usize,
    },
    /// The server rejected the backlog as oversized; the local log was
    /// compacted and remaining batches were abandoned.
    Overloaded { uploaded: usize, discarded: usize },
}

impl SyncOutcome {
    /// True when unsynced events remain and a retry should be scheduled.
    pub fn wants_retry(&self) -> bool {
        matches!(self, SyncOutcome::Completed { remaining, .. } if *remaining > 0)
    }
}

/// Uploader tunables beyond the fixed wire constants.
#[derive(Debug, Clone, Copy)]
pub struct UploaderConfig {
    /// Pause between consecutive batches within one cycle.
    pub batch_delay: Duration,
    /// Events retained by an overload compaction.
    pub compact_keep_recent: usize,
}

/// Uploads the unsynced backlog for one user, one cycle at a time.
pub struct BatchUploader<C, T> {
    store: Arc<ActivityStore>,
    client: C,
    tokens: T,
    user: UserId,
    config: UploaderConfig,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the cycle ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<C: IngestClient, T: TokenProvider> BatchUploader<C, T> {
    pub fn new(
        store: Arc<ActivityStore>,
        client: C,
        tokens: T,
        user: UserId,
        config: UploaderConfig,
    ) -> Self {
        Self {
            store,
            client,
            tokens,
            user,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Run one upload cycle.
    ///
    /// Returns immediately with [`SyncOutcome::AlreadyRunning`] when a cycle
    /// is in flight. Never raises: every failure is folded into the outcome.
    pub async fn sync(&self) -> SyncOutcome {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("Upload cycle already in flight; skipping");
            return SyncOutcome::AlreadyRunning;
        }
        let _guard = InFlightGuard(&self.in_flight);
        self.run_cycle().await
    }

    async fn run_cycle(&self) -> SyncOutcome {
        let mut backlog = match self.store.unsynced_events(&self.user) {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Could not read unsynced backlog");
                return SyncOutcome::NothingPending;
            }
        };
        if backlog.is_empty() {
            return SyncOutcome::NothingPending;
        }
        // Upload in capture order, oldest first.
        backlog.reverse();

        let Some(token) = self.tokens.bearer_token().await else {
            debug!("No bearer token; deferring upload cycle");
            return SyncOutcome::NoToken;
        };

        let total = backlog.len();
        let mut synced_ids: HashSet<String> = HashSet::new();
        let mut failed_batches = 0usize;
        let mut overloaded = false;

        for (index, batch) in backlog.chunks(BATCH_SIZE).enumerate() {
            if index > 0 && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }

            let request = BatchRequest::from_events(batch.iter());
            match self.client.upload_batch(Some(token.as_str()), &request).await {
                Ok(response) => {
                    info!(
                        batch = index,
                        sent = batch.len(),
                        stored_count = response.stored_count,
                        "Batch accepted"
                    );
                    synced_ids.extend(batch.iter().map(|e| e.id.clone()));
                }
                Err(e) if e.is_overload() => {
                    warn!(batch = index, "Server reports activity overload; aborting cycle");
                    overloaded = true;
                    break;
                }
                Err(e) => {
                    warn!(batch = index, error = %e, "Batch upload failed; continuing");
                    failed_batches += 1;
                }
            }
        }

        let uploaded = synced_ids.len();
        if let Err(e) = self.store.mark_synced(&self.user, &synced_ids, Utc::now()) {
            warn!(error = %e, "Could not persist synced flags");
        }

        if overloaded {
            let discarded = match self
                .store
                .compact(&self.user, self.config.compact_keep_recent, Utc::now())
            {
                Ok(stats) => stats.discarded,
                Err(e) => {
                    warn!(error = %e, "Overload compaction failed");
                    0
                }
            };
            return SyncOutcome::Overloaded {
                uploaded,
                discarded,
            };
        }

        SyncOutcome::Completed {
            uploaded,
            failed_batches,
            remaining: total - uploaded,
        }
    }

    /// Best-effort teardown delivery of whatever is still unsynced.
    ///
    /// Fire-and-forget: no retries, no response handling, never raises.
    pub async fn send_teardown(&self) {
        let backlog = match self.store.unsynced_events(&self.user) {
            Ok(events) if !events.is_empty() => events,
            _ => return,
        };
        let payload = TeardownRequest {
            user_id: self.user.as_str().to_string(),
            activities: backlog.iter().rev().map(Into::into).collect(),
        };
        self.client.send_teardown(&payload).await;
    }
}
