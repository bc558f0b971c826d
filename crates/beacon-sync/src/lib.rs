//! Beacon Sync crate - remote synchronization of the activity backlog.
//!
//! Provides the dual-timer SyncScheduler (debounce + max-wait) that decides
//! when an upload cycle runs, the BatchUploader that partitions the unsynced
//! backlog into request-sized batches and uploads them sequentially under
//! retry and overload rules, the ingestion wire protocol, and the
//! TokenProvider seam for bearer-token retrieval.

pub mod auth;
pub mod client;
pub mod error;
pub mod protocol;
pub mod scheduler;
pub mod uploader;

pub use auth::{EnvTokenProvider, StaticTokenProvider, TokenProvider};
pub use client::{HttpIngestClient, IngestClient, MockIngestClient};
pub use error::SyncError;
pub use protocol::{
    ActivityRecord, BatchRequest, BatchResponse, TeardownRequest, BATCH_SIZE, OVERLOAD_SIGNAL,
};
pub use scheduler::{QuietWindow, SyncScheduler};
pub use uploader::{BatchUploader, SyncOutcome, UploaderConfig};
