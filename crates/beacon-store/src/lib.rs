//! Beacon Store crate - durable key/value persistence for the event pipeline.
//!
//! Provides a WAL-mode SQLite database holding JSON-serialized records under
//! user-scoped string keys: the event log, the tracking preference, the
//! background-state record, the capped search-query log, and the cross-instance
//! envelope slot. The event log is rewritten as a whole on every flush
//! (read-merge-write, never blind overwrite), with retention applied before
//! the single atomic write.

pub mod db;
pub mod error;
pub mod migrations;
pub mod retention;
pub mod store;

pub use db::Database;
pub use error::StoreError;
pub use retention::RetentionPolicy;
pub use store::{ActivityStore, CompactStats, FlushStats, StoreCounts, SEARCH_QUERY_CAP};
