//! Beacon Core crate - shared types, event validation, configuration, errors.
//!
//! Defines the ActivityEvent data model with its closed set of capture kinds,
//! the structural validator applied on both the write and read paths, the
//! TOML configuration layer, and the top-level error type shared across the
//! beacon crates.

pub mod config;
pub mod error;
pub mod types;
pub mod validate;

pub use config::BeaconConfig;
pub use error::{BeaconError, Result};
pub use types::*;
pub use validate::{event_is_valid, is_valid};
