//! CLI argument definitions for the beacon binary.
//!
//! Uses `clap` with derive macros. Priority resolution: CLI args > env vars >
//! config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// beacon, a client-resident activity-event pipeline.
#[derive(Parser, Debug)]
#[command(name = "beacon", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Data directory for the SQLite store.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// User identity scoping the store and uploads.
    #[arg(short = 'u', long = "user")]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the tracker, feeding it NDJSON events from stdin (default).
    Run,
    /// Enable tracking for the configured user.
    Enable,
    /// Disable tracking for the configured user.
    Disable,
    /// Print event-log counts and session state.
    Status,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > BEACON_CONFIG env var > ~/.beacon/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("BEACON_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".beacon").join("config.toml");
    }
    PathBuf::from("config.toml")
}

/// Expand ~ to the home directory in a path string.
pub fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if let Some(rest) = data_dir.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(data_dir)
    }
}
