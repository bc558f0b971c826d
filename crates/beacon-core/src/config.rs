use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BeaconError, Result};

/// Top-level configuration for the beacon pipeline.
///
/// Loaded from `~/.beacon/config.toml` by default. Each section corresponds
/// to one stage of the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeaconConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl BeaconConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BeaconConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| BeaconError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite store.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// User identity scoping every store key and upload.
    pub user_id: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.beacon/data".to_string(),
            log_level: "info".to_string(),
            user_id: "default".to_string(),
        }
    }
}

/// Capture and local-persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Retention cap: most events held per user.
    pub max_activities: usize,
    /// Synced events older than this horizon are evicted first.
    pub retention_days: u32,
    /// Quiet window before buffered events are flushed to the store.
    pub persist_debounce_ms: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_activities: 1000,
            retention_days: 7,
            persist_debounce_ms: 1000,
        }
    }
}

/// Remote synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the ingestion service.
    pub endpoint: String,
    /// Quiet window after the last event before a normal sync fires.
    pub debounce_ms: u64,
    /// Upper bound on staleness: a forced sync fires this long after the
    /// first event of a pending batch, regardless of continued activity.
    pub max_wait_ms: u64,
    /// Pause between consecutive batch uploads within one cycle.
    pub batch_delay_ms: u64,
    /// Delay before retrying when unsynced events remain after a cycle.
    pub retry_delay_ms: u64,
    /// Unsynced backlog size that triggers emergency compaction.
    pub backlog_high_water: usize,
    /// Events retained (and written off as synced) by a compaction.
    pub compact_keep_recent: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:3030".to_string(),
            debounce_ms: 2000,
            max_wait_ms: 8000,
            batch_delay_ms: 500,
            retry_delay_ms: 5000,
            backlog_high_water: 500,
            compact_keep_recent: 50,
        }
    }
}
