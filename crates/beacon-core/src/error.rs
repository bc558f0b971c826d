use thiserror::Error;

/// Top-level error type for the beacon pipeline.
///
/// Each variant wraps a subsystem-specific failure. Subsystem crates define
/// their own error types and convert into `BeaconError` so the `?` operator
/// works across crate boundaries. Note that none of these ever escape the
/// tracker's public operations; they are logged and absorbed at that layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BeaconError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for BeaconError {
    fn from(err: toml::de::Error) -> Self {
        BeaconError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for BeaconError {
    fn from(err: toml::ser::Error) -> Self {
        BeaconError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for BeaconError {
    fn from(err: serde_json::Error) -> Self {
        BeaconError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for beacon operations.
pub type Result<T> = std::result::Result<T, BeaconError>;
