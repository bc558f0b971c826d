use thiserror::Error;

use beacon_core::BeaconError;

/// Errors raised at the storage boundary.
///
/// Callers on the capture path absorb these (degrade to empty/default);
/// nothing in the pipeline crashes on a storage failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<StoreError> for BeaconError {
    fn from(err: StoreError) -> Self {
        BeaconError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = StoreError::Storage("db locked".to_string());
        assert_eq!(e.to_string(), "storage error: db locked");
    }

    #[test]
    fn test_serde_conversion() {
        let bad: Result<serde_json::Value, _> = serde_json::from_str("nope{");
        let e: StoreError = bad.unwrap_err().into();
        assert!(matches!(e, StoreError::Serialization(_)));
    }

    #[test]
    fn test_into_beacon_error() {
        let e: BeaconError = StoreError::Storage("x".to_string()).into();
        assert!(matches!(e, BeaconError::Store(_)));
    }
}
