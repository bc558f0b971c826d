use thiserror::Error;

use beacon_core::BeaconError;

/// Errors raised by the upload path.
///
/// Batch-level failures are logged and skipped by the uploader; only the
/// overload rejection changes control flow (it aborts the cycle and triggers
/// compaction).
#[derive(Debug, Error)]
pub enum SyncError {
    /// The request never produced an HTTP response.
    #[error("request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("server rejected batch ({status}): {message}")]
    Server { status: u16, message: String },

    /// The server's activity-overload rejection.
    #[error("server rejected batch as oversized backlog")]
    Overloaded,
}

impl SyncError {
    pub fn is_overload(&self) -> bool {
        matches!(self, SyncError::Overloaded)
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Request(err.to_string())
    }
}

impl From<SyncError> for BeaconError {
    fn from(err: SyncError) -> Self {
        BeaconError::Sync(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = SyncError::Server {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(e.to_string(), "server rejected batch (503): unavailable");
    }

    #[test]
    fn test_overload_classification() {
        assert!(SyncError::Overloaded.is_overload());
        assert!(!SyncError::Request("timeout".to_string()).is_overload());
    }

    #[test]
    fn test_into_beacon_error() {
        let e: BeaconError = SyncError::Overloaded.into();
        assert!(matches!(e, BeaconError::Sync(_)));
    }
}
