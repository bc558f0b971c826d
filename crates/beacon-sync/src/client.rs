//! Ingestion-endpoint clients.
//!
//! The IngestClient trait abstracts the HTTP transport so the uploader can be
//! exercised against the mock. The real client speaks the protocol of
//! `protocol.rs` over reqwest; the teardown path is fire-and-forget.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

use crate::error::SyncError;
use crate::protocol::{BatchRequest, BatchResponse, ErrorResponse, TeardownRequest, OVERLOAD_SIGNAL};

/// Transport for upload and teardown requests.
pub trait IngestClient: Send + Sync {
    /// Upload one batch. Non-success statuses map to `SyncError::Server`,
    /// except the overload rejection which maps to `SyncError::Overloaded`.
    fn upload_batch(
        &self,
        token: Option<&str>,
        batch: &BatchRequest,
    ) -> impl Future<Output = Result<BatchResponse, SyncError>> + Send;

    /// Best-effort teardown delivery. Never fails; errors are logged and
    /// dropped.
    fn send_teardown(&self, payload: &TeardownRequest) -> impl Future<Output = ()> + Send;
}

/// HTTP client for the ingestion service.
pub struct HttpIngestClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpIngestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn activities_url(&self) -> String {
        format!("{}/api/activity/activities", self.base_url)
    }

    fn teardown_url(&self) -> String {
        format!("{}/api/browser/activities", self.base_url)
    }
}

impl IngestClient for HttpIngestClient {
    async fn upload_batch(
        &self,
        token: Option<&str>,
        batch: &BatchRequest,
    ) -> Result<BatchResponse, SyncError> {
        let mut request = self.http.post(self.activities_url()).json(batch);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<BatchResponse>().await?);
        }

        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        if message.contains(OVERLOAD_SIGNAL) {
            Err(SyncError::Overloaded)
        } else {
            Err(SyncError::Server {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn send_teardown(&self, payload: &TeardownRequest) {
        match self.http.post(self.teardown_url()).json(payload).send().await {
            Ok(response) => debug!(status = %response.status(), "Teardown delivered"),
            Err(e) => debug!(error = %e, "Teardown delivery failed"),
        }
    }
}

/// Scripted in-memory client for exercising the uploader.
///
/// Records every upload's batch size in call order; individual calls can be
/// scripted to fail, to answer the overload rejection, or to take time.
#[derive(Debug, Default)]
pub struct MockIngestClient {
    batch_sizes: Mutex<Vec<usize>>,
    teardowns: Mutex<Vec<TeardownRequest>>,
    fail_on: HashSet<usize>,
    overload_on: Option<usize>,
    delay: Duration,
}

impl MockIngestClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the n-th upload (0-based) with a generic server error.
    pub fn fail_on(mut self, call: usize) -> Self {
        self.fail_on.insert(call);
        self
    }

    /// Answer the n-th upload (0-based) with the overload rejection.
    pub fn overload_on(mut self, call: usize) -> Self {
        self.overload_on = Some(call);
        self
    }

    /// Make every upload take the given time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Batch sizes of every upload so far, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    pub fn upload_calls(&self) -> usize {
        self.batch_sizes.lock().unwrap().len()
    }

    pub fn teardown_calls(&self) -> usize {
        self.teardowns.lock().unwrap().len()
    }
}

impl IngestClient for MockIngestClient {
    async fn upload_batch(
        &self,
        _token: Option<&str>,
        batch: &BatchRequest,
    ) -> Result<BatchResponse, SyncError> {
        let call = {
            let mut sizes = self.batch_sizes.lock().unwrap();
            sizes.push(batch.activities.len());
            sizes.len() - 1
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.overload_on == Some(call) {
            return Err(SyncError::Overloaded);
        }
        if self.fail_on.contains(&call) {
            return Err(SyncError::Server {
                status: 500,
                message: "scripted failure".to_string(),
            });
        }
        Ok(BatchResponse {
            stored_count: batch.activities.len() as u64,
            errors: Vec::new(),
        })
    }

    async fn send_teardown(&self, payload: &TeardownRequest) {
        self.teardowns.lock().unwrap().push(payload.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_urls() {
        let client = HttpIngestClient::new("https://ingest.example.com/");
        assert_eq!(
            client.activities_url(),
            "https://ingest.example.com/api/activity/activities"
        );
        assert_eq!(
            client.teardown_url(),
            "https://ingest.example.com/api/browser/activities"
        );
    }

    #[tokio::test]
    async fn test_mock_records_batch_sizes() {
        let client = MockIngestClient::new();
        let batch = BatchRequest { activities: vec![] };
        let response = client.upload_batch(None, &batch).await.unwrap();
        assert_eq!(response.stored_count, 0);
        assert_eq!(client.batch_sizes(), vec![0]);
    }

    #[tokio::test]
    async fn test_mock_scripted_failure_and_overload() {
        let client = MockIngestClient::new().fail_on(0).overload_on(1);
        let batch = BatchRequest { activities: vec![] };

        let first = client.upload_batch(None, &batch).await;
        assert!(matches!(first, Err(SyncError::Server { status: 500, .. })));

        let second = client.upload_batch(None, &batch).await;
        assert!(matches!(second, Err(SyncError::Overloaded)));

        let third = client.upload_batch(None, &batch).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn test_mock_teardown_recorded() {
        let client = MockIngestClient::new();
        client
            .send_teardown(&TeardownRequest {
                user_id: "u".to_string(),
                activities: vec![],
            })
            .await;
        assert_eq!(client.teardown_calls(), 1);
    }
}
