//! Bearer-token retrieval seam.
//!
//! The uploader asks a TokenProvider for an opaque token before each cycle.
//! A missing token aborts the cycle silently; the next scheduled trigger
//! retries.

use std::future::Future;

/// Source of the opaque bearer token sent with upload requests.
pub trait TokenProvider: Send + Sync {
    /// The current token, or `None` when unauthenticated.
    fn bearer_token(&self) -> impl Future<Output = Option<String>> + Send;
}

/// Fixed token, or none at all. Useful for configuration-driven setups and
/// tests.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// A provider that never yields a token.
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Reads the token from an environment variable on every call, so an external
/// refresher can rotate it without restarting the pipeline.
#[derive(Debug, Clone)]
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl TokenProvider for EnvTokenProvider {
    async fn bearer_token(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticTokenProvider::new("tok-123");
        assert_eq!(provider.bearer_token().await.as_deref(), Some("tok-123"));
    }

    #[tokio::test]
    async fn test_anonymous_provider() {
        assert!(StaticTokenProvider::anonymous().bearer_token().await.is_none());
    }

    #[tokio::test]
    async fn test_env_provider_missing_or_empty() {
        let provider = EnvTokenProvider::new("BEACON_TEST_TOKEN_UNSET");
        assert!(provider.bearer_token().await.is_none());

        std::env::set_var("BEACON_TEST_TOKEN_EMPTY", "");
        let provider = EnvTokenProvider::new("BEACON_TEST_TOKEN_EMPTY");
        assert!(provider.bearer_token().await.is_none());
    }

    #[tokio::test]
    async fn test_env_provider_set() {
        std::env::set_var("BEACON_TEST_TOKEN_SET", "abc");
        let provider = EnvTokenProvider::new("BEACON_TEST_TOKEN_SET");
        assert_eq!(provider.bearer_token().await.as_deref(), Some("abc"));
    }
}
