//! Queue adapter configuration.

use std::time::Duration;

use reqwest::Url;

use super::auth::StorageCredentials;
use super::retry::RetryPolicy;

/// Storage service REST version sent as `x-ms-version`.
pub const QUEUE_API_VERSION: &str = "2021-12-02";

/// Configuration for the queue REST client.
#[derive(Debug, Clone)]
pub struct QueueClientConfig {
    /// Queue URL, e.g. `https://account.queue.core.windows.net/signals`.
    pub queue_url: Url,
    /// Account credentials used to sign requests.
    pub credentials: StorageCredentials,
    /// Per-try HTTP timeout.
    pub timeout: Duration,
    /// Retry policy applied to every call.
    pub retry: RetryPolicy,
    /// Value of `x-ms-version`.
    pub api_version: String,
}

impl QueueClientConfig {
    /// Create a configuration with default timeout and retry policy.
    #[must_use]
    pub fn new(queue_url: Url, credentials: StorageCredentials) -> Self {
        Self {
            queue_url,
            credentials,
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            api_version: QUEUE_API_VERSION.to_string(),
        }
    }

    /// Set the per-try timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Queue name, the last path segment of the URL.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        self.queue_url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .unwrap_or_default()
    }
}
