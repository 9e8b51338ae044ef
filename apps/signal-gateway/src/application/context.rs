//! Per-request context.
//!
//! Carries the correlation id, timing and cancellation for a single inbound
//! request. Never persisted.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Correlation and deadline state for one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    started_at: Instant,
    deadline: Instant,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Create a context with a fresh correlation id.
    ///
    /// The context is cancelled when `abort` is.
    #[must_use]
    pub fn new(timeout: Duration, abort: &CancellationToken) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), timeout, abort)
    }

    /// Create a context with a known correlation id.
    #[must_use]
    pub fn with_id(request_id: String, timeout: Duration, abort: &CancellationToken) -> Self {
        let started_at = Instant::now();
        Self {
            request_id,
            started_at,
            deadline: started_at + timeout,
            cancel: abort.child_token(),
        }
    }

    /// Correlation id.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Time since the request arrived.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Absolute deadline for all work on this request.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Cancellation token for in-flight work.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}
