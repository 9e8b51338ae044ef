//! Port Interfaces
//!
//! Contracts between the delivery service and the durable queue service.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SignalQueuePort`: metadata probe, queue creation and message submission

use std::fmt;

use async_trait::async_trait;

// =============================================================================
// Types
// =============================================================================

/// How long an enqueued message lives before the queue drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTtl {
    /// Message never expires (`-1` on the wire).
    Never,
    /// Message expires after this many seconds.
    Seconds(u64),
}

impl MessageTtl {
    /// Parse the configured value: `-1` or a positive number of seconds.
    #[must_use]
    pub const fn from_secs(secs: i64) -> Option<Self> {
        match secs {
            -1 => Some(Self::Never),
            s if s > 0 => Some(Self::Seconds(s.unsigned_abs())),
            _ => None,
        }
    }
}

impl fmt::Display for MessageTtl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("-1"),
            Self::Seconds(secs) => write!(f, "{secs}"),
        }
    }
}

/// Queue metadata returned by a probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueProperties {
    /// Approximate number of messages in the queue.
    pub approximate_message_count: Option<u64>,
    /// Request id assigned by the queue service.
    pub queue_request_id: Option<String>,
}

/// Result of a create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueCreation {
    /// Queue was created by this call.
    Created,
    /// Queue already existed.
    AlreadyExists,
}

/// Acknowledgment of an enqueued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueuedMessage {
    /// Queue-assigned message id.
    pub message_id: String,
    /// HTTP status of the submission.
    pub status: u16,
    /// Request id assigned by the queue service.
    pub queue_request_id: Option<String>,
}

// =============================================================================
// Errors
// =============================================================================

/// Queue port error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Queue does not exist.
    #[error("Queue not found")]
    NotFound,

    /// Credentials rejected by the queue service.
    #[error("Queue authentication failed: {message}")]
    Authentication {
        /// Error details.
        message: String,
    },

    /// Call did not finish within its timeout.
    #[error("Queue call timed out")]
    Timeout,

    /// Queue service returned an error status.
    #[error("Queue service error {status} ({code}): {message}")]
    Service {
        /// HTTP status.
        status: u16,
        /// `x-ms-error-code` value, if any.
        code: String,
        /// Error details.
        message: String,
    },

    /// Transport failure.
    #[error("Queue network error: {message}")]
    Network {
        /// Error details.
        message: String,
    },

    /// Retry budget exhausted.
    #[error("Queue call failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        last_error: String,
    },

    /// Response could not be interpreted.
    #[error("Invalid queue response: {message}")]
    InvalidResponse {
        /// Error details.
        message: String,
    },
}

// =============================================================================
// Port
// =============================================================================

/// Port for durable queue interactions.
///
/// Implementations apply their own per-call timeout and retry policy.
#[async_trait]
pub trait SignalQueuePort: Send + Sync {
    /// Probe queue metadata.
    ///
    /// Returns [`QueueError::NotFound`] when the queue does not exist.
    async fn get_properties(&self) -> Result<QueueProperties, QueueError>;

    /// Create the queue. An existing queue is not an error.
    async fn create_queue(&self) -> Result<QueueCreation, QueueError>;

    /// Submit a message whose text is already encoded for the queue.
    async fn put_message(&self, text: &str, ttl: MessageTtl) -> Result<EnqueuedMessage, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ttl_from_secs() {
        assert_eq!(MessageTtl::from_secs(-1), Some(MessageTtl::Never));
        assert_eq!(MessageTtl::from_secs(3600), Some(MessageTtl::Seconds(3600)));
        assert_eq!(MessageTtl::from_secs(0), None);
        assert_eq!(MessageTtl::from_secs(-2), None);
    }

    #[test]
    fn message_ttl_query_value() {
        assert_eq!(MessageTtl::Never.to_string(), "-1");
        assert_eq!(MessageTtl::Seconds(60).to_string(), "60");
    }
}
