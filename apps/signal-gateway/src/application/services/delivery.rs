//! Signal Delivery Service
//!
//! Hands validated signals to the durable queue.
//!
//! # Sequence
//!
//! 1. Probe queue metadata. If the queue is missing, create it once and
//!    probe again. An existing queue is not an error.
//! 2. Annotate a sanitized copy of the signal with the correlation id.
//! 3. Encode as base64 JSON and submit with the configured TTL.
//!
//! The whole sequence is bounded by the request deadline and aborts as soon
//! as the request context is cancelled. Retries happen only inside the
//! queue adapter.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::application::context::RequestContext;
use crate::application::ports::{
    MessageTtl, QueueCreation, QueueError, QueueProperties, SignalQueuePort,
};
use crate::domain::signal::{SignalError, SignalEvent, signal_to_data};

/// Delivery failure. Callers see one opaque failure kind; the variant is
/// for diagnostics only.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Metadata probe failed.
    #[error("Queue metadata probe failed: {0}")]
    Probe(#[source] QueueError),

    /// Queue creation failed.
    #[error("Queue creation failed: {0}")]
    Create(#[source] QueueError),

    /// Message submission failed.
    #[error("Message submission failed: {0}")]
    Submit(#[source] QueueError),

    /// Signal could not be encoded.
    #[error(transparent)]
    Encode(#[from] SignalError),

    /// Request deadline passed before delivery finished.
    #[error("Delivery deadline exceeded")]
    DeadlineExceeded,

    /// Request was cancelled.
    #[error("Delivery cancelled")]
    Cancelled,
}

impl DeliveryError {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Probe(_) => "probe",
            Self::Create(_) => "create",
            Self::Submit(_) => "submit",
            Self::Encode(_) => "encode",
            Self::DeadlineExceeded => "deadline",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Outcome of a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueReceipt {
    /// Correlation id written into the message.
    pub request_id: String,
    /// Queue-assigned message id.
    pub message_id: String,
    /// HTTP status of the submission.
    pub status: u16,
    /// Request id assigned by the queue service.
    pub queue_request_id: Option<String>,
    /// Approximate queue depth observed by the probe.
    pub approximate_message_count: Option<u64>,
    /// Whether this call had to create the queue.
    pub queue_created: bool,
}

/// Delivers signals through a [`SignalQueuePort`].
pub struct SignalDelivery<Q: SignalQueuePort> {
    queue: Arc<Q>,
    ttl: MessageTtl,
}

impl<Q: SignalQueuePort> SignalDelivery<Q> {
    /// Create a delivery service bound to a queue and message TTL.
    pub const fn new(queue: Arc<Q>, ttl: MessageTtl) -> Self {
        Self { queue, ttl }
    }

    /// Durably enqueue `signal`.
    ///
    /// The caller's signal is left untouched; the queued copy has no `key`
    /// and carries the correlation id in `notes`.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] if any queue call fails, the deadline
    /// passes, or the context is cancelled.
    pub async fn enqueue(
        &self,
        signal: &SignalEvent,
        ctx: &RequestContext,
    ) -> Result<EnqueueReceipt, DeliveryError> {
        tokio::select! {
            biased;
            () = ctx.cancellation().cancelled() => Err(DeliveryError::Cancelled),
            result = tokio::time::timeout_at(ctx.deadline(), self.deliver(signal, ctx)) => {
                result.unwrap_or(Err(DeliveryError::DeadlineExceeded))
            }
        }
    }

    async fn deliver(
        &self,
        signal: &SignalEvent,
        ctx: &RequestContext,
    ) -> Result<EnqueueReceipt, DeliveryError> {
        let request_id = ctx.request_id();
        let (properties, queue_created) = self.ensure_queue(request_id).await?;

        let mut message = signal.clone();
        message.sanitize();
        message.annotate_request_id(request_id);
        let text = BASE64.encode(signal_to_data(&message)?);

        let ack = self
            .queue
            .put_message(&text, self.ttl)
            .await
            .map_err(DeliveryError::Submit)?;

        tracing::info!(
            request_id,
            status = ack.status,
            queue_request_id = ack.queue_request_id.as_deref().unwrap_or(""),
            queue_message_id = %ack.message_id,
            "Signal enqueued"
        );

        Ok(EnqueueReceipt {
            request_id: request_id.to_string(),
            message_id: ack.message_id,
            status: ack.status,
            queue_request_id: ack.queue_request_id,
            approximate_message_count: properties.approximate_message_count,
            queue_created,
        })
    }

    async fn ensure_queue(&self, request_id: &str) -> Result<(QueueProperties, bool), DeliveryError> {
        let (properties, created) = match self.queue.get_properties().await {
            Ok(properties) => (properties, false),
            Err(QueueError::NotFound) => {
                tracing::warn!(request_id, "Signal queue not found, creating it");
                let creation = self.queue.create_queue().await.map_err(DeliveryError::Create)?;
                if creation == QueueCreation::AlreadyExists {
                    tracing::debug!(request_id, "Signal queue created concurrently");
                }
                let properties = self.queue.get_properties().await.map_err(DeliveryError::Probe)?;
                (properties, creation == QueueCreation::Created)
            }
            Err(e) => return Err(DeliveryError::Probe(e)),
        };

        tracing::debug!(
            request_id,
            approximate_message_count = properties.approximate_message_count,
            "Signal queue available"
        );
        Ok((properties, created))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::application::ports::EnqueuedMessage;
    use crate::domain::signal::{Action, parse_signal};

    #[derive(Default)]
    struct MockQueue {
        probes: Mutex<VecDeque<Result<QueueProperties, QueueError>>>,
        create_result: Option<Result<QueueCreation, QueueError>>,
        put_error: Option<QueueError>,
        put_delay: Option<Duration>,
        calls: Mutex<Vec<&'static str>>,
        messages: Mutex<Vec<(String, MessageTtl)>>,
    }

    impl MockQueue {
        fn with_probes(probes: Vec<Result<QueueProperties, QueueError>>) -> Self {
            Self {
                probes: Mutex::new(probes.into()),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SignalQueuePort for MockQueue {
        async fn get_properties(&self) -> Result<QueueProperties, QueueError> {
            self.calls.lock().unwrap().push("probe");
            self.probes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(QueueProperties::default()))
        }

        async fn create_queue(&self) -> Result<QueueCreation, QueueError> {
            self.calls.lock().unwrap().push("create");
            self.create_result.clone().unwrap_or(Ok(QueueCreation::Created))
        }

        async fn put_message(
            &self,
            text: &str,
            ttl: MessageTtl,
        ) -> Result<EnqueuedMessage, QueueError> {
            self.calls.lock().unwrap().push("put");
            if let Some(delay) = self.put_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(e) = &self.put_error {
                return Err(e.clone());
            }
            self.messages.lock().unwrap().push((text.to_string(), ttl));
            Ok(EnqueuedMessage {
                message_id: "msg-1".to_string(),
                status: 201,
                queue_request_id: Some("q-req".to_string()),
            })
        }
    }

    fn signal() -> SignalEvent {
        SignalEvent {
            ticker: "AAPL".to_string(),
            action: Action::Buy,
            close: Decimal::new(15025, 2),
            contracts_count: 10,
            notes: Some("breakout".to_string()),
            key: Some("secret".to_string()),
        }
    }

    fn context(timeout: Duration) -> RequestContext {
        RequestContext::with_id("req-1".to_string(), timeout, &CancellationToken::new())
    }

    fn decode(text: &str) -> SignalEvent {
        parse_signal(&BASE64.decode(text).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn enqueue_submits_annotated_sanitized_copy() {
        let queue = Arc::new(MockQueue::default());
        let delivery = SignalDelivery::new(Arc::clone(&queue), MessageTtl::Seconds(60));
        let original = signal();

        let receipt = delivery
            .enqueue(&original, &context(Duration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(receipt.message_id, "msg-1");
        assert_eq!(receipt.request_id, "req-1");
        assert!(!receipt.queue_created);
        assert_eq!(queue.calls(), vec!["probe", "put"]);

        let messages = queue.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].1, MessageTtl::Seconds(60));
        let queued = decode(&messages[0].0);
        assert_eq!(queued.notes.as_deref(), Some("breakout;requestId=req-1"));
        assert!(queued.key.is_none());

        // Caller's copy untouched.
        assert_eq!(original, signal());
    }

    #[tokio::test]
    async fn missing_queue_is_created_then_reprobed() {
        let queue = Arc::new(MockQueue::with_probes(vec![
            Err(QueueError::NotFound),
            Ok(QueueProperties {
                approximate_message_count: Some(0),
                queue_request_id: None,
            }),
        ]));
        let delivery = SignalDelivery::new(Arc::clone(&queue), MessageTtl::Never);

        let receipt = delivery
            .enqueue(&signal(), &context(Duration::from_secs(5)))
            .await
            .unwrap();

        assert!(receipt.queue_created);
        assert_eq!(receipt.approximate_message_count, Some(0));
        assert_eq!(queue.calls(), vec!["probe", "create", "probe", "put"]);
    }

    #[tokio::test]
    async fn concurrent_creation_is_benign() {
        let queue = Arc::new(MockQueue {
            probes: Mutex::new(vec![Err(QueueError::NotFound)].into()),
            create_result: Some(Ok(QueueCreation::AlreadyExists)),
            ..MockQueue::default()
        });
        let delivery = SignalDelivery::new(Arc::clone(&queue), MessageTtl::Never);

        let receipt = delivery
            .enqueue(&signal(), &context(Duration::from_secs(5)))
            .await
            .unwrap();

        assert!(!receipt.queue_created);
        assert_eq!(queue.calls(), vec!["probe", "create", "probe", "put"]);
    }

    #[tokio::test]
    async fn other_probe_errors_are_fatal() {
        let queue = Arc::new(MockQueue::with_probes(vec![Err(QueueError::Authentication {
            message: "bad key".to_string(),
        })]));
        let delivery = SignalDelivery::new(Arc::clone(&queue), MessageTtl::Never);

        let err = delivery
            .enqueue(&signal(), &context(Duration::from_secs(5)))
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::Probe(QueueError::Authentication { .. })));
        assert_eq!(queue.calls(), vec!["probe"]);
    }

    #[tokio::test]
    async fn queue_is_created_at_most_once() {
        let queue = Arc::new(MockQueue::with_probes(vec![
            Err(QueueError::NotFound),
            Err(QueueError::NotFound),
        ]));
        let delivery = SignalDelivery::new(Arc::clone(&queue), MessageTtl::Never);

        let err = delivery
            .enqueue(&signal(), &context(Duration::from_secs(5)))
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::Probe(QueueError::NotFound)));
        assert_eq!(queue.calls(), vec!["probe", "create", "probe"]);
    }

    #[tokio::test]
    async fn create_failure_surfaces() {
        let queue = Arc::new(MockQueue {
            probes: Mutex::new(vec![Err(QueueError::NotFound)].into()),
            create_result: Some(Err(QueueError::Timeout)),
            ..MockQueue::default()
        });
        let delivery = SignalDelivery::new(Arc::clone(&queue), MessageTtl::Never);

        let err = delivery
            .enqueue(&signal(), &context(Duration::from_secs(5)))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "create");
    }

    #[tokio::test]
    async fn submit_failure_surfaces() {
        let queue = Arc::new(MockQueue {
            put_error: Some(QueueError::MaxRetriesExceeded {
                attempts: 3,
                last_error: "503".to_string(),
            }),
            ..MockQueue::default()
        });
        let delivery = SignalDelivery::new(Arc::clone(&queue), MessageTtl::Never);

        let err = delivery
            .enqueue(&signal(), &context(Duration::from_secs(5)))
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::Submit(QueueError::MaxRetriesExceeded { .. })));
    }

    #[tokio::test]
    async fn deadline_bounds_slow_submission() {
        let queue = Arc::new(MockQueue {
            put_delay: Some(Duration::from_secs(30)),
            ..MockQueue::default()
        });
        let delivery = SignalDelivery::new(Arc::clone(&queue), MessageTtl::Never);

        let err = delivery
            .enqueue(&signal(), &context(Duration::from_millis(20)))
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::DeadlineExceeded));
        assert!(queue.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_aborts_delivery() {
        let queue = Arc::new(MockQueue {
            put_delay: Some(Duration::from_secs(30)),
            ..MockQueue::default()
        });
        let delivery = SignalDelivery::new(Arc::clone(&queue), MessageTtl::Never);
        let ctx = context(Duration::from_secs(60));

        let cancel = ctx.cancellation().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let err = delivery.enqueue(&signal(), &ctx).await.unwrap_err();

        assert!(matches!(err, DeliveryError::Cancelled));
    }

    #[tokio::test]
    async fn repeated_signals_enqueue_independently() {
        let queue = Arc::new(MockQueue::default());
        let delivery = SignalDelivery::new(Arc::clone(&queue), MessageTtl::Never);
        let abort = CancellationToken::new();

        for _ in 0..2 {
            let ctx = RequestContext::new(Duration::from_secs(5), &abort);
            delivery.enqueue(&signal(), &ctx).await.unwrap();
        }

        let messages = queue.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert_ne!(decode(&messages[0].0).request_id(), decode(&messages[1].0).request_id());
    }
}
