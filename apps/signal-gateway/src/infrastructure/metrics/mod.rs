//! Prometheus Metrics Module
//!
//! Exposes gateway metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Requests**: Counts by response status, end-to-end latency
//! - **Policy**: Denials by reason
//! - **Delivery**: Enqueue outcomes, queue creations
//! - **Queue calls**: Per-operation outcomes, latency and retries
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Repeated calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "signal_gateway_requests_total",
        "Total gateway requests by response status"
    );
    describe_histogram!(
        "signal_gateway_request_duration_seconds",
        "End-to-end request latency including delivery"
    );
    describe_counter!(
        "signal_gateway_honeypot_requests_total",
        "Requests answered in honeypot mode"
    );

    describe_counter!(
        "signal_gateway_policy_denials_total",
        "Requests denied by admission policy, by reason"
    );

    describe_counter!(
        "signal_gateway_enqueue_total",
        "Signal deliveries by outcome"
    );
    describe_counter!(
        "signal_gateway_queue_created_total",
        "Times the signal queue had to be created"
    );

    describe_counter!(
        "signal_gateway_queue_calls_total",
        "Queue service calls by operation and outcome"
    );
    describe_histogram!(
        "signal_gateway_queue_call_duration_seconds",
        "Queue service call latency including retries"
    );
    describe_counter!(
        "signal_gateway_queue_retries_total",
        "Queue service call retries by operation"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a completed request.
pub fn record_request(status: u16, duration: Duration) {
    counter!(
        "signal_gateway_requests_total",
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("signal_gateway_request_duration_seconds").record(duration.as_secs_f64());
}

/// Record a request answered in honeypot mode.
pub fn record_honeypot_request() {
    counter!("signal_gateway_honeypot_requests_total").increment(1);
}

/// Record a policy denial.
pub fn record_policy_denial(reason: &'static str) {
    counter!(
        "signal_gateway_policy_denials_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record a delivery outcome (`success` or a failure kind).
pub fn record_enqueue(outcome: &'static str) {
    counter!(
        "signal_gateway_enqueue_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Record that the signal queue was created.
pub fn record_queue_created() {
    counter!("signal_gateway_queue_created_total").increment(1);
}

/// Record a finished queue call.
pub fn record_queue_call(operation: &'static str, success: bool, duration: Duration) {
    counter!(
        "signal_gateway_queue_calls_total",
        "operation" => operation,
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
    histogram!(
        "signal_gateway_queue_call_duration_seconds",
        "operation" => operation
    )
    .record(duration.as_secs_f64());
}

/// Record a queue call retry.
pub fn record_queue_retry(operation: &'static str) {
    counter!(
        "signal_gateway_queue_retries_total",
        "operation" => operation
    )
    .increment(1);
}
