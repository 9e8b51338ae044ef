//! HTTP Controller (Driver Adapter)
//!
//! Runs one request through the admission pipeline:
//!
//! ```text
//! Received → OriginChecked → MethodResolved → (AuthChecked →) BodyRead
//!          → Decoded → (ObjectAuthorized →) Delivered → Responded
//! ```
//!
//! Every exit path carries CORS headers and the `X-Request-Id` of the
//! request's correlation id. Completion is logged once the response body
//! has been written or dropped.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes, HttpBody, to_bytes},
    extract::{Request, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
        header::{CONTENT_LENGTH, ORIGIN},
        request::Parts,
    },
    response::{IntoResponse, Response},
    routing::any,
};
use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::application::context::RequestContext;
use crate::application::ports::SignalQueuePort;
use crate::application::services::SignalDelivery;
use crate::domain::policy::{PolicyEvaluator, PolicyStage, PolicySubject};
use crate::domain::signal::parse_signal;
use crate::error::GatewayError;
use crate::infrastructure::config::ServerSettings;
use crate::infrastructure::health::GatewayStats;
use crate::infrastructure::metrics;

use super::cors::CorsHeaders;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Response header carrying the correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const REDACTED: &str = "[REDACTED]";

/// Application state shared across handlers.
pub struct AppState<Q: SignalQueuePort> {
    /// Admission checks.
    pub policy: Arc<PolicyEvaluator>,
    /// Queue delivery service.
    pub delivery: Arc<SignalDelivery<Q>>,
    /// Listener settings.
    pub settings: Arc<ServerSettings>,
    /// Precomputed CORS headers.
    pub cors: Arc<CorsHeaders>,
    /// Counters reported by the health server.
    pub stats: Arc<GatewayStats>,
    /// Cancelled once graceful shutdown has run out of time; request
    /// contexts derive from it.
    pub abort: CancellationToken,
}

impl<Q: SignalQueuePort> AppState<Q> {
    /// Assemble state from the startup configuration.
    #[must_use]
    pub fn new(
        policy: PolicyEvaluator,
        delivery: SignalDelivery<Q>,
        settings: ServerSettings,
        stats: Arc<GatewayStats>,
        abort: CancellationToken,
    ) -> Self {
        let cors = CorsHeaders::new(
            &policy.config().origin,
            &policy.config().auth_header,
            settings.cors_max_age,
        );
        Self {
            policy: Arc::new(policy),
            delivery: Arc::new(delivery),
            settings: Arc::new(settings),
            cors: Arc::new(cors),
            stats,
            abort,
        }
    }
}

impl<Q: SignalQueuePort> Clone for AppState<Q> {
    fn clone(&self) -> Self {
        Self {
            policy: Arc::clone(&self.policy),
            delivery: Arc::clone(&self.delivery),
            settings: Arc::clone(&self.settings),
            cors: Arc::clone(&self.cors),
            stats: Arc::clone(&self.stats),
            abort: self.abort.clone(),
        }
    }
}

/// Create the HTTP router serving the gateway path.
pub fn create_router<Q>(state: AppState<Q>) -> Router
where
    Q: SignalQueuePort + 'static,
{
    let path = state.settings.path.clone();
    Router::new()
        .route(&path, any(gateway_handler::<Q>))
        .with_state(state)
}

// =============================================================================
// Handler
// =============================================================================

async fn gateway_handler<Q>(State(state): State<AppState<Q>>, request: Request) -> Response
where
    Q: SignalQueuePort + 'static,
{
    let ctx = RequestContext::new(state.settings.request_timeout, &state.abort);
    let span = tracing::info_span!("gateway_request", request_id = ctx.request_id());
    state.stats.record_request();

    if state.settings.honeypot {
        tracing::warn!(
            parent: &span,
            method = %request.method(),
            uri = %request.uri(),
            "Honeypot mode: request answered without processing"
        );
        metrics::record_honeypot_request();
        let response = (StatusCode::OK, "OK").into_response();
        return log_on_completion(response, ResponseLog::new(&state.stats, ctx, span));
    }

    let response = async {
        let (parts, body) = request.into_parts();
        if state.settings.log_requests {
            log_request(&parts, &state.policy.config().auth_header);
        }

        let origins = header_values(&parts.headers, ORIGIN.as_str());
        let origin_check = state
            .policy
            .evaluate(PolicyStage::Origin, PolicySubject::Origin(&origins));
        let accepted_origin = match origin_check {
            Ok(()) => parts.headers.get(ORIGIN).cloned(),
            Err(_) => None,
        };

        let result = match origin_check {
            Ok(()) => dispatch(&state, &ctx, parts, body).await,
            Err(denial) => Err(denial.into()),
        };

        let mut response = result.unwrap_or_else(|error| {
            report_error(&error);
            error.into_response()
        });

        state
            .cors
            .apply(response.headers_mut(), accepted_origin.as_ref());
        if let Ok(value) = HeaderValue::from_str(ctx.request_id()) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }
        response
    }
    .instrument(span.clone())
    .await;

    log_on_completion(response, ResponseLog::new(&state.stats, ctx, span))
}

async fn dispatch<Q>(
    state: &AppState<Q>,
    ctx: &RequestContext,
    parts: Parts,
    body: Body,
) -> Result<Response, GatewayError>
where
    Q: SignalQueuePort + 'static,
{
    match parts.method {
        Method::POST => {}
        Method::OPTIONS => return Ok(StatusCode::NO_CONTENT.into_response()),
        other => return Err(GatewayError::MethodNotAllowed(other.to_string())),
    }

    let auth_values = header_values(&parts.headers, &state.policy.config().auth_header);
    state
        .policy
        .evaluate(PolicyStage::Headers, PolicySubject::Headers(&auth_values))?;

    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| GatewayError::IoFailure(e.to_string()))?;
    if state.settings.log_requests {
        tracing::info!(body = %redacted_body(&bytes), "Request body");
    }

    let mut signal = parse_signal(&bytes)?;
    state
        .policy
        .evaluate(PolicyStage::Object, PolicySubject::Object(&signal))?;
    signal.sanitize();

    tracing::debug!(
        ticker = %signal.ticker,
        action = %signal.action,
        contracts = signal.contracts_count,
        "Signal accepted"
    );

    match state.delivery.enqueue(&signal, ctx).await {
        Ok(receipt) => {
            state.stats.record_delivery_success();
            metrics::record_enqueue("success");
            if receipt.queue_created {
                metrics::record_queue_created();
            }
        }
        Err(e) => {
            state.stats.record_delivery_failure();
            metrics::record_enqueue(e.kind());
            return Err(e.into());
        }
    }

    Ok((StatusCode::OK, Json(signal)).into_response())
}

// =============================================================================
// Completion
// =============================================================================

/// Records a request once its response body is finished.
///
/// Dropped by the body stream after the last chunk is written, or when the
/// connection goes away first.
struct ResponseLog {
    ctx: RequestContext,
    span: tracing::Span,
    stats: Arc<GatewayStats>,
    status: StatusCode,
    bytes: usize,
}

impl ResponseLog {
    fn new(stats: &Arc<GatewayStats>, ctx: RequestContext, span: tracing::Span) -> Self {
        Self {
            ctx,
            span,
            stats: Arc::clone(stats),
            status: StatusCode::OK,
            bytes: 0,
        }
    }

    fn observe(&mut self, chunk: &Result<Bytes, axum::Error>) {
        if let Ok(data) = chunk {
            self.bytes += data.len();
        }
    }
}

impl Drop for ResponseLog {
    fn drop(&mut self) {
        let _entered = self.span.enter();
        let elapsed = self.ctx.elapsed();
        let status = self.status.as_u16();

        self.stats.record_request_finished();
        metrics::record_request(status, elapsed);
        tracing::info!(
            status,
            bytes = self.bytes,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Request completed"
        );
    }
}

/// Wrap the response body so `log` is dropped when the body is done.
fn log_on_completion(response: Response, mut log: ResponseLog) -> Response {
    let (mut parts, body) = response.into_parts();
    log.status = parts.status;

    let has_body = parts.status != StatusCode::NO_CONTENT;
    if let Some(len) = body.size_hint().exact().filter(|_| has_body) {
        parts.headers.entry(CONTENT_LENGTH).or_insert(HeaderValue::from(len));
    }

    let stream = body.into_data_stream().map(move |chunk| {
        log.observe(&chunk);
        chunk
    });
    Response::from_parts(parts, Body::from_stream(stream))
}

// =============================================================================
// Helpers
// =============================================================================

/// All values of a header. Values that are not visible ASCII become empty
/// strings so they still count as occurrences.
fn header_values<'a>(headers: &'a HeaderMap, name: &str) -> Vec<&'a str> {
    headers
        .get_all(name)
        .iter()
        .map(|value| value.to_str().unwrap_or_default())
        .collect()
}

fn report_error(error: &GatewayError) {
    if let GatewayError::PolicyDenied(denial) = error {
        metrics::record_policy_denial(denial.reason.as_str());
    }

    if error.status_code().is_server_error() {
        tracing::error!(kind = error.kind(), error = %error, "Request failed");
    } else {
        tracing::warn!(kind = error.kind(), error = %error, "Request rejected");
    }
}

fn log_request(parts: &Parts, auth_header: &str) {
    let headers: Vec<String> = parts
        .headers
        .iter()
        .map(|(name, value)| {
            if name.as_str().eq_ignore_ascii_case(auth_header) {
                format!("{name}: {REDACTED}")
            } else {
                format!("{name}: {}", value.to_str().unwrap_or("<binary>"))
            }
        })
        .collect();

    tracing::info!(
        method = %parts.method,
        uri = %parts.uri,
        headers = ?headers,
        "Request received"
    );
}

/// Request body for the dump log with the signal `key` masked.
///
/// Bodies that are not JSON are summarised by length only.
fn redacted_body(bytes: &[u8]) -> String {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(mut fields)) => {
            if let Some(key) = fields.get_mut("key") {
                *key = Value::String(REDACTED.to_string());
            }
            Value::Object(fields).to_string()
        }
        Ok(other) => other.to_string(),
        Err(_) => format!("<{} bytes, not JSON>", bytes.len()),
    }
}

// =============================================================================
// Tests
// =============================================================================
