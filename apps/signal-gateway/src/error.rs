//! Gateway error taxonomy.
//!
//! Every failure a request can hit maps to exactly one [`GatewayError`]
//! variant, and only this type translates failures into HTTP status codes.
//!
//! | Variant | Status |
//! |---------|--------|
//! | `PolicyDenied` | 401 Unauthorized |
//! | `MethodNotAllowed` | 405 Method Not Allowed |
//! | `MalformedInput` | 400 Bad Request |
//! | `IoFailure` | 500 Internal Server Error |
//! | `DeliveryFailure` | 500 Internal Server Error |
//!
//! Response bodies carry only the canonical status phrase. Diagnostics stay
//! in the logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::application::services::DeliveryError;
use crate::domain::policy::PolicyDenial;
use crate::domain::signal::SignalError;

/// Request-level failure.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// An admission check failed.
    #[error(transparent)]
    PolicyDenied(#[from] PolicyDenial),

    /// Method other than POST or OPTIONS.
    #[error("method {0} not allowed")]
    MethodNotAllowed(String),

    /// Body did not decode or validate.
    #[error(transparent)]
    MalformedInput(#[from] SignalError),

    /// Request body could not be read.
    #[error("failed to read request body: {0}")]
    IoFailure(String),

    /// Signal could not be enqueued.
    #[error(transparent)]
    DeliveryFailure(#[from] DeliveryError),
}

impl GatewayError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::PolicyDenied(_) => StatusCode::UNAUTHORIZED,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::MalformedInput(_) => StatusCode::BAD_REQUEST,
            Self::IoFailure(_) | Self::DeliveryFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PolicyDenied(_) => "policy_denied",
            Self::MethodNotAllowed(_) => "method_not_allowed",
            Self::MalformedInput(_) => "malformed_input",
            Self::IoFailure(_) => "io_failure",
            Self::DeliveryFailure(_) => "delivery_failure",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, status.canonical_reason().unwrap_or_default()).into_response()
    }
}
