//! CORS response headers.

use std::time::Duration;

use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, VARY,
};
use axum::http::{HeaderMap, HeaderValue};

use crate::domain::policy::OriginRule;

const ALLOWED_METHODS: &str = "POST,OPTIONS";
const BASE_ALLOWED_HEADERS: &str = "Accept, Content-Type, Content-Length";

/// Precomputed CORS headers attached to every gateway response.
#[derive(Debug, Clone)]
pub struct CorsHeaders {
    allow_any: bool,
    pattern: Option<HeaderValue>,
    allow_headers: HeaderValue,
    max_age: HeaderValue,
}

impl CorsHeaders {
    /// Build headers for an origin rule, auth header name and preflight max age.
    #[must_use]
    pub fn new(origin: &OriginRule, auth_header: &str, max_age: Duration) -> Self {
        let allow_headers = HeaderValue::from_str(&format!("{BASE_ALLOWED_HEADERS}, {auth_header}"))
            .unwrap_or_else(|_| HeaderValue::from_static(BASE_ALLOWED_HEADERS));
        Self {
            allow_any: *origin == OriginRule::Any,
            pattern: HeaderValue::from_str(origin.as_header_value()).ok(),
            allow_headers,
            max_age: HeaderValue::from(max_age.as_secs()),
        }
    }

    /// Write the CORS headers into `headers`.
    ///
    /// `accepted_origin` is the request origin when the origin check passed;
    /// it is echoed back instead of the configured pattern.
    pub fn apply(&self, headers: &mut HeaderMap, accepted_origin: Option<&HeaderValue>) {
        if self.allow_any {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        } else if let Some(origin) = accepted_origin {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            headers.append(VARY, HeaderValue::from_static("Origin"));
        } else if let Some(pattern) = &self.pattern {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, pattern.clone());
        }
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone());
        headers.insert(ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
    }
}
