//! Queue REST client with retry logic.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};

use super::config::QueueClientConfig;
use super::retry::{ExponentialBackoff, StatusCategory, categorize_status};
use crate::application::ports::{
    EnqueuedMessage, MessageTtl, QueueCreation, QueueError, QueueProperties, SignalQueuePort,
};
use crate::infrastructure::metrics;

const APPROXIMATE_MESSAGES_COUNT: &str = "x-ms-approximate-messages-count";
const ERROR_CODE: &str = "x-ms-error-code";
const REQUEST_ID: &str = "x-ms-request-id";
const QUEUE_ALREADY_EXISTS: &str = "QueueAlreadyExists";

/// Queue client construction errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueClientError {
    /// HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),

    /// Queue URL cannot carry a path.
    #[error("invalid queue URL: {0}")]
    InvalidUrl(String),
}

/// Queue service operation, for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOperation {
    /// Metadata probe.
    GetProperties,
    /// Queue creation.
    CreateQueue,
    /// Message submission.
    PutMessage,
}

impl QueueOperation {
    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GetProperties => "get_properties",
            Self::CreateQueue => "create_queue",
            Self::PutMessage => "put_message",
        }
    }
}

/// REST client for a single storage queue.
#[derive(Debug, Clone)]
pub struct AzureQueueClient {
    client: Client,
    config: QueueClientConfig,
    messages_url: Url,
}

impl AzureQueueClient {
    /// Create a client from config.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the queue URL
    /// cannot carry a path.
    pub fn new(config: QueueClientConfig) -> Result<Self, QueueClientError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        let mut messages_url = config.queue_url.clone();
        messages_url
            .path_segments_mut()
            .map_err(|()| QueueClientError::InvalidUrl(config.queue_url.to_string()))?
            .pop_if_empty()
            .push("messages");

        Ok(Self {
            client,
            config,
            messages_url,
        })
    }

    /// Queue name.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        self.config.queue_name()
    }

    /// Send a signed request, retrying transient failures.
    ///
    /// Returns the response for any non-retryable status so the caller can
    /// interpret it.
    async fn send<F>(&self, operation: QueueOperation, build: F) -> Result<Response, QueueError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut backoff = ExponentialBackoff::new(&self.config.retry);
        let started = Instant::now();

        loop {
            let mut request = build()
                .header("x-ms-date", rfc1123_now())
                .header("x-ms-version", &self.config.api_version)
                .build()
                .map_err(|e| QueueError::Network {
                    message: e.to_string(),
                })?;
            self.config
                .credentials
                .authorize(&mut request)
                .map_err(|e| QueueError::Authentication {
                    message: e.to_string(),
                })?;

            let (error, retry_after) = match self.client.execute(request).await {
                Ok(response) => match categorize_status(response.status().as_u16()) {
                    StatusCategory::Success | StatusCategory::Final => {
                        metrics::record_queue_call(
                            operation.as_str(),
                            response.status().is_success(),
                            started.elapsed(),
                        );
                        return Ok(response);
                    }
                    StatusCategory::Retryable => {
                        let retry_after = parse_retry_after(response.headers());
                        (error_from_response(response).await, retry_after)
                    }
                },
                Err(e) => (transport_error(&e), None),
            };

            if let Some(delay) = backoff.next_backoff_with_hint(retry_after) {
                tracing::warn!(
                    operation = operation.as_str(),
                    attempt = backoff.attempt(),
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "Queue call failed, retrying"
                );
                metrics::record_queue_retry(operation.as_str());
                tokio::time::sleep(delay).await;
                continue;
            }

            metrics::record_queue_call(operation.as_str(), false, started.elapsed());
            let attempts = backoff.attempt();
            return Err(if attempts == 1 {
                error
            } else {
                QueueError::MaxRetriesExceeded {
                    attempts,
                    last_error: error.to_string(),
                }
            });
        }
    }
}

#[async_trait]
impl SignalQueuePort for AzureQueueClient {
    async fn get_properties(&self) -> Result<QueueProperties, QueueError> {
        let response = self
            .send(QueueOperation::GetProperties, || {
                self.client
                    .get(self.config.queue_url.clone())
                    .query(&[("comp", "metadata")])
            })
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let headers = response.headers();
        Ok(QueueProperties {
            approximate_message_count: header_str(headers, APPROXIMATE_MESSAGES_COUNT)
                .and_then(|v| v.parse().ok()),
            queue_request_id: header_str(headers, REQUEST_ID).map(str::to_string),
        })
    }

    async fn create_queue(&self) -> Result<QueueCreation, QueueError> {
        let response = self
            .send(QueueOperation::CreateQueue, || {
                self.client.put(self.config.queue_url.clone()).body(Vec::new())
            })
            .await?;

        match response.status() {
            StatusCode::CREATED => {
                tracing::info!(queue = self.queue_name(), "Queue created");
                Ok(QueueCreation::Created)
            }
            StatusCode::NO_CONTENT => Ok(QueueCreation::AlreadyExists),
            StatusCode::CONFLICT
                if header_str(response.headers(), ERROR_CODE) == Some(QUEUE_ALREADY_EXISTS) =>
            {
                Ok(QueueCreation::AlreadyExists)
            }
            _ => Err(error_from_response(response).await),
        }
    }

    async fn put_message(&self, text: &str, ttl: MessageTtl) -> Result<EnqueuedMessage, QueueError> {
        let body = format!("<QueueMessage><MessageText>{text}</MessageText></QueueMessage>");
        let ttl = ttl.to_string();

        let response = self
            .send(QueueOperation::PutMessage, || {
                self.client
                    .post(self.messages_url.clone())
                    .query(&[("messagettl", ttl.as_str())])
                    .header(CONTENT_TYPE, "application/xml")
                    .body(body.clone())
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let queue_request_id = header_str(response.headers(), REQUEST_ID).map(str::to_string);
        let payload = response.text().await.map_err(|e| QueueError::InvalidResponse {
            message: e.to_string(),
        })?;
        let message_id = xml_element(&payload, "MessageId").ok_or_else(|| {
            QueueError::InvalidResponse {
                message: "missing MessageId".to_string(),
            }
        })?;

        Ok(EnqueuedMessage {
            message_id,
            status: status.as_u16(),
            queue_request_id,
        })
    }
}

/// Map a failed response to a port error.
async fn error_from_response(response: Response) -> QueueError {
    let status = response.status();
    let code = header_str(response.headers(), ERROR_CODE)
        .unwrap_or_default()
        .to_string();
    let body = response.text().await.unwrap_or_default();
    let message = xml_element(&body, "Message")
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_default();

    match status {
        StatusCode::NOT_FOUND => QueueError::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => QueueError::Authentication { message },
        _ => QueueError::Service {
            status: status.as_u16(),
            code,
            message,
        },
    }
}

fn transport_error(error: &reqwest::Error) -> QueueError {
    if error.is_timeout() {
        QueueError::Timeout
    } else {
        QueueError::Network {
            message: error.to_string(),
        }
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_str(headers, RETRY_AFTER.as_str())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Unescaped text content of the first `<name>` element.
///
/// Service responses are flat and attribute-free, so a tag search is enough.
fn xml_element(body: &str, name: &str) -> Option<String> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = body.find(&open)? + open.len();
    let end = start + body[start..].find(&close)?;
    Some(unescape_xml(body[start..end].trim()))
}

/// Resolve the predefined XML entities and numeric character references.
/// Unknown or malformed references are kept verbatim.
fn unescape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let resolved = rest.find(';').and_then(|semi| {
            let ch = match &rest[1..semi] {
                "lt" => '<',
                "gt" => '>',
                "amp" => '&',
                "quot" => '"',
                "apos" => '\'',
                entity => {
                    let hex = entity
                        .strip_prefix("#x")
                        .or_else(|| entity.strip_prefix("#X"));
                    let code = match hex {
                        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                        None => entity.strip_prefix('#')?.parse().ok()?,
                    };
                    char::from_u32(code)?
                }
            };
            Some((ch, semi + 1))
        });
        match resolved {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
