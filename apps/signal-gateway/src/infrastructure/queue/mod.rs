//! Durable Queue Adapter
//!
//! REST client for an Azure Storage queue implementing `SignalQueuePort`.
//!
//! - `auth`: SharedKey request signing
//! - `retry`: backoff policy and status categorization
//! - `client`: metadata probe, queue creation and message submission

pub mod auth;
pub mod client;
pub mod config;
pub mod retry;

pub use auth::{CredentialsError, StorageCredentials};
pub use client::{AzureQueueClient, QueueClientError, QueueOperation};
pub use config::{QUEUE_API_VERSION, QueueClientConfig};
pub use retry::{ExponentialBackoff, RetryPolicy};
