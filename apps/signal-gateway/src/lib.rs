#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Signal Gateway - Trading Signal Ingestion
//!
//! An HTTP gateway that admits trading signals from external alerting
//! sources, validates them, and durably enqueues them on a storage queue
//! for downstream consumers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Signal model and admission policy
//!   - `signal`: Signal event, validation, wire codec
//!   - `policy`: Origin, auth header and signal key checks
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Queue service interface
//!   - `services`: Queue provisioning and signal delivery
//!   - `context`: Per-request correlation id, deadline and cancellation
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `http`: Gateway endpoint and admission pipeline
//!   - `queue`: Storage queue REST client with SharedKey signing and retries
//!   - `config`: Environment configuration
//!   - `health`: Health check and metrics endpoint
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//! Alert source ──► POST /api/gateway ──► policy ──► decode ──► policy
//!                                                                │
//!                        Storage queue ◄── put message ◄── probe/create
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Signal model and admission policy.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Request-level error taxonomy.
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::policy::{PolicyConfig, PolicyDenial, PolicyEvaluator};
pub use domain::signal::{Action, SignalError, SignalEvent, parse_signal, signal_to_data};

// Application
pub use application::context::RequestContext;
pub use application::ports::{MessageTtl, QueueError, SignalQueuePort};
pub use application::services::{DeliveryError, EnqueueReceipt, SignalDelivery};

// Errors
pub use error::GatewayError;

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, ConfigErrors, GatewayConfig, LogLevel, QueueSettings, ServerSettings,
};

// HTTP gateway
pub use infrastructure::http::{AppState, create_router};

// Queue adapter
pub use infrastructure::queue::{AzureQueueClient, QueueClientConfig, StorageCredentials};

// Health server
pub use infrastructure::health::{GatewayStats, HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
