//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the HTTP surfaces.

/// Configuration loaded from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Gateway HTTP endpoint.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Storage queue REST adapter.
pub mod queue;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;
