//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the delivery service and the port interfaces
//! that define how the gateway interacts with the durable queue.

/// Per-request correlation and deadline context.
pub mod context;

/// Port interfaces for external systems.
pub mod ports;

/// Application services for signal delivery.
pub mod services;
