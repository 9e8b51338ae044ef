//! Configuration Module
//!
//! Environment-driven configuration for the gateway.

mod settings;

pub use settings::{
    ConfigError, ConfigErrors, GatewayConfig, LogLevel, QueueSettings, ServerSettings,
};
