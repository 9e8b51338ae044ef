//! Domain Layer - Signal types and admission policy.
//!
//! Pure types with no I/O. Everything here is synchronous and can be
//! exercised without a runtime.

/// Trading signal event and its wire codec.
pub mod signal;

/// Origin and shared-secret admission checks.
pub mod policy;
