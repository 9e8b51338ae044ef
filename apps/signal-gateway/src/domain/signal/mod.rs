//! Signal Event Types
//!
//! The trading signal carried end-to-end through the gateway, together with
//! its wire codec and field constraints.
//!
//! # Wire Format
//!
//! ```json
//! {"ticker":"AAPL","action":"buy","close":150.25,"contracts":10,"notes":"...","key":"..."}
//! ```
//!
//! `notes` and `key` are optional. Unknown fields are ignored on decode.
//! `key` is never emitted once cleared by [`SignalEvent::sanitize`].

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Constraints
// =============================================================================

/// Maximum ticker length in characters.
pub const MAX_TICKER_LEN: usize = 32;

/// Minimum contracts per signal.
pub const MIN_CONTRACTS: u32 = 1;

/// Maximum contracts per signal.
pub const MAX_CONTRACTS: u32 = 9999;

/// Free-text fields (`notes`, `key`) must be shorter than this many characters.
pub const MAX_TEXT_LEN: usize = 256;

/// Inclusive upper bound for `close` (9,999,999.99).
pub const MAX_CLOSE: Decimal = Decimal::from_parts(999_999_999, 0, 0, false, 2);

/// Prefix of the correlation annotation written into `notes`.
pub const REQUEST_ID_TAG: &str = "requestId=";

// =============================================================================
// Errors
// =============================================================================

/// Signal decode/encode errors.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Payload is not a well-formed signal object.
    #[error("malformed signal payload: {0}")]
    Malformed(#[source] serde_json::Error),

    /// A field violates its constraint.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// Field name as it appears on the wire.
        field: &'static str,
        /// Constraint that failed.
        reason: &'static str,
    },

    /// Serialization failed.
    #[error("failed to encode signal: {0}")]
    Encode(#[source] serde_json::Error),
}

impl SignalError {
    const fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::InvalidField { field, reason }
    }
}

// =============================================================================
// Types
// =============================================================================

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Open or add to a long position.
    Buy,
    /// Close or reduce a position.
    Sell,
}

impl Action {
    /// Get the wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated trading signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEvent {
    /// Instrument symbol.
    pub ticker: String,
    /// Trade direction.
    pub action: Action,
    /// Closing price that triggered the signal.
    #[serde(with = "rust_decimal::serde::float")]
    pub close: Decimal,
    /// Number of contracts.
    #[serde(rename = "contracts")]
    pub contracts_count: u32,
    /// Free-text annotation; carries the correlation id once delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Per-object secret. Erased before the event leaves the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl SignalEvent {
    /// Check every field constraint.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::InvalidField`] naming the first failing field.
    pub fn validate(&self) -> Result<(), SignalError> {
        let ticker = self.ticker.trim();
        if ticker.is_empty() {
            return Err(SignalError::invalid("ticker", "must not be empty"));
        }
        if ticker.chars().count() > MAX_TICKER_LEN {
            return Err(SignalError::invalid("ticker", "too long"));
        }
        if self.close <= Decimal::ZERO {
            return Err(SignalError::invalid("close", "must be greater than zero"));
        }
        if self.close > MAX_CLOSE {
            return Err(SignalError::invalid("close", "exceeds 9999999.99"));
        }
        if !(MIN_CONTRACTS..=MAX_CONTRACTS).contains(&self.contracts_count) {
            return Err(SignalError::invalid("contracts", "must be within 1..=9999"));
        }
        if exceeds_text_limit(self.notes.as_deref()) {
            return Err(SignalError::invalid("notes", "must be shorter than 256 characters"));
        }
        if exceeds_text_limit(self.key.as_deref()) {
            return Err(SignalError::invalid("key", "must be shorter than 256 characters"));
        }
        Ok(())
    }

    /// Erase the per-object secret.
    pub fn sanitize(&mut self) {
        self.key = None;
    }

    /// Write the correlation id into `notes`, keeping existing content.
    pub fn annotate_request_id(&mut self, request_id: &str) {
        let tag = format!("{REQUEST_ID_TAG}{request_id}");
        self.notes = Some(match self.notes.take() {
            Some(notes) if !notes.is_empty() => format!("{notes};{tag}"),
            _ => tag,
        });
    }

    /// Extract the correlation id previously written by
    /// [`Self::annotate_request_id`].
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.notes
            .as_deref()?
            .rsplit(';')
            .find_map(|part| part.strip_prefix(REQUEST_ID_TAG))
    }
}

fn exceeds_text_limit(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.chars().count() >= MAX_TEXT_LEN)
}

// =============================================================================
// Codec
// =============================================================================

/// Decode and validate a signal from request bytes.
///
/// # Errors
///
/// Returns [`SignalError::Malformed`] for structural problems and
/// [`SignalError::InvalidField`] for constraint violations.
pub fn parse_signal(data: &[u8]) -> Result<SignalEvent, SignalError> {
    let event: SignalEvent = serde_json::from_slice(data).map_err(SignalError::Malformed)?;
    event.validate()?;
    Ok(event)
}

/// Encode a signal to its JSON wire form.
///
/// # Errors
///
/// Returns [`SignalError::Encode`] if serialization fails.
pub fn signal_to_data(signal: &SignalEvent) -> Result<Vec<u8>, SignalError> {
    serde_json::to_vec(signal).map_err(SignalError::Encode)
}
