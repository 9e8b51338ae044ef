//! Admission Policy
//!
//! Decides whether a request may proceed, independent of payload content.
//!
//! # Checks
//!
//! | Check | Stage | Enabled when |
//! |-------|-------|--------------|
//! | Origin | before method routing | always |
//! | Auth header | before the body is read | `require_auth_header` |
//! | Signal key | after decoding | `require_signal_key` |
//!
//! Checks are evaluated in order with short-circuit AND. A failing check
//! yields a [`PolicyDenial`] tagged with its [`DenialReason`].

use std::fmt;

use subtle::ConstantTimeEq;

use super::signal::SignalEvent;

/// Origin pattern that admits every origin.
pub const ALLOW_ANY_ORIGIN: &str = "*";

/// Shared secret value that disables token checks.
pub const ALLOW_ALL_TOKEN: &str = "ALLOW";

/// Default name of the shared-secret header.
pub const DEFAULT_AUTH_HEADER: &str = "X-Gateway-Allow-Token";

// =============================================================================
// Configuration
// =============================================================================

/// Allowed origin rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginRule {
    /// Every origin is accepted.
    Any,
    /// Origin must end with `suffix`.
    Suffix {
        /// Pattern as configured, e.g. `*.example.com`.
        pattern: String,
        /// Pattern with its first `*` removed.
        suffix: String,
    },
}

impl OriginRule {
    /// Build a rule from a configured pattern.
    ///
    /// `*` alone means any origin. Otherwise the first `*` is stripped and
    /// the remainder is used as a suffix, so `*.example.com` matches
    /// `app.example.com`.
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim();
        if pattern == ALLOW_ANY_ORIGIN {
            Self::Any
        } else {
            Self::Suffix {
                pattern: pattern.to_string(),
                suffix: pattern.replacen('*', "", 1),
            }
        }
    }

    /// Pattern as configured, for CORS responses.
    #[must_use]
    pub fn as_header_value(&self) -> &str {
        match self {
            Self::Any => ALLOW_ANY_ORIGIN,
            Self::Suffix { pattern, .. } => pattern,
        }
    }
}

/// Shared secret used by the header and signal key checks.
#[derive(Clone, PartialEq, Eq)]
pub enum SharedSecret {
    /// Token checks always pass.
    AllowAll,
    /// Value that must match exactly.
    Token(String),
}

impl SharedSecret {
    /// Build from the configured value, recognising the allow-all sentinel.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == ALLOW_ALL_TOKEN {
            Self::AllowAll
        } else {
            Self::Token(value.to_string())
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::AllowAll => true,
            Self::Token(token) => bool::from(token.as_bytes().ct_eq(candidate.as_bytes())),
        }
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllowAll => f.write_str("AllowAll"),
            Self::Token(_) => f.write_str("Token([REDACTED])"),
        }
    }
}

/// Immutable admission policy.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Allowed origins.
    pub origin: OriginRule,
    /// Shared secret for header and key checks.
    pub secret: SharedSecret,
    /// Header carrying the shared secret.
    pub auth_header: String,
    /// Enforce the auth header check.
    pub require_auth_header: bool,
    /// Enforce the signal key check.
    pub require_signal_key: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            origin: OriginRule::Any,
            secret: SharedSecret::AllowAll,
            auth_header: DEFAULT_AUTH_HEADER.to_string(),
            require_auth_header: false,
            require_signal_key: false,
        }
    }
}

// =============================================================================
// Checks and Denials
// =============================================================================

/// Pipeline position at which a check runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyStage {
    /// Before method routing, headers only.
    Origin,
    /// After method routing, before reading the body.
    Headers,
    /// After the signal has been decoded.
    Object,
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenialReason {
    /// No `Origin` header.
    MissingOrigin,
    /// An origin value did not match.
    OriginMismatch,
    /// Auth header absent.
    MissingAuthHeader,
    /// Auth header present more than once.
    DuplicateAuthHeader,
    /// Auth header value did not match.
    AuthHeaderMismatch,
    /// Signal key absent or wrong.
    SignalKeyMismatch,
}

impl DenialReason {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MissingOrigin => "missing_origin",
            Self::OriginMismatch => "origin_mismatch",
            Self::MissingAuthHeader => "missing_auth_header",
            Self::DuplicateAuthHeader => "duplicate_auth_header",
            Self::AuthHeaderMismatch => "auth_header_mismatch",
            Self::SignalKeyMismatch => "signal_key_mismatch",
        }
    }
}

/// A failed policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("policy denied: {}", .reason.as_str())]
pub struct PolicyDenial {
    /// Check that failed.
    pub check: PolicyCheck,
    /// Specific reason.
    pub reason: DenialReason,
}

/// An individual admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyCheck {
    /// `Origin` header against the origin rule.
    Origin,
    /// Shared-secret header.
    AuthHeader,
    /// `key` field of the decoded signal.
    SignalKey,
}

impl PolicyCheck {
    /// Stage this check belongs to.
    #[must_use]
    pub const fn stage(&self) -> PolicyStage {
        match self {
            Self::Origin => PolicyStage::Origin,
            Self::AuthHeader => PolicyStage::Headers,
            Self::SignalKey => PolicyStage::Object,
        }
    }
}

/// What a stage's checks look at.
#[derive(Debug, Clone, Copy)]
pub enum PolicySubject<'a> {
    /// Values of the `Origin` header.
    Origin(&'a [&'a str]),
    /// Values of the auth header.
    Headers(&'a [&'a str]),
    /// The decoded signal.
    Object(&'a SignalEvent),
}

// =============================================================================
// Evaluator
// =============================================================================

/// Evaluates admission checks against an immutable [`PolicyConfig`].
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    config: PolicyConfig,
    checks: Vec<PolicyCheck>,
}

impl PolicyEvaluator {
    /// Create an evaluator; the enabled checks are fixed here.
    #[must_use]
    pub fn new(config: PolicyConfig) -> Self {
        let mut checks = vec![PolicyCheck::Origin];
        if config.require_auth_header {
            checks.push(PolicyCheck::AuthHeader);
        }
        if config.require_signal_key {
            checks.push(PolicyCheck::SignalKey);
        }
        Self { config, checks }
    }

    /// Policy in effect.
    #[must_use]
    pub const fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Enabled checks, in evaluation order.
    #[must_use]
    pub fn checks(&self) -> &[PolicyCheck] {
        &self.checks
    }

    /// Run every enabled check for `stage`, stopping at the first denial.
    ///
    /// # Errors
    ///
    /// Returns the first [`PolicyDenial`] encountered.
    pub fn evaluate(&self, stage: PolicyStage, subject: PolicySubject<'_>) -> Result<(), PolicyDenial> {
        self.checks
            .iter()
            .filter(|check| check.stage() == stage)
            .try_for_each(|check| self.run(*check, subject))
    }

    fn run(&self, check: PolicyCheck, subject: PolicySubject<'_>) -> Result<(), PolicyDenial> {
        let outcome = match (check, subject) {
            (PolicyCheck::Origin, PolicySubject::Origin(values)) => self.check_origin(values),
            (PolicyCheck::AuthHeader, PolicySubject::Headers(values)) => {
                self.check_auth_header(values)
            }
            (PolicyCheck::SignalKey, PolicySubject::Object(signal)) => self.check_signal_key(signal),
            // Subject for another stage; nothing to check.
            _ => Ok(()),
        };
        outcome.map_err(|reason| PolicyDenial { check, reason })
    }

    /// Whether the supplied `Origin` header values are acceptable.
    #[must_use]
    pub fn is_origin_allowed(&self, origins: &[&str]) -> bool {
        self.check_origin(origins).is_ok()
    }

    /// Whether the supplied auth header values are acceptable.
    #[must_use]
    pub fn is_auth_header_allowed(&self, values: &[&str]) -> bool {
        self.check_auth_header(values).is_ok()
    }

    /// Whether the signal carries the shared secret.
    #[must_use]
    pub fn is_object_authorized(&self, signal: &SignalEvent) -> bool {
        self.check_signal_key(signal).is_ok()
    }

    fn check_origin(&self, origins: &[&str]) -> Result<(), DenialReason> {
        match &self.config.origin {
            OriginRule::Any => {
                tracing::warn!("Origin check bypassed: any origin allowed");
                Ok(())
            }
            OriginRule::Suffix { .. } if origins.is_empty() => Err(DenialReason::MissingOrigin),
            OriginRule::Suffix { suffix, .. } => {
                if origins.iter().all(|origin| origin.ends_with(suffix.as_str())) {
                    Ok(())
                } else {
                    Err(DenialReason::OriginMismatch)
                }
            }
        }
    }

    fn check_auth_header(&self, values: &[&str]) -> Result<(), DenialReason> {
        if self.config.secret == SharedSecret::AllowAll {
            tracing::warn!(header = %self.config.auth_header, "Auth header check bypassed: token is ALLOW");
            return Ok(());
        }
        match values {
            [] => Err(DenialReason::MissingAuthHeader),
            [value] if self.config.secret.matches(value) => Ok(()),
            [_] => Err(DenialReason::AuthHeaderMismatch),
            _ => Err(DenialReason::DuplicateAuthHeader),
        }
    }

    fn check_signal_key(&self, signal: &SignalEvent) -> Result<(), DenialReason> {
        if self.config.secret == SharedSecret::AllowAll {
            tracing::warn!("Signal key check bypassed: token is ALLOW");
            return Ok(());
        }
        match signal.key.as_deref() {
            Some(key) if self.config.secret.matches(key) => Ok(()),
            _ => Err(DenialReason::SignalKeyMismatch),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::signal::Action;

    fn evaluator(origin: &str, token: &str, header: bool, key: bool) -> PolicyEvaluator {
        PolicyEvaluator::new(PolicyConfig {
            origin: OriginRule::parse(origin),
            secret: SharedSecret::parse(token),
            auth_header: DEFAULT_AUTH_HEADER.to_string(),
            require_auth_header: header,
            require_signal_key: key,
        })
    }

    fn signal_with_key(key: Option<&str>) -> SignalEvent {
        SignalEvent {
            ticker: "AAPL".to_string(),
            action: Action::Buy,
            close: Decimal::ONE,
            contracts_count: 1,
            notes: None,
            key: key.map(str::to_string),
        }
    }

    #[test]
    fn origin_rule_parsing() {
        assert_eq!(OriginRule::parse("*"), OriginRule::Any);
        assert_eq!(OriginRule::parse(" * "), OriginRule::Any);
        assert_eq!(
            OriginRule::parse("*.example.com"),
            OriginRule::Suffix {
                pattern: "*.example.com".to_string(),
                suffix: ".example.com".to_string(),
            }
        );
        assert_eq!(
            OriginRule::parse("example.com"),
            OriginRule::Suffix {
                pattern: "example.com".to_string(),
                suffix: "example.com".to_string(),
            }
        );
    }

    #[test]
    fn header_value_is_configured_pattern() {
        assert_eq!(OriginRule::parse("*").as_header_value(), "*");
        assert_eq!(OriginRule::parse(" *.example.com ").as_header_value(), "*.example.com");
    }

    #[test]
    fn origin_suffix_match() {
        let policy = evaluator("example.com", "secret", false, false);

        assert!(policy.is_origin_allowed(&["app.example.com"]));
        assert!(policy.is_origin_allowed(&["https://example.com"]));
        assert!(!policy.is_origin_allowed(&["example.com.evil.com"]));
        assert!(!policy.is_origin_allowed(&[]));
    }

    #[test]
    fn every_origin_value_must_match() {
        let policy = evaluator("example.com", "secret", false, false);

        assert!(policy.is_origin_allowed(&["a.example.com", "b.example.com"]));
        assert!(!policy.is_origin_allowed(&["a.example.com", "evil.com"]));
    }

    #[test]
    fn any_origin_accepts_missing_header() {
        let policy = evaluator("*", "secret", false, false);

        assert!(policy.is_origin_allowed(&[]));
        assert!(policy.is_origin_allowed(&["whatever.org"]));
    }

    #[test]
    fn auth_header_requires_exactly_one_match() {
        let policy = evaluator("*", "secret", true, false);

        assert!(policy.is_auth_header_allowed(&["secret"]));
        assert!(!policy.is_auth_header_allowed(&[]));
        assert!(!policy.is_auth_header_allowed(&["secret", "secret"]));
        assert!(!policy.is_auth_header_allowed(&["wrong"]));
        assert!(!policy.is_auth_header_allowed(&["secre"]));
    }

    #[test]
    fn allow_all_sentinel_bypasses_token_checks() {
        let policy = evaluator("*", "ALLOW", true, true);

        assert!(policy.is_auth_header_allowed(&[]));
        assert!(policy.is_object_authorized(&signal_with_key(None)));
    }

    #[test]
    fn signal_key_must_match_secret() {
        let policy = evaluator("*", "secret", false, true);

        assert!(policy.is_object_authorized(&signal_with_key(Some("secret"))));
        assert!(!policy.is_object_authorized(&signal_with_key(Some("nope"))));
        assert!(!policy.is_object_authorized(&signal_with_key(None)));
    }

    #[test]
    fn enabled_checks_follow_switches() {
        assert_eq!(evaluator("*", "s", false, false).checks(), &[PolicyCheck::Origin]);
        assert_eq!(
            evaluator("*", "s", true, true).checks(),
            &[PolicyCheck::Origin, PolicyCheck::AuthHeader, PolicyCheck::SignalKey]
        );
    }

    #[test]
    fn evaluate_tags_denial_reason() {
        let policy = evaluator("example.com", "secret", true, false);

        let denial = policy
            .evaluate(PolicyStage::Origin, PolicySubject::Origin(&[]))
            .unwrap_err();
        assert_eq!(denial.check, PolicyCheck::Origin);
        assert_eq!(denial.reason, DenialReason::MissingOrigin);

        let denial = policy
            .evaluate(PolicyStage::Headers, PolicySubject::Headers(&["a", "b"]))
            .unwrap_err();
        assert_eq!(denial.check, PolicyCheck::AuthHeader);
        assert_eq!(denial.reason, DenialReason::DuplicateAuthHeader);
    }

    #[test]
    fn disabled_checks_are_skipped() {
        let policy = evaluator("*", "secret", false, false);

        assert!(policy.evaluate(PolicyStage::Headers, PolicySubject::Headers(&[])).is_ok());
        assert!(
            policy
                .evaluate(PolicyStage::Object, PolicySubject::Object(&signal_with_key(None)))
                .is_ok()
        );
    }

    #[test]
    fn secret_is_redacted_in_debug() {
        let debug = format!("{:?}", SharedSecret::parse("hunter2"));
        assert!(!debug.contains("hunter2"));
    }
}
