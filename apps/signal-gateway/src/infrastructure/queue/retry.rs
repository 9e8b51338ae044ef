//! Retry policy with exponential backoff for queue service calls.
//!
//! # Retryable Failures
//!
//! | Retryable | Non-Retryable |
//! |-----------|---------------|
//! | HTTP 408 (Request Timeout) | HTTP 400 (Bad Request) |
//! | HTTP 429 (Throttled) | HTTP 401/403 (Auth Errors) |
//! | HTTP 5xx (Server Busy, Internal Error) | HTTP 404 (Queue Not Found) |
//! | Per-try timeouts | HTTP 409 (Conflict) |
//! | Connection failures | |

use std::time::Duration;

use rand::Rng;

/// Lowest accepted try count.
pub const MIN_TRIES: u32 = 1;

/// Highest accepted try count.
pub const MAX_TRIES: u32 = 10;

/// Retry policy for queue calls.
///
/// `max_tries` counts every attempt including the first, so `1` disables
/// retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per call, within `1..=10`.
    pub max_tries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor between retries.
    pub multiplier: f64,
    /// Jitter factor (0.2 = ±20%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Default policy with the given try count, clamped to `1..=10`.
    #[must_use]
    pub fn with_max_tries(max_tries: u32) -> Self {
        Self {
            max_tries: max_tries.clamp(MIN_TRIES, MAX_TRIES),
            ..Self::default()
        }
    }

    /// Set the backoff bounds.
    #[must_use]
    pub const fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Disable jitter.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }
}

/// Tracks attempts for one call and yields retry delays.
#[derive(Debug)]
pub struct ExponentialBackoff {
    attempt: u32,
    max_tries: u32,
    current: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter_factor: f64,
}

impl ExponentialBackoff {
    /// Start a fresh call.
    #[must_use]
    pub const fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 1,
            max_tries: policy.max_tries,
            current: policy.initial_backoff,
            max_backoff: policy.max_backoff,
            multiplier: policy.multiplier,
            jitter_factor: policy.jitter_factor,
        }
    }

    /// Attempt number in progress, starting at 1.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt, or `None` once the try budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_tries {
            return None;
        }
        self.attempt += 1;

        let base = self.current;
        self.current = Duration::from_secs_f64(
            (self.current.as_secs_f64() * self.multiplier).min(self.max_backoff.as_secs_f64()),
        );

        Some(self.apply_jitter(base).min(self.max_backoff))
    }

    /// Like [`Self::next_backoff`] but prefers a server-supplied delay.
    pub fn next_backoff_with_hint(&mut self, retry_after: Option<Duration>) -> Option<Duration> {
        let delay = self.next_backoff()?;
        Some(retry_after.map_or(delay, |hint| hint.min(self.max_backoff)))
    }

    fn apply_jitter(&self, base: Duration) -> Duration {
        if self.jitter_factor <= 0.0 {
            return base;
        }
        let base_secs = base.as_secs_f64();
        let range = base_secs * self.jitter_factor;
        let jittered = rand::rng().random_range((base_secs - range).max(0.0)..=base_secs + range);
        Duration::from_secs_f64(jittered)
    }
}

/// How a response status affects retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    /// 2xx.
    Success,
    /// Transient failure worth retrying.
    Retryable,
    /// Permanent failure; hand the response back to the caller.
    Final,
}

/// Categorize an HTTP status for retry handling.
#[must_use]
pub const fn categorize_status(status: u16) -> StatusCategory {
    match status {
        200..=299 => StatusCategory::Success,
        408 | 429 | 500..=599 => StatusCategory::Retryable,
        _ => StatusCategory::Final,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_max_tries_clamps() {
        assert_eq!(RetryPolicy::with_max_tries(0).max_tries, 1);
        assert_eq!(RetryPolicy::with_max_tries(4).max_tries, 4);
        assert_eq!(RetryPolicy::with_max_tries(50).max_tries, 10);
    }

    #[test]
    fn backoff_sequence_without_jitter() {
        let policy = RetryPolicy::with_max_tries(4)
            .with_backoff(Duration::from_millis(100), Duration::from_secs(10))
            .without_jitter();
        let mut backoff = ExponentialBackoff::new(&policy);

        assert_eq!(backoff.attempt(), 1);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(400)));
        assert_eq!(backoff.attempt(), 4);
        assert!(backoff.next_backoff().is_none());
    }

    #[test]
    fn single_try_never_retries() {
        let mut backoff = ExponentialBackoff::new(&RetryPolicy::with_max_tries(1));

        assert!(backoff.next_backoff().is_none());
        assert_eq!(backoff.attempt(), 1);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::with_max_tries(10)
            .with_backoff(Duration::from_secs(1), Duration::from_secs(3))
            .without_jitter();
        let mut backoff = ExponentialBackoff::new(&policy);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(3)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::with_max_tries(2)
            .with_backoff(Duration::from_millis(1000), Duration::from_secs(10));

        for _ in 0..50 {
            let delay = ExponentialBackoff::new(&policy).next_backoff().unwrap();
            assert!(delay >= Duration::from_millis(799));
            assert!(delay <= Duration::from_millis(1201));
        }
    }

    #[test]
    fn retry_after_hint_is_capped() {
        let policy = RetryPolicy::with_max_tries(3)
            .with_backoff(Duration::from_millis(100), Duration::from_secs(2))
            .without_jitter();
        let mut backoff = ExponentialBackoff::new(&policy);

        assert_eq!(
            backoff.next_backoff_with_hint(Some(Duration::from_secs(60))),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            backoff.next_backoff_with_hint(None),
            Some(Duration::from_millis(200))
        );
        assert!(backoff.next_backoff_with_hint(Some(Duration::from_secs(1))).is_none());
    }

    #[test]
    fn status_categories() {
        assert_eq!(categorize_status(201), StatusCategory::Success);
        assert_eq!(categorize_status(204), StatusCategory::Success);
        assert_eq!(categorize_status(408), StatusCategory::Retryable);
        assert_eq!(categorize_status(429), StatusCategory::Retryable);
        assert_eq!(categorize_status(500), StatusCategory::Retryable);
        assert_eq!(categorize_status(503), StatusCategory::Retryable);
        assert_eq!(categorize_status(400), StatusCategory::Final);
        assert_eq!(categorize_status(403), StatusCategory::Final);
        assert_eq!(categorize_status(404), StatusCategory::Final);
        assert_eq!(categorize_status(409), StatusCategory::Final);
    }
}
