//! Retry policy with exponential backoff.
//!
//! # Retry Policy
//!
//! - Reads: 2 retries (3 total attempts)
//! - Mutations: 1 retry (2 total attempts)
//! - Initial delay: 1 second, doubling per retry
//! - Max delay: 30 seconds
//!
//! # Retryable Conditions
//!
//! - Connection errors (`ApiError::Network`)
//! - HTTP 5xx (`ApiError::Server`)
//!
//! Anything carrying a 4xx status is never retried, and neither are
//! undecodable responses: the same request would fail the same way.

use std::future::Future;
use std::time::Duration;

use tally_types::ApiError;

/// Retry configuration. Deciding is a pure function of the attempt count
/// and the error; the policy holds no mutable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries (not counting the initial attempt).
    pub max_retries: u32,
    /// Backoff delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for the backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::reads()
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

impl RetryPolicy {
    pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

    #[must_use]
    pub const fn reads() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Self::DEFAULT_INITIAL_DELAY,
            max_delay: Self::DEFAULT_MAX_DELAY,
        }
    }

    #[must_use]
    pub const fn mutations() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Self::DEFAULT_INITIAL_DELAY,
            max_delay: Self::DEFAULT_MAX_DELAY,
        }
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub const fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    /// `failed_attempts` counts failures so far, including this one (>= 1).
    #[must_use]
    pub fn decide(&self, failed_attempts: u32, error: &ApiError) -> RetryDecision {
        if !should_retry(error) || failed_attempts == 0 || failed_attempts > self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: calculate_retry_delay(failed_attempts - 1, self),
        }
    }
}

/// Determine if an error is worth another attempt.
#[must_use]
pub fn should_retry(error: &ApiError) -> bool {
    !error.is_client_error() && error.is_transient()
}

/// Exponential backoff: `initial_delay * 2^backoff_step`, capped at `max_delay`.
///
/// `backoff_step` is 0 before the first retry, 1 before the second, etc.
#[must_use]
pub fn calculate_retry_delay(backoff_step: u32, policy: &RetryPolicy) -> Duration {
    let factor = 2_u32.checked_pow(backoff_step).unwrap_or(u32::MAX);
    policy
        .initial_delay
        .checked_mul(factor)
        .unwrap_or(policy.max_delay)
        .min(policy.max_delay)
}

/// Run `operation` until it succeeds or `policy` gives up.
///
/// The terminal error is returned unchanged.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut failed_attempts = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                failed_attempts += 1;
                match policy.decide(failed_attempts, &err) {
                    RetryDecision::Retry { delay } => {
                        tracing::debug!(
                            label,
                            error = %err,
                            retry_count = failed_attempts,
                            delay_ms = delay.as_millis(),
                            "Retrying after transient error"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::GiveUp => {
                        tracing::debug!(
                            label,
                            error = %err,
                            attempts = failed_attempts,
                            "Giving up"
                        );
                        return Err(err);
                    }
                }
            }
        }
    }
}
