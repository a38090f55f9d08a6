//! Retry decisions and backoff delays for failed step attempts.
//!
//! Stateless: the step runner owns the attempt loop and asks `RetryHandler`
//! whether another attempt is allowed and how long to wait before it.

use std::time::Duration;

use cadence_types::workflow::{BackoffStrategy, RetryPolicy};

use super::step_runner::StepError;

/// Largest exponent applied by exponential backoff before capping.
const MAX_EXPONENT: u32 = 32;

/// Stateless retry handler for workflow step failures.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether a failed attempt should be retried.
    ///
    /// `retries_so_far` is 0 after the first attempt fails. The policy's
    /// `max_attempts` counts retries, so a policy of 2 allows 3 attempts.
    /// Cancellation and approval outcomes are never retried.
    pub fn should_retry(policy: Option<&RetryPolicy>, retries_so_far: u32, error: &StepError) -> bool {
        let Some(policy) = policy else {
            return false;
        };
        error.is_retryable() && retries_so_far < policy.max_attempts
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// - fixed: `base`
    /// - linear: `base * retry`
    /// - exponential: `min(base * 2^retry, cap)` where `cap` is the policy's
    ///   `max_delay_ms` or `default_cap_ms`
    pub fn delay_for(policy: &RetryPolicy, retry: u32, default_cap_ms: u64) -> Duration {
        let base = policy.base_delay_ms;
        let ms = match policy.backoff {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry)),
            BackoffStrategy::Exponential => {
                let cap = policy.max_delay_ms.unwrap_or(default_cap_ms);
                let factor = 1u64 << retry.min(MAX_EXPONENT);
                base.saturating_mul(factor).min(cap)
            }
        };
        Duration::from_millis(ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
