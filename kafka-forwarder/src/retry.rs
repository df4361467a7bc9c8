use std::time::Duration;

use crate::sink::StoreError;

/// Exponential backoff policy.
///
/// - initial_delay: base delay for attempt 0
/// - multiplier: factor by which delay grows each attempt (> 1.0)
/// - max_delay: cap for the computed delay
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub const fn new(initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay,
        }
    }

    /// Default bulk-write backoff: 10ms doubling up to 8s.
    pub const fn default_bulk() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
        }
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        let pow = self.multiplier.powi(attempt as i32);
        let scaled = if pow.is_finite() {
            self.initial_delay.mul_f64(pow)
        } else {
            self.max_delay
        };
        scaled.min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then re-issue the identical request.
    Retry(Duration),
    /// Attempts exhausted; give up on this flush.
    Stop,
    /// The store is categorically unreachable; skip all remaining attempts.
    Fatal,
}

/// Pure decision function consulted between bulk-write attempts. Performs no
/// I/O and no sleeping; the caller owns the backoff wait.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffPolicy,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    pub fn decide(&self, attempt: u32, error: &StoreError) -> RetryDecision {
        if matches!(error, StoreError::Unreachable(_)) {
            return RetryDecision::Fatal;
        }
        if attempt >= self.max_attempts {
            return RetryDecision::Stop;
        }
        RetryDecision::Retry(self.backoff.next_delay(attempt))
    }
}
