//! Retry scheduling for failed batches

/// Exponential retry delays: `initial * 2^attempts`, capped at `max_delay_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBackoff {
    initial_delay_ms: i64,
    max_delay_ms: i64,
    max_attempts: u32,
}

impl RetryBackoff {
    pub fn new(initial_delay_ms: i64, max_delay_ms: i64, max_attempts: u32) -> Self {
        Self {
            initial_delay_ms,
            max_delay_ms,
            max_attempts,
        }
    }

    /// Delay before the next attempt, given the attempts already failed
    /// (not counting the one that just failed).
    pub fn delay_ms(&self, prior_attempts: u32) -> i64 {
        let factor = 2_i64.checked_pow(prior_attempts).unwrap_or(i64::MAX);
        self.initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// When to retry after a failure, or `None` to park the batch.
    ///
    /// Non-retryable failures and exhausted budgets park immediately.
    pub fn next_retry_at(&self, prior_attempts: u32, retryable: bool, now: i64) -> Option<i64> {
        if !retryable || prior_attempts.saturating_add(1) >= self.max_attempts {
            return None;
        }
        Some(now + self.delay_ms(prior_attempts))
    }
}
