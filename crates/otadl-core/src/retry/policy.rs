use std::time::Duration;

use crate::config::RetryConfig;

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry; surface the failure.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Linear backoff with a minimum floor and an upper cap.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// No retry waits less than this.
    pub min_backoff: Duration,
    /// Delay added per failed attempt.
    pub backoff_step: Duration,
    /// Upper bound on backoff delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    /// Out-of-range values (infinite, too large) fall back to the defaults.
    fn from(cfg: &RetryConfig) -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: cfg.max_attempts.max(1),
            min_backoff: secs("min_backoff_secs", cfg.min_backoff_secs, defaults.min_backoff_secs),
            backoff_step: secs("backoff_step_secs", cfg.backoff_step_secs, defaults.backoff_step_secs),
            max_backoff: secs("max_backoff_secs", cfg.max_backoff_secs, defaults.max_backoff_secs),
        }
    }
}

fn secs(field: &str, value: f64, fallback: f64) -> Duration {
    // `f64::max` also maps NaN to 0.
    match Duration::try_from_secs_f64(value.max(0.0)) {
        Ok(d) => d,
        Err(_) => {
            tracing::warn!(field, value, fallback, "retry setting out of range, using default");
            Duration::from_secs_f64(fallback)
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Decide what to do after `attempt` (1-based) failed transiently.
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        let linear = self.backoff_step.saturating_mul(attempt);
        let delay = linear.max(self.min_backoff).min(self.max_backoff.max(self.min_backoff));
        RetryDecision::RetryAfter(delay)
    }
}
