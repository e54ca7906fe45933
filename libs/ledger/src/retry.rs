use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter.
///
/// `delay = min(base_delay * 2^attempt, max_delay)`, then scaled by a factor
/// drawn uniformly from `1 ± jitter_percent / 100` and floored at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_percent: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            jitter_percent: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub retry_after: Option<Duration>,
}

impl RetryDecision {
    pub fn retry_after(delay: Duration) -> Self {
        Self {
            should_retry: true,
            retry_after: Some(delay),
        }
    }

    pub fn exhausted() -> Self {
        Self {
            should_retry: false,
            retry_after: None,
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay for the retry that follows `attempt` earlier failures.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.jitter(self.capped_delay(attempt))
    }

    fn jitter(&self, delay: Duration) -> Duration {
        if self.jitter_percent == 0 || delay.is_zero() {
            return delay;
        }

        let spread = f64::from(self.jitter_percent) / 100.0;
        let offset = rand::rng().random_range(-spread..=spread);
        let millis = delay.as_secs_f64() * 1000.0 * (1.0 + offset);
        Duration::from_secs_f64(millis.max(0.0) / 1000.0)
    }
}
