use rand::Rng;
use std::time::Duration;

use crate::domain::DeliveryAttempt;

/// Retry strategy for webhook delivery.
///
/// Failed deliveries are retried with exponentially increasing delays, capped
/// at `max_delay`, plus random jitter of up to `jitter_ratio` of the delay.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    base_delay_ms: u64,

    max_delay_ms: u64,

    jitter_ratio: f64,
}

/// What to do after an attempt has been made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Succeeded,

    /// Re-attempt after `delay`; `retry_count` is the budget spent so far
    Retry { retry_count: u32, delay: Duration },

    Exhausted,
}

impl RetryStrategy {
    /// Create a new retry strategy with the default jitter ratio (0.2)
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            jitter_ratio: 0.2,
        }
    }

    /// Set the jitter ratio, clamped to `[0, 1]`
    pub fn with_jitter(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = if jitter_ratio.is_finite() {
            jitter_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn jitter_ratio(&self) -> f64 {
        self.jitter_ratio
    }

    /// Delay before retry number `retry_count` (1-based), without jitter
    pub fn base_backoff(&self, retry_count: u32) -> Duration {
        // Exponential backoff: 2^(retry-1)
        let multiplier = 2_u64.saturating_pow(retry_count.saturating_sub(1));
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier);

        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    /// Delay before retry number `retry_count`, with jitter applied
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let delay = self.base_backoff(retry_count);
        let jitter_max_ms = (delay.as_millis() as f64 * self.jitter_ratio) as u64;

        if jitter_max_ms == 0 {
            return delay;
        }

        let jitter = rand::thread_rng().gen_range(0..=jitter_max_ms);
        delay + Duration::from_millis(jitter)
    }

    /// Decide the next step for a delivery.
    ///
    /// `retry_count` is the number of retries already spent on this delivery
    /// before `attempt` was made.
    pub fn decide(
        &self,
        attempt: &DeliveryAttempt,
        retry_count: u32,
        max_retries: u32,
    ) -> RetryDecision {
        if attempt.success {
            return RetryDecision::Succeeded;
        }

        if !attempt.can_retry || retry_count >= max_retries {
            return RetryDecision::Exhausted;
        }

        let retry_count = retry_count + 1;
        let delay = match attempt.retry_after_secs {
            Some(secs) => Duration::from_secs(secs).min(self.max_delay()),
            None => self.backoff(retry_count),
        };

        RetryDecision::Retry { retry_count, delay }
    }
}

/// Whether a non-2xx status is worth retrying: 5xx and 429 only
pub fn is_retryable_status(status_code: u16) -> bool {
    matches!(status_code, 429 | 500..=599)
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::new(1_000, 300_000)
    }
}
