use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

const MIN_DELAY: Duration = Duration::from_secs(1);

/// Exponential backoff with symmetric jitter for requeued work items.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    /// Fraction of the delay the jitter may add or remove, clamped to `0.0..=1.0`.
    jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, jitter_ratio: f64) -> Self {
        let jitter_ratio = if jitter_ratio.is_finite() {
            jitter_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter_ratio,
        }
    }

    /// `min(base * 2^failures, max)`, before jitter.
    pub fn backoff(&self, failures: u32) -> Duration {
        let multiplier = 2_u32.checked_pow(failures).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff scaled by `1 + jitter`, where `jitter` is in `-ratio..=ratio`.
    pub fn delay_with_jitter(&self, failures: u32, jitter: f64) -> Duration {
        let jitter = jitter.clamp(-self.jitter_ratio, self.jitter_ratio);
        self.backoff(failures)
            .mul_f64(1.0 + jitter)
            .max(MIN_DELAY)
    }

    pub fn next_delay(&self, failures: u32) -> Duration {
        let jitter = if self.jitter_ratio > 0.0 {
            rand::thread_rng().gen_range(-self.jitter_ratio..=self.jitter_ratio)
        } else {
            0.0
        };
        self.delay_with_jitter(failures, jitter)
    }

    pub fn next_retry_at(&self, now: DateTime<Utc>, failures: u32) -> DateTime<Utc> {
        let delay = self.next_delay(failures);
        let millis = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        now.checked_add_signed(chrono::Duration::milliseconds(millis))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(15 * 60), 0.1)
    }
}
