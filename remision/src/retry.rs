//! Retry policy - exponential backoff with jitter for failed batches

use crate::config::RetryConfig;
use chrono::{DateTime, Duration, Utc};

/// Decides whether a failed batch gets another attempt and when
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Attempts allowed before a batch fails terminally
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// No attempts left after `attempts` transport failures
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.config.max_attempts
    }

    /// Delay after the `attempts`-th consecutive failure (1-based)
    pub fn delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(62) as i32;
        let base_delay =
            self.config.base_delay_secs as f64 * self.config.backoff_multiplier.powi(exponent);

        // Cap at max_delay
        let capped_delay = base_delay.min(self.config.max_delay_secs as f64);

        // Spread retries of batches that failed together
        let jitter_range = capped_delay * self.config.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            (rand::random::<f64>() - 0.5) * jitter_range * 2.0
        } else {
            0.0
        };
        let final_delay = (capped_delay + jitter).max(0.0);

        Duration::milliseconds((final_delay * 1000.0) as i64)
    }

    /// When a batch that has failed `attempts` times may be re-queued
    pub fn next_attempt_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        now + self.delay(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy(jitter_factor: f64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            jitter_factor,
            ..RetryConfig::default()
        })
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = policy(0.0);

        assert_eq!(policy.delay(1), Duration::seconds(30));
        assert_eq!(policy.delay(2), Duration::seconds(60));
        assert_eq!(policy.delay(3), Duration::seconds(120));
        assert_eq!(policy.delay(4), Duration::seconds(240));
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = policy(0.0);

        assert_eq!(policy.delay(8), Duration::seconds(3600));
        assert_eq!(policy.delay(u32::MAX), Duration::seconds(3600));
    }

    #[test]
    fn test_exhaustion_at_ceiling() {
        let policy = policy(0.0);

        assert_eq!(policy.max_attempts(), 5);
        assert!(!policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));
    }

    proptest! {
        #[test]
        fn prop_jitter_stays_in_band(attempts in 1u32..12, jitter in 0.0f64..1.0) {
            let policy = policy(jitter);
            let unjittered = (30.0 * 2f64.powi(attempts as i32 - 1)).min(3600.0);
            let delay = policy.delay(attempts).num_milliseconds() as f64 / 1000.0;

            prop_assert!(delay >= unjittered * (1.0 - jitter) - 0.001);
            prop_assert!(delay <= unjittered * (1.0 + jitter) + 0.001);
        }
    }
}
