//! Submission gates: circuit breaker and flow control
//!
//! Both are evaluated against the injected clock before a batch is claimed.
//! A closed gate defers the batch; it stays queued.

use crate::config::{BreakerConfig, FlowControlConfig};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{error, info};

/// Stops submissions after consecutive transport failures
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    pause: Duration,
    state: Mutex<BreakerState>,
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            threshold: config.failure_threshold,
            pause: Duration::seconds(config.pause_secs as i64),
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// `Err(until)` while the breaker is open
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), DateTime<Utc>> {
        match self.state.lock().open_until {
            Some(until) if until > now => Err(until),
            _ => Ok(()),
        }
    }

    /// Count a transport failure; returns true when this failure opened the breaker
    pub fn record_failure(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;

        // After the pause the count is not reset, so one more failure reopens it
        if state.consecutive_failures >= self.threshold {
            let until = now + self.pause;
            state.open_until = Some(until);
            error!(
                consecutive_failures = state.consecutive_failures,
                open_until = %until,
                "Circuit breaker opened"
            );
            return true;
        }
        false
    }

    /// Close the breaker after a successful transport call
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if state.consecutive_failures > 0 || state.open_until.is_some() {
            info!(
                consecutive_failures = state.consecutive_failures,
                "Circuit breaker reset"
            );
        }
        *state = BreakerState::default();
    }

    /// Failures since the last success
    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }
}

/// Minimum spacing between gateway submissions
#[derive(Debug)]
pub struct FlowControl {
    min_interval: Duration,
    last_submission: Mutex<Option<DateTime<Utc>>>,
}

impl FlowControl {
    /// Create a gate with no prior submission
    pub fn new(config: &FlowControlConfig) -> Self {
        Self {
            min_interval: Duration::seconds(config.min_interval_secs as i64),
            last_submission: Mutex::new(None),
        }
    }

    /// Take the submission slot, or `Err(next_allowed)` if it is too soon
    pub fn try_acquire(&self, now: DateTime<Utc>) -> Result<(), DateTime<Utc>> {
        let mut last = self.last_submission.lock();
        if let Some(previous) = *last {
            let next_allowed = previous + self.min_interval;
            if now < next_allowed {
                return Err(next_allowed);
            }
        }
        *last = Some(now);
        Ok(())
    }

    /// Time of the last granted slot
    pub fn last_submission(&self) -> Option<DateTime<Utc>> {
        *self.last_submission.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_breaker_opens_at_threshold() {
        let breaker = CircuitBreaker::new(&BreakerConfig::default());

        for _ in 0..4 {
            assert!(!breaker.record_failure(t0()));
        }
        assert!(breaker.check(t0()).is_ok());

        assert!(breaker.record_failure(t0()));
        assert_eq!(breaker.check(t0()), Err(t0() + Duration::seconds(300)));
        assert!(breaker.check(t0() + Duration::seconds(300)).is_ok());
    }

    #[test]
    fn test_breaker_reopens_on_next_failure_after_pause() {
        let breaker = CircuitBreaker::new(&BreakerConfig {
            failure_threshold: 2,
            pause_secs: 10,
        });
        breaker.record_failure(t0());
        breaker.record_failure(t0());

        let later = t0() + Duration::seconds(11);
        assert!(breaker.check(later).is_ok());
        assert!(breaker.record_failure(later));
        assert!(breaker.check(later).is_err());
    }

    #[test]
    fn test_breaker_success_resets() {
        let breaker = CircuitBreaker::new(&BreakerConfig::default());
        for _ in 0..5 {
            breaker.record_failure(t0());
        }
        breaker.record_success();

        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(breaker.check(t0()).is_ok());
    }

    #[test]
    fn test_flow_control_spacing() {
        let flow = FlowControl::new(&FlowControlConfig::default());

        assert!(flow.try_acquire(t0()).is_ok());
        assert_eq!(
            flow.try_acquire(t0() + Duration::seconds(59)),
            Err(t0() + Duration::seconds(60))
        );
        assert!(flow.try_acquire(t0() + Duration::seconds(60)).is_ok());
        assert_eq!(flow.last_submission(), Some(t0() + Duration::seconds(60)));
    }

    #[test]
    fn test_flow_control_disabled_with_zero_interval() {
        let flow = FlowControl::new(&FlowControlConfig {
            min_interval_secs: 0,
        });
        assert!(flow.try_acquire(t0()).is_ok());
        assert!(flow.try_acquire(t0()).is_ok());
    }
}
