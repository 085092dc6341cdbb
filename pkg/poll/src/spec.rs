use std::time::Duration;

use pkg_constants::poll::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_INTERVAL, FIFTEEN_MINUTE_TIMEOUT, FIVE_MINUTE_TIMEOUT,
    FIVE_SECOND_TIMEOUT, ONE_MINUTE_TIMEOUT, TEN_MINUTE_TIMEOUT, TEN_SECOND_INTERVAL,
};

use crate::error::PollError;

/// Growth of the sleep between ticks.
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    /// Multiplier applied after every unsuccessful tick
    pub factor: f64,
    /// Cap for the grown interval
    pub max_interval: Duration,
    /// Stretch each sleep by a random 1.0x-1.5x
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            factor: DEFAULT_BACKOFF_FACTOR,
            max_interval: DEFAULT_MAX_INTERVAL,
            jitter: false,
        }
    }
}

/// How a condition is polled: tick interval, overall deadline and whether
/// the first evaluation happens before the first sleep.
#[derive(Clone, Debug, PartialEq)]
pub struct PollSpec {
    pub interval: Duration,
    /// Zero means a single attempt.
    pub timeout: Duration,
    pub immediate: bool,
    pub backoff: Option<Backoff>,
}

impl Default for PollSpec {
    fn default() -> Self {
        Self {
            interval: FIVE_SECOND_TIMEOUT,
            timeout: ONE_MINUTE_TIMEOUT,
            immediate: false,
            backoff: None,
        }
    }
}

impl PollSpec {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            ..Default::default()
        }
    }

    /// Five-second ticks, first check after one interval. Used by update
    /// and deletion waits.
    pub fn five_second_ticks(timeout: Duration) -> Self {
        Self::new(FIVE_SECOND_TIMEOUT, timeout)
    }

    /// Ten-second immediate ticks for ten minutes. Used by the cluster pod check.
    pub fn cluster_pods() -> Self {
        Self::new(TEN_SECOND_INTERVAL, TEN_MINUTE_TIMEOUT).immediate(true)
    }

    /// Read-modify-write retries on version conflicts.
    pub fn conflict_retry() -> Self {
        Self::five_second_ticks(ONE_MINUTE_TIMEOUT)
    }

    /// Waiting for a deleted object to disappear. Checks at once so an
    /// object that is already gone costs no sleep.
    pub fn deletion() -> Self {
        Self::five_second_ticks(ONE_MINUTE_TIMEOUT).immediate(true)
    }

    /// Chart installs waiting for their deployments to roll out.
    pub fn chart_rollout() -> Self {
        Self::five_second_ticks(FIVE_MINUTE_TIMEOUT).immediate(true)
    }

    /// Cluster provisioning and machine pool scaling.
    pub fn provisioning() -> Self {
        Self::new(TEN_SECOND_INTERVAL, FIFTEEN_MINUTE_TIMEOUT)
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn validate(&self) -> Result<(), PollError> {
        if self.interval.is_zero() {
            return Err(PollError::InvalidSpec("interval must be > 0".to_string()));
        }
        if let Some(b) = &self.backoff {
            if !b.factor.is_finite() || b.factor < 1.0 {
                return Err(PollError::InvalidSpec(format!(
                    "backoff factor must be >= 1.0 (got {})",
                    b.factor
                )));
            }
            if b.max_interval < self.interval {
                return Err(PollError::InvalidSpec(format!(
                    "backoff max interval {:?} is below the base interval {:?}",
                    b.max_interval, self.interval
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let spec = PollSpec::cluster_pods();
        assert_eq!(spec.interval, Duration::from_secs(10));
        assert_eq!(spec.timeout, Duration::from_secs(600));
        assert!(spec.immediate);

        let spec = PollSpec::conflict_retry();
        assert_eq!(spec.interval, Duration::from_secs(5));
        assert_eq!(spec.timeout, Duration::from_secs(60));
        assert!(!spec.immediate);
        assert!(spec.backoff.is_none());

        let spec = PollSpec::deletion();
        assert_eq!(spec.interval, Duration::from_secs(5));
        assert_eq!(spec.timeout, Duration::from_secs(60));
        assert!(spec.immediate);

        assert_eq!(PollSpec::chart_rollout().timeout, Duration::from_secs(300));
        assert_eq!(PollSpec::provisioning().timeout, Duration::from_secs(900));
    }

    #[test]
    fn rejects_zero_interval_and_shrinking_backoff() {
        assert!(PollSpec::new(Duration::ZERO, ONE_MINUTE_TIMEOUT).validate().is_err());
        let spec = PollSpec::new(Duration::from_secs(1), ONE_MINUTE_TIMEOUT).with_backoff(Backoff {
            factor: 0.5,
            ..Default::default()
        });
        assert!(spec.validate().is_err());
        let spec = PollSpec::new(Duration::from_secs(10), ONE_MINUTE_TIMEOUT).with_backoff(Backoff {
            max_interval: Duration::from_secs(1),
            ..Default::default()
        });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn zero_timeout_is_valid() {
        assert!(PollSpec::new(Duration::from_millis(1), Duration::ZERO).validate().is_ok());
    }
}
