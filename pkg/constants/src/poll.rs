//! Poll interval and timeout presets.

use std::time::Duration;

/// Interval used by most update / deletion waits.
pub const FIVE_SECOND_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval used when listing every pod of a cluster.
pub const TEN_SECOND_INTERVAL: Duration = Duration::from_secs(10);

pub const ONE_MINUTE_TIMEOUT: Duration = Duration::from_secs(60);

pub const FIVE_MINUTE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default wait for pods, daemonsets and machine replacement.
pub const TEN_MINUTE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub const FIFTEEN_MINUTE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Multiplier applied to the interval between ticks when backoff is enabled.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Upper bound for a backed-off interval.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);
