//! # Global runtime configuration.
//!
//! Provides [`Config`], the centralized settings for a [`Runtime`](crate::Runtime).
//!
//! ## Sentinel values
//! - `worker_threads = 0` → one worker per available CPU
//! - `watchdog_threshold = 0s` → watchdog disabled

use std::num::NonZeroUsize;
use std::time::Duration;

/// Global configuration for the runtime.
///
/// ## Field semantics
/// - `worker_threads`: number of pinned event loops (`0` = CPU count)
/// - `scan_interval`: idle tick of every task loop (epilog cleanup, scan time)
/// - `bus_capacity`: lifecycle event ring buffer size (min 1)
/// - `watchdog_threshold`: default max stall for [`Runtime::watchdog_check`](crate::Runtime::watchdog_check)
/// - `thread_name_prefix`: prefix of every thread the runtime starts
///
/// ## Notes
/// All fields are public. Prefer the helper accessors to avoid sprinkling
/// sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of worker threads (event loops) tasks are pinned to.
    ///
    /// - `0` = number of available CPUs
    /// - `n > 0` = exactly `n` workers
    pub worker_threads: usize,

    /// How long a task loop sleeps when it has no work.
    ///
    /// Every tick refreshes the task's scan time and drops settled epilogs.
    pub scan_interval: Duration,

    /// Capacity of the lifecycle event broadcast channel.
    pub bus_capacity: usize,

    /// Default stall threshold used by the watchdog.
    ///
    /// - `Duration::ZERO` = disabled
    pub watchdog_threshold: Duration,

    /// Prefix for thread names (`<prefix>-worker-<i>`, `<prefix>-service`).
    pub thread_name_prefix: String,
}

impl Config {
    /// Returns the effective number of worker threads.
    #[inline]
    pub fn worker_threads_resolved(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        } else {
            self.worker_threads
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the scan interval clamped to a minimum of 1ms.
    #[inline]
    pub fn scan_interval_clamped(&self) -> Duration {
        self.scan_interval.max(Duration::from_millis(1))
    }

    /// Returns the watchdog threshold as an `Option`.
    ///
    /// - `None` → watchdog disabled
    #[inline]
    pub fn watchdog(&self) -> Option<Duration> {
        if self.watchdog_threshold == Duration::ZERO {
            None
        } else {
            Some(self.watchdog_threshold)
        }
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `worker_threads = 0` (one per CPU)
    /// - `scan_interval = 500ms`
    /// - `bus_capacity = 1024`
    /// - `watchdog_threshold = 20s`
    /// - `thread_name_prefix = "tasklane"`
    fn default() -> Self {
        Self {
            worker_threads: 0,
            scan_interval: Duration::from_millis(500),
            bus_capacity: 1024,
            watchdog_threshold: Duration::from_secs(20),
            thread_name_prefix: "tasklane".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.scan_interval, Duration::from_millis(500));
        assert_eq!(cfg.watchdog(), Some(Duration::from_secs(20)));
        assert!(cfg.worker_threads_resolved() >= 1);
        assert_eq!(cfg.thread_name_prefix, "tasklane");
    }

    #[test]
    fn test_sentinels_and_clamps() {
        let cfg = Config {
            worker_threads: 3,
            scan_interval: Duration::ZERO,
            bus_capacity: 0,
            watchdog_threshold: Duration::ZERO,
            ..Config::default()
        };
        assert_eq!(cfg.worker_threads_resolved(), 3);
        assert_eq!(cfg.bus_capacity_clamped(), 1);
        assert_eq!(cfg.scan_interval_clamped(), Duration::from_millis(1));
        assert_eq!(cfg.watchdog(), None);
    }
}
