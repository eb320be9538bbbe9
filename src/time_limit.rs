//! # Absolute deadlines.
//!
//! A [`TimeLimit`] is an optional wall-clock-independent instant after which
//! deferred work must not start. It is `Copy` and freely shared between threads.
//!
//! ```
//! use std::time::Duration;
//! use tasklane::TimeLimit;
//!
//! let limit = TimeLimit::within(Duration::from_secs(5));
//! assert!(!limit.is_expired());
//! assert!(limit.remaining().unwrap() <= Duration::from_secs(5));
//!
//! assert!(TimeLimit::no_limit().remaining().is_some());
//! ```

use std::fmt;
use std::time::{Duration, Instant};

/// Optional absolute deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimeLimit {
    not_after: Option<Instant>,
}

impl TimeLimit {
    /// A limit that never expires.
    #[inline]
    pub const fn no_limit() -> Self {
        Self { not_after: None }
    }

    /// A limit at the given instant.
    #[inline]
    pub const fn before(deadline: Instant) -> Self {
        Self {
            not_after: Some(deadline),
        }
    }

    /// A limit `timeout` from now.
    ///
    /// Durations too large to represent are treated as no limit.
    pub fn within(timeout: Duration) -> Self {
        Self {
            not_after: Instant::now().checked_add(timeout),
        }
    }

    /// The deadline instant, `None` for [`TimeLimit::no_limit`].
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.not_after
    }

    #[inline]
    pub fn is_no_limit(&self) -> bool {
        self.not_after.is_none()
    }

    /// True once the deadline has been reached.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// True if the deadline is at or before `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.not_after {
            Some(deadline) => deadline <= now,
            None => false,
        }
    }

    /// Time left before the deadline.
    ///
    /// - `Some(Duration::MAX)` for no limit.
    /// - `None` once the deadline has been reached.
    pub fn remaining(&self) -> Option<Duration> {
        match self.not_after {
            None => Some(Duration::MAX),
            Some(deadline) => {
                let now = Instant::now();
                (deadline > now).then(|| deadline - now)
            }
        }
    }

    /// The earlier of two limits.
    pub fn min(self, other: TimeLimit) -> TimeLimit {
        match (self.not_after, other.not_after) {
            (Some(a), Some(b)) => TimeLimit::before(a.min(b)),
            (Some(_), None) => self,
            (None, _) => other,
        }
    }
}

impl Default for TimeLimit {
    fn default() -> Self {
        Self::no_limit()
    }
}

impl From<Duration> for TimeLimit {
    fn from(timeout: Duration) -> Self {
        Self::within(timeout)
    }
}

impl fmt::Display for TimeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.remaining() {
            _ if self.is_no_limit() => f.write_str("no-limit"),
            Some(left) => write!(f, "in {left:?}"),
            None => f.write_str("expired"),
        }
    }
}
