//! # Shared timer.
//!
//! One [`Timer`] per runtime, hosted on the service loop. Each
//! [`Timer::new_timeout`] parks a small future there that either fires the
//! callback at the deadline or exits when the [`Timeout`] is cancelled.
//!
//! ## Rules
//! - A timeout settles exactly once: **fired** or **cancelled**, whichever wins
//!   the state transition.
//! - Callbacks run on the service thread; they must be short and usually just
//!   hop onto the owning task (`TaskRef::new_timeout` does that).
//! - Callback panics are caught and logged.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

struct TimeoutInner {
    state: AtomicU8,
    cancel: CancellationToken,
    deadline: Instant,
}

/// Handle to a scheduled one-shot callback.
#[derive(Clone)]
pub struct Timeout {
    inner: Arc<TimeoutInner>,
}

impl Timeout {
    /// Prevents the callback from running.
    ///
    /// Returns `true` if this call cancelled it; `false` if it had already
    /// fired or been cancelled.
    pub fn cancel(&self) -> bool {
        let won = self
            .inner
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.inner.cancel.cancel();
        }
        won
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == CANCELLED
    }

    /// True once the callback has been triggered.
    pub fn is_expired(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == FIRED
    }

    pub fn deadline(&self) -> Instant {
        self.inner.deadline
    }

    fn fire(&self) -> bool {
        self.inner
            .state
            .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.state.load(Ordering::Acquire) {
            FIRED => "fired",
            CANCELLED => "cancelled",
            _ => "pending",
        };
        f.debug_struct("Timeout")
            .field("state", &state)
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

/// Shared one-shot timer; cheap to clone.
#[derive(Clone)]
pub struct Timer {
    handle: Handle,
}

impl Timer {
    pub(crate) fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Runs `f` once after `delay`, unless cancelled first.
    pub fn new_timeout<F>(&self, delay: Duration, f: F) -> Timeout
    where
        F: FnOnce(&Timeout) + Send + 'static,
    {
        let deadline = Instant::now()
            .checked_add(delay)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400 * 365 * 30));
        self.new_timeout_at(deadline, f)
    }

    /// Runs `f` once at `deadline`, unless cancelled first.
    pub fn new_timeout_at<F>(&self, deadline: Instant, f: F) -> Timeout
    where
        F: FnOnce(&Timeout) + Send + 'static,
    {
        let timeout = Timeout {
            inner: Arc::new(TimeoutInner {
                state: AtomicU8::new(PENDING),
                cancel: CancellationToken::new(),
                deadline,
            }),
        };

        let armed = timeout.clone();
        drop(self.handle.spawn(async move {
            let cancelled = armed.inner.cancel.clone();
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                    if armed.fire()
                        && catch_unwind(AssertUnwindSafe(|| f(&armed))).is_err()
                    {
                        tracing::error!("timer callback panicked");
                    }
                }
            }
        }));
        timeout
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer").finish_non_exhaustive()
    }
}
