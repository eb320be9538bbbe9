//! # Lifecycle events emitted by the runtime, task loops and terminals.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Task events**: start, stop request, stop, removal from the registry
//! - **Terminal events**: state changes and termination
//! - **Health events**: contained callback panics, watchdog stalls, shutdown
//! - **Subscriber events**: overflow and panics of event subscribers
//!
//! The [`Event`] struct carries metadata such as timestamps, task name,
//! terminal, state and reasons.
//!
//! ## Ordering
//! `seq` is drawn from one process-wide counter. Subscribers see events in
//! queue order per subscriber only; sort by `seq` to recover publish order.
//!
//! ## Example
//! ```rust
//! use tasklane::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TerminalStateChanged)
//!     .with_task("door")
//!     .with_terminal("Terminal(id=3)")
//!     .with_state("Open");
//!
//! assert_eq!(ev.kind, EventKind::TerminalStateChanged);
//! assert_eq!(ev.task.as_deref(), Some("door"));
//! assert_eq!(ev.state.as_deref(), Some("Open"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// Source of [`Event::seq`].
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // --- subscribers ---
    /// A subscriber's `on_event` panicked; the subscriber keeps running.
    ///
    /// Sets `task` (subscriber name) and `reason` (panic message).
    SubscriberPanicked,

    /// An event could not be queued for a subscriber and was dropped.
    ///
    /// Sets `task` (subscriber name) and `reason` (`full` or `closed`).
    SubscriberOverflow,

    // --- runtime ---
    /// Stop requested for the whole runtime (API call or OS signal).
    ShutdownRequested,

    /// Every task ended within the join timeout.
    AllStoppedWithin,

    /// Join timeout exceeded; some tasks were still running.
    ///
    /// Sets:
    /// - `reason`: names of the remaining tasks
    /// - `timeout_ms`: the join timeout
    JoinTimedOut,

    // --- tasks ---
    /// Task loop started; `on_start` is about to run.
    ///
    /// Sets:
    /// - `task`: task name
    /// - `worker`: index of the pinned event loop
    TaskStarting,

    /// Stop was requested; the task's stop hooks are about to run.
    ///
    /// Sets:
    /// - `task`: task name
    TaskStopRequested,

    /// Task loop exited (stop requested and all epilogs settled).
    ///
    /// Sets:
    /// - `task`: task name
    TaskStopped,

    /// Task was removed from the registry; its name may be reused.
    ///
    /// Sets:
    /// - `task`: task name
    TaskRemoved,

    /// A scheduled job, hook or timer callback panicked on a task thread.
    ///
    /// Sets:
    /// - `task`: task name
    /// - `reason`: panic message
    CallbackPanicked,

    /// Watchdog found a task whose loop has not scanned within the threshold.
    ///
    /// Sets:
    /// - `task`: task name
    /// - `timeout_ms`: the threshold that was exceeded
    /// - `delay_ms`: time since the last scan
    WatchdogStall,

    // --- terminals ---
    /// A terminal entered a new state.
    ///
    /// Sets:
    /// - `task`: owning task
    /// - `terminal`: terminal display form
    /// - `state`: name of the new state
    TerminalStateChanged,

    /// A terminal reached its final, terminated phase.
    ///
    /// Sets:
    /// - `task`: owning task
    /// - `terminal`: terminal display form
    TerminalTerminated,
}

/// One lifecycle record published on the [`Bus`](crate::Bus).
///
/// Which optional fields are filled depends on [`EventKind`]; see each variant.
#[derive(Clone, Debug)]
pub struct Event {
    /// Process-wide publish order.
    pub seq: u64,
    /// Wall-clock creation time.
    pub at: SystemTime,
    pub kind: EventKind,

    /// Task (or subscriber) name.
    pub task: Option<Arc<str>>,
    /// Terminal display form, for terminal events.
    pub terminal: Option<Arc<str>>,
    /// State name, for terminal events.
    pub state: Option<Arc<str>>,
    /// Human-readable reason (panic messages, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Index of the worker thread the task is pinned to.
    pub worker: Option<usize>,
    /// Timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Delay/stall in milliseconds (compact).
    pub delay_ms: Option<u32>,
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

impl Event {
    /// Stamps a new event with the next `seq` and the current time.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            terminal: None,
            state: None,
            reason: None,
            worker: None,
            timeout_ms: None,
            delay_ms: None,
        }
    }

    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a terminal display form.
    #[inline]
    pub fn with_terminal(mut self, terminal: impl Into<Arc<str>>) -> Self {
        self.terminal = Some(terminal.into());
        self
    }

    /// Attaches a state name.
    #[inline]
    pub fn with_state(mut self, state: impl Into<Arc<str>>) -> Self {
        self.state = Some(state.into());
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_worker(mut self, index: usize) -> Self {
        self.worker = Some(index);
        self
    }

    /// Attaches a timeout (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// `subscriber` could not take an event (`full` / `closed`).
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
