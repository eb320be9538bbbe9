//! # LogWriter: lifecycle events through `tracing`
//!
//! A minimal subscriber that renders incoming [`Event`]s as `tracing` records
//! in key=value form. Install a `tracing` subscriber to see them.
//!
//! ## Example output
//! ```text
//! [starting] task="door" worker=1
//! [state] task="door" terminal="Terminal(id=3)" state="Open"
//! [terminated] task="door" terminal="Terminal(id=3)"
//! [stop-requested] task="door"
//! [stopped] task="door"
//! [watchdog-stall] task="poller" stalled_ms=21034
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let task = e.task.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::ShutdownRequested => tracing::info!("[shutdown-requested]"),
            EventKind::AllStoppedWithin => tracing::info!("[all-stopped-within]"),
            EventKind::JoinTimedOut => tracing::warn!(
                "[join-timed-out] timeout_ms={:?} remaining={:?}",
                e.timeout_ms,
                e.reason
            ),
            EventKind::TaskStarting => {
                tracing::info!("[starting] task={task:?} worker={:?}", e.worker)
            }
            EventKind::TaskStopRequested => tracing::info!("[stop-requested] task={task:?}"),
            EventKind::TaskStopped => tracing::info!("[stopped] task={task:?}"),
            EventKind::TaskRemoved => tracing::debug!("[removed] task={task:?}"),
            EventKind::CallbackPanicked => tracing::error!(
                "[callback-panicked] task={task:?} info={}",
                e.reason.as_deref().unwrap_or("unknown")
            ),
            EventKind::WatchdogStall => tracing::warn!(
                "[watchdog-stall] task={task:?} stalled_ms={:?}",
                e.delay_ms
            ),
            EventKind::TerminalStateChanged => tracing::debug!(
                "[state] task={task:?} terminal={:?} state={:?}",
                e.terminal,
                e.state
            ),
            EventKind::TerminalTerminated => tracing::debug!(
                "[terminated] task={task:?} terminal={:?}",
                e.terminal
            ),
            EventKind::SubscriberOverflow => tracing::warn!(
                "[subscriber-overflow] subscriber={task} reason={:?}",
                e.reason
            ),
            EventKind::SubscriberPanicked => tracing::error!(
                "[subscriber-panicked] subscriber={task} info={}",
                e.reason.as_deref().unwrap_or("unknown")
            ),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
