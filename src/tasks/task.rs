//! # Task trait
//!
//! A task is plain state plus lifecycle hooks. The runtime owns the value,
//! pins it to one worker thread and hands out [`TaskRef`](crate::TaskRef)
//! handles; every hook and every scheduled closure receives `&mut self` on
//! that thread, one at a time.
//!
//! ## Lifecycle
//! ```text
//! Runtime::spawn ──► on_start ──► (jobs, timers, terminal events)*
//!                                        │
//!                          stop_task() ──┤
//!                                        ▼
//!                  on_stop_requested ──► terminal on_stop_requested
//!                                        │
//!                          epilogs settle┤
//!                                        ▼
//!                   remaining terminals terminated ──► removed from registry
//! ```

use super::Context;

/// A named, thread-affine actor.
///
/// # Example
/// ```no_run
/// use tasklane::{Context, Task};
///
/// struct Counter {
///     hits: u64,
/// }
///
/// impl Task for Counter {
///     fn on_start(&mut self, cx: &mut Context<Self>) {
///         tracing::info!(task = cx.name(), "counter up");
///     }
/// }
/// ```
pub trait Task: Send + Sized + 'static {
    /// Runs once on the task thread before any other work.
    fn on_start(&mut self, cx: &mut Context<Self>) {
        let _ = cx;
    }

    /// Runs once on the task thread when stop is first requested, before the
    /// attached terminals are notified.
    fn on_stop_requested(&mut self, cx: &mut Context<Self>) {
        let _ = cx;
    }
}
