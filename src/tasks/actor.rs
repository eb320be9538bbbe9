//! # Task loop: the per-task future pinned to one worker.
//!
//! ## Lifecycle
//! ```text
//! publish TaskStarting ─► on_start
//! loop {
//!   ├─► stop requested (first time)?
//!   │       └─ publish TaskStopRequested ─► on_stop_requested ─► terminals' on_stop_requested
//!   ├─► prune settled epilogs; refresh last scan time
//!   ├─► stop requested && no epilogs ─► exit
//!   ├─► select { job | wakeup | scan_interval tick }
//!   └─► drain queued jobs (each job's panic is contained)
//! }
//! mark ended ─► terminate remaining terminals ─► publish TaskStopped
//!            ─► drop queue (queued jobs resolve Dropped) ─► on_exit (registry removal)
//! ```
//!
//! ## Rules
//! - Everything above runs on the same worker thread.
//! - No panic escapes the loop: hooks and jobs are wrapped in `catch_unwind`.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::events::{Event, EventKind};
use crate::exec::Job;

use super::task_ref::TaskCore;
use super::{Context, Task};

/// A task together with its on-thread context; what queued jobs receive.
pub struct TaskScope<T: Task> {
    pub(crate) task: T,
    pub(crate) cx: Context<T>,
}

impl<T: Task> TaskScope<T> {
    pub(crate) fn new(task: T, cx: Context<T>) -> Self {
        Self { task, cx }
    }

    /// Borrows the task and its context at the same time.
    pub fn split(&mut self) -> (&mut T, &mut Context<T>) {
        (&mut self.task, &mut self.cx)
    }
}

/// Inputs of one task loop.
pub(crate) struct TaskActorParams<T: Task> {
    pub core: Arc<TaskCore>,
    pub scope: TaskScope<T>,
    pub jobs: mpsc::UnboundedReceiver<Job<TaskScope<T>>>,
    pub scan_interval: Duration,
}

/// Runs one task until it has stopped and drained.
pub(crate) struct TaskActor<T: Task> {
    core: Arc<TaskCore>,
    scope: TaskScope<T>,
    jobs: mpsc::UnboundedReceiver<Job<TaskScope<T>>>,
    scan_interval: Duration,
    stop_fired: bool,
}

impl<T: Task> TaskActor<T> {
    pub(crate) fn new(params: TaskActorParams<T>) -> Self {
        Self {
            core: params.core,
            scope: params.scope,
            jobs: params.jobs,
            scan_interval: params.scan_interval,
            stop_fired: false,
        }
    }

    /// Drives the task; `on_exit` runs last, after the task is fully stopped.
    pub(crate) async fn run(mut self, on_exit: impl FnOnce(&str) + Send + 'static) {
        tracing::info!(task = %self.core.name, worker = self.core.worker, "task starting");
        self.core
            .publish(Event::new(EventKind::TaskStarting).with_worker(self.core.worker));
        self.core.touch();
        self.hook("on_start", |task, cx| task.on_start(cx));

        loop {
            if self.core.is_stop_requested() && !self.stop_fired {
                self.begin_stop();
            }
            let pending = self.scope.cx.prune_epilogs();
            self.core.touch();
            if self.stop_fired && pending == 0 {
                break;
            }

            tokio::select! {
                biased;
                job = self.jobs.recv() => match job {
                    Some(job) => self.run_job(job),
                    None => break,
                },
                _ = self.core.wake.notified() => {}
                _ = tokio::time::sleep(self.scan_interval) => {}
            }

            while let Ok(job) = self.jobs.try_recv() {
                self.run_job(job);
            }
        }

        self.core.mark_ended();
        tracing::info!(task = %self.core.name, "end of task");
        let TaskScope { task, cx } = &mut self.scope;
        cx.terminate_terminals(task);
        self.core.publish(Event::new(EventKind::TaskStopped));

        self.jobs.close();
        let dropped = std::iter::from_fn(|| self.jobs.try_recv().ok()).count();
        if dropped > 0 {
            tracing::debug!(task = %self.core.name, dropped, "queued jobs dropped at end of task");
        }
        on_exit(&self.core.name);
    }

    fn begin_stop(&mut self) {
        self.stop_fired = true;
        tracing::info!(task = %self.core.name, "stop sequence");
        self.core.publish(Event::new(EventKind::TaskStopRequested));
        self.hook("on_stop_requested", |task, cx| task.on_stop_requested(cx));
        let TaskScope { task, cx } = &mut self.scope;
        cx.notify_terminals_stop(task);
    }

    fn run_job(&mut self, job: Job<TaskScope<T>>) {
        let scope = &mut self.scope;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| job(scope))) {
            self.core.report_panic("job", payload);
        }
    }

    fn hook(&mut self, what: &str, f: impl FnOnce(&mut T, &mut Context<T>)) {
        let TaskScope { task, cx } = &mut self.scope;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(task, cx))) {
            self.core.report_panic(what, payload);
        }
    }
}
