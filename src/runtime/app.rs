//! # Runtime: worker loops, shared timer, registry and the event fan-out.
//!
//! ## Architecture
//! ```text
//!                 ┌──────────── <prefix>-service thread ────────────┐
//!                 │  Timer  ·  Bus listener ─► SubscriberSet workers │
//!                 │  watchdog tick (if enabled)                     │
//!                 └─────────────────────────────────────────────────┘
//! spawn(name, task) ─► TaskRegistry.add ─► EventLoopGroup.next() ─► task loop
//!                                                            (<prefix>-worker-i)
//! stop()            ─► publish ShutdownRequested ─► stop_task() on every task
//! join(timeout)     ─► wait on registry drain block
//!                        ├─ drained  ─► AllStoppedWithin
//!                        └─ timeout  ─► JoinTimedOut + RuntimeError::JoinTimeout
//! ```
//!
//! ## Rules
//! - Blocking calls (`join`, `shutdown`, `block_until_shutdown_signal`) must
//!   not be made from a task thread: that task could never finish.
//! - Tasks spawned after `stop()` are asked to stop right away.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::tasks::{Context, Task, TaskActor, TaskActorParams, TaskCore, TaskRef, TaskScope};

use super::event_loop::{EventLoopGroup, LoopThread};
use super::registry::TaskRegistry;
use super::{Config, RuntimeBuilder, Timer, shutdown};

/// Owner of every thread and task of an application.
pub struct Runtime {
    cfg: Config,
    service: LoopThread,
    loops: EventLoopGroup,
    timer: Timer,
    bus: Bus,
    registry: Arc<TaskRegistry>,
    stop_pending: AtomicBool,
}

impl Runtime {
    pub fn builder(cfg: Config) -> RuntimeBuilder {
        RuntimeBuilder::new(cfg)
    }

    pub(crate) fn start(
        cfg: Config,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Result<Self, RuntimeError> {
        let prefix = cfg.thread_name_prefix.clone();
        let service = LoopThread::start(format!("{prefix}-service"))?;
        let loops = EventLoopGroup::new(cfg.worker_threads_resolved(), &prefix)?;
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let timer = Timer::new(service.handle().clone());
        let registry = Arc::new(TaskRegistry::new());

        let subs = SubscriberSet::new(subscribers, bus.clone(), service.handle());
        if !subs.is_empty() {
            Self::subscriber_listener(&service, bus.subscribe(), subs);
        }
        if let Some(threshold) = cfg.watchdog() {
            Self::watchdog_loop(&service, Arc::clone(&registry), bus.clone(), threshold);
        }

        tracing::info!(workers = loops.len(), prefix = %prefix, "runtime started");
        Ok(Self {
            cfg,
            service,
            loops,
            timer,
            bus,
            registry,
            stop_pending: AtomicBool::new(false),
        })
    }

    /// Forwards bus events to the subscriber set (fire-and-forget).
    fn subscriber_listener(
        service: &LoopThread,
        mut rx: broadcast::Receiver<Event>,
        subs: SubscriberSet,
    ) {
        drop(service.handle().spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => subs.emit(&ev),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    fn watchdog_loop(service: &LoopThread, registry: Arc<TaskRegistry>, bus: Bus, threshold: Duration) {
        let period = (threshold / 2).max(Duration::from_millis(10));
        drop(service.handle().spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                report_stalls(&registry, &bus, threshold);
            }
        }));
    }

    /// Registers `task` under `name`, pins it to a worker and starts it.
    ///
    /// Fails with [`RuntimeError::DuplicateTask`] if a live task already has
    /// that name.
    pub fn spawn<T: Task>(&self, name: impl Into<Arc<str>>, task: T) -> Result<TaskRef<T>, RuntimeError> {
        let name: Arc<str> = name.into();
        let event_loop = self.loops.next();
        let core = Arc::new(TaskCore::new(
            name,
            event_loop.index(),
            self.timer.clone(),
            self.bus.clone(),
        ));
        self.registry.add(Arc::clone(&core))?;

        let (tx, jobs) = mpsc::unbounded_channel();
        let me = TaskRef::new(Arc::clone(&core), tx);
        let scope = TaskScope::new(task, Context::new(me.clone()));
        let actor = TaskActor::new(TaskActorParams {
            core,
            scope,
            jobs,
            scan_interval: self.cfg.scan_interval_clamped(),
        });

        let registry = Arc::clone(&self.registry);
        let bus = self.bus.clone();
        event_loop.spawn(actor.run(move |name| {
            registry.remove(name);
            tracing::debug!(task = %name, "task removed");
            bus.publish(Event::new(EventKind::TaskRemoved).with_task(name));
        }));

        if self.is_stop_pending() {
            me.stop_task();
        }
        Ok(me)
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Timer shared by every task of this runtime.
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Lifecycle event bus; subscribe to observe tasks and terminals.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.loops.len()
    }

    /// Sorted names of live tasks.
    pub fn task_names(&self) -> Vec<String> {
        self.registry.list()
    }

    /// Requests a graceful stop of every live task (non-blocking, idempotent).
    pub fn stop(&self) {
        if !self.stop_pending.swap(true, Ordering::AcqRel) {
            tracing::info!("runtime stop requested");
            self.bus.publish(Event::new(EventKind::ShutdownRequested));
        }
        self.registry.stop_all();
    }

    pub fn is_stop_pending(&self) -> bool {
        self.stop_pending.load(Ordering::Acquire)
    }

    /// Blocks until every task has ended or `timeout` elapses.
    ///
    /// On timeout returns [`RuntimeError::JoinTimeout`] with the tasks still running.
    pub fn join(&self, timeout: Duration) -> Result<(), RuntimeError> {
        if self.registry.wait_drained(timeout) {
            self.bus.publish(Event::new(EventKind::AllStoppedWithin));
            return Ok(());
        }
        let remaining = self.registry.list();
        tracing::warn!(?timeout, ?remaining, "join timed out");
        self.bus
            .publish(Event::new(EventKind::JoinTimedOut).with_timeout(timeout));
        Err(RuntimeError::JoinTimeout { timeout, remaining })
    }

    /// Tasks whose loop has not scanned for longer than `max_stall`.
    ///
    /// Each of them is logged and published as [`EventKind::WatchdogStall`].
    pub fn stalled_tasks(&self, max_stall: Duration) -> Vec<String> {
        report_stalls(&self.registry, &self.bus, max_stall)
    }

    /// True if no task is stalled for longer than `max_stall`.
    pub fn watchdog_check(&self, max_stall: Duration) -> bool {
        self.stalled_tasks(max_stall).is_empty()
    }

    /// Stops every task, waits up to `grace` for them, then stops the threads.
    pub fn shutdown(self, grace: Duration) -> Result<(), RuntimeError> {
        self.stop();
        let joined = self.join(grace);
        self.loops.shutdown();
        self.service.stop();
        self.service.join();
        joined
    }

    /// Blocks until SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere), then shuts down
    /// with `grace`.
    pub fn block_until_shutdown_signal(self, grace: Duration) -> Result<(), RuntimeError> {
        let (tx, rx) = std::sync::mpsc::channel();
        drop(self.service.handle().spawn(async move {
            let _ = tx.send(shutdown::wait_for_shutdown_signal().await);
        }));
        match rx.recv() {
            Ok(Ok(())) => tracing::info!("shutdown signal received"),
            Ok(Err(e)) => {
                let _ = self.shutdown(grace);
                return Err(e);
            }
            Err(_) => tracing::warn!("shutdown signal listener went away"),
        }
        self.shutdown(grace)
    }
}

fn report_stalls(registry: &TaskRegistry, bus: &Bus, max_stall: Duration) -> Vec<String> {
    let stalled = registry.stalled(max_stall);
    let mut names = Vec::with_capacity(stalled.len());
    for (name, idle) in stalled {
        tracing::warn!(task = %name, ?idle, ?max_stall, "task loop stalled");
        bus.publish(
            Event::new(EventKind::WatchdogStall)
                .with_task(name.as_str())
                .with_timeout(max_stall)
                .with_delay(idle),
        );
        names.push(name);
    }
    names
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.loops.shutdown();
        self.service.stop();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("workers", &self.loops.len())
            .field("tasks", &self.registry.list())
            .field("stop_pending", &self.is_stop_pending())
            .finish()
    }
}
