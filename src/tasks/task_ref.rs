//! # TaskRef: the cross-thread handle of a task.
//!
//! Every method is callable from any thread. Scheduling methods queue a job
//! on the task's serial queue; the job runs later on the task's pinned worker
//! with `&mut T` and `&mut Context<T>`.
//!
//! ## Rules
//! - Jobs of one task never overlap and run in the order they become runnable.
//! - A task is active until stop is requested, and afterwards only while
//!   epilogs are pending. Submissions to an inactive task fail with
//!   `TaskInactive`; work queued before that still runs.
//! - Jobs still queued when the loop ends resolve with `Dropped`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Notify, mpsc};

use crate::error::AsyncError;
use crate::events::{Bus, Event, EventKind};
use crate::exec::{self, Completion, Executor, Job};
use crate::runtime::{Timeout, Timer};
use crate::time_limit::TimeLimit;

use super::{Context, Task, TaskScope};

/// Type-independent part of a task, shared by its handles, its loop and the registry.
pub(crate) struct TaskCore {
    pub(crate) name: Arc<str>,
    pub(crate) worker: usize,
    stop_requested: AtomicBool,
    ended: AtomicBool,
    epilogs: AtomicUsize,
    pub(crate) wake: Notify,
    last_scan_ms: AtomicU64,
    pub(crate) timer: Timer,
    pub(crate) bus: Bus,
}

fn epoch_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}

impl TaskCore {
    pub(crate) fn new(name: Arc<str>, worker: usize, timer: Timer, bus: Bus) -> Self {
        Self {
            name,
            worker,
            stop_requested: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            epilogs: AtomicUsize::new(0),
            wake: Notify::new(),
            last_scan_ms: AtomicU64::new(epoch_ms(SystemTime::now())),
            timer,
            bus,
        }
    }

    /// Sets the stop flag; returns `true` for the first request.
    pub(crate) fn request_stop(&self) -> bool {
        let first = !self.stop_requested.swap(true, Ordering::AcqRel);
        if first {
            self.wake.notify_one();
        }
        first
    }

    #[inline]
    pub(crate) fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Published by the task thread whenever its epilog list changes.
    pub(crate) fn set_pending_epilogs(&self, pending: usize) {
        self.epilogs.store(pending, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        !self.is_ended()
            && (!self.is_stop_requested() || self.epilogs.load(Ordering::Acquire) > 0)
    }

    pub(crate) fn mark_ended(&self) {
        self.ended.store(true, Ordering::Release);
    }

    pub(crate) fn touch(&self) {
        self.last_scan_ms
            .store(epoch_ms(SystemTime::now()), Ordering::Relaxed);
    }

    pub(crate) fn last_scan(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.last_scan_ms.load(Ordering::Relaxed))
    }

    pub(crate) fn inactive(&self) -> AsyncError {
        AsyncError::TaskInactive {
            task: self.name.to_string(),
        }
    }

    pub(crate) fn publish(&self, ev: Event) {
        self.bus.publish(ev.with_task(Arc::clone(&self.name)));
    }

    /// Logs and publishes a contained panic.
    pub(crate) fn report_panic(&self, what: &str, payload: Box<dyn std::any::Any + Send>) {
        let info = match AsyncError::from_panic(payload) {
            AsyncError::Panicked { message } => message,
            other => other.to_string(),
        };
        tracing::error!(task = %self.name, %info, "{what} panicked");
        self.publish(Event::new(EventKind::CallbackPanicked).with_reason(format!("{what}: {info}")));
    }
}

/// Cloneable handle to a running task.
pub struct TaskRef<T: Task> {
    pub(crate) core: Arc<TaskCore>,
    tx: mpsc::UnboundedSender<Job<TaskScope<T>>>,
}

impl<T: Task> Clone for TaskRef<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            tx: self.tx.clone(),
        }
    }
}

impl<T: Task> TaskRef<T> {
    pub(crate) fn new(core: Arc<TaskCore>, tx: mpsc::UnboundedSender<Job<TaskScope<T>>>) -> Self {
        Self { core, tx }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Index of the worker thread this task is pinned to.
    pub fn worker(&self) -> usize {
        self.core.worker
    }

    /// The runtime's shared timer.
    pub fn timer(&self) -> &Timer {
        &self.core.timer
    }

    /// False once stop was requested and no epilog is pending.
    pub fn is_active(&self) -> bool {
        self.core.is_active()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.core.is_stop_requested()
    }

    /// Requests a graceful stop. Idempotent; returns immediately.
    pub fn stop_task(&self) {
        if self.core.request_stop() {
            tracing::info!(task = %self.core.name, "stop requested");
        }
    }

    /// Forces an immediate scan cycle.
    pub fn wakeup(&self) -> Result<(), AsyncError> {
        if self.core.is_ended() {
            return Err(self.core.inactive());
        }
        self.core.wake.notify_one();
        Ok(())
    }

    /// Time of the loop's last scan cycle (for watchdogs).
    pub fn last_scan_time(&self) -> SystemTime {
        self.core.last_scan()
    }

    /// Queues `f` to run on the task thread (fire-and-forget).
    pub fn execute<F>(&self, f: F) -> Result<(), AsyncError>
    where
        F: FnOnce(&mut T, &mut Context<T>) + Send + 'static,
    {
        self.submit(Box::new(move |scope: &mut TaskScope<T>| {
            let (task, cx) = scope.split();
            f(task, cx)
        }))
    }

    pub(crate) fn submit_fallible<R, F>(&self, limit: TimeLimit, f: F) -> Completion<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut T, &mut Context<T>) -> Result<R, AsyncError> + Send + 'static,
    {
        exec::submit_guarded(self, &self.core.timer, limit, move |scope: &mut TaskScope<T>| {
            let (task, cx) = scope.split();
            f(task, cx)
        })
    }

    /// Runs `f` on the task thread if it can start before `limit`.
    pub fn call_before<R, F>(&self, limit: TimeLimit, f: F) -> Completion<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut T, &mut Context<T>) -> R + Send + 'static,
    {
        self.submit_fallible(limit, move |task, cx| Ok(f(task, cx)))
    }

    pub fn run_before<F>(&self, limit: TimeLimit, f: F) -> Completion<()>
    where
        F: FnOnce(&mut T, &mut Context<T>) + Send + 'static,
    {
        self.call_before(limit, f)
    }

    /// Runs context-free work on the task thread if it can start before `limit`.
    pub fn execute_before<F>(&self, limit: TimeLimit, f: F) -> Completion<()>
    where
        F: FnOnce() + Send + 'static,
    {
        exec::execute_before(self, &self.core.timer, limit, f)
    }

    pub fn call_later<R, F>(&self, f: F) -> Completion<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut T, &mut Context<T>) -> R + Send + 'static,
    {
        self.call_before(TimeLimit::no_limit(), f)
    }

    pub fn run_later<F>(&self, f: F) -> Completion<()>
    where
        F: FnOnce(&mut T, &mut Context<T>) + Send + 'static,
    {
        self.call_before(TimeLimit::no_limit(), f)
    }

    /// Runs `f` on the task thread after `delay`, unless the timeout is cancelled.
    pub fn new_timeout<F>(&self, delay: Duration, f: F) -> Timeout
    where
        F: FnOnce(&mut T, &mut Context<T>) + Send + 'static,
    {
        exec::new_timeout(self, &self.core.timer, delay, move |scope: &mut TaskScope<T>| {
            let (task, cx) = scope.split();
            f(task, cx)
        })
    }

    /// Runs `f` on the task thread with the result of `completion` once it resolves.
    pub fn listen<R, F>(&self, completion: Completion<R>, f: F)
    where
        R: Send + 'static,
        F: FnOnce(&mut T, &mut Context<T>, Result<R, AsyncError>) + Send + 'static,
    {
        let me = self.clone();
        completion.then(move |result| {
            if let Err(e) = me.execute(move |task, cx| f(task, cx, result)) {
                tracing::debug!(task = %me.core.name, error = %e, "listener dropped");
            }
        });
    }

    /// Keeps the task from ending until `completion` resolves.
    pub fn register_epilog<R>(&self, completion: &Completion<R>) -> Result<(), AsyncError>
    where
        R: Send + 'static,
    {
        let watch = completion.watch();
        self.execute(move |_, cx| cx.register_watch(watch))
    }
}

impl<T: Task> Executor for TaskRef<T> {
    type Target = TaskScope<T>;

    fn submit(&self, job: Job<TaskScope<T>>) -> Result<(), AsyncError> {
        if !self.core.is_active() {
            return Err(self.core.inactive());
        }
        self.tx.send(job).map_err(|_| self.core.inactive())
    }
}

impl<T: Task> fmt::Debug for TaskRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRef")
            .field("name", &self.core.name)
            .field("worker", &self.core.worker)
            .field("active", &self.is_active())
            .finish()
    }
}

impl<T: Task> fmt::Display for TaskRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.core.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread::ThreadId;
    use std::time::Instant;

    use parking_lot::Mutex;

    use crate::exec::promise;
    use crate::runtime::{Config, Runtime};

    fn runtime(workers: usize) -> Runtime {
        let cfg = Config {
            worker_threads: workers,
            scan_interval: Duration::from_millis(20),
            thread_name_prefix: "task-test".into(),
            ..Config::default()
        };
        Runtime::builder(cfg).build().unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<usize>,
        threads: Vec<ThreadId>,
    }

    impl Task for Recorder {}

    #[derive(Default)]
    struct Hooks {
        log: Arc<Mutex<Vec<&'static str>>>,
        fired: bool,
        total: i32,
    }

    impl Task for Hooks {
        fn on_start(&mut self, _cx: &mut Context<Self>) {
            self.log.lock().push("start");
        }

        fn on_stop_requested(&mut self, _cx: &mut Context<Self>) {
            self.log.lock().push("stop");
        }
    }

    fn eventually(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_jobs_run_in_order_on_one_thread() {
        let rt = runtime(3);
        let task = rt.spawn("recorder", Recorder::default()).unwrap();

        for i in 0..100 {
            task.execute(move |t, _| {
                t.seen.push(i);
                t.threads.push(std::thread::current().id());
            })
            .unwrap();
        }
        let (seen, threads) = task
            .call_later(|t, _| (t.seen.clone(), t.threads.clone()))
            .join()
            .unwrap();

        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        assert!(threads.windows(2).all(|w| w[0] == w[1]));
        assert_ne!(threads[0], std::thread::current().id());
    }

    #[test]
    fn test_hooks_and_stop_idempotent() {
        let rt = runtime(1);
        let hooks = Hooks::default();
        let log = Arc::clone(&hooks.log);
        let task = rt.spawn("hooks", hooks).unwrap();

        assert_eq!(task.call_later(|_, cx| cx.name().to_string()).join().unwrap(), "hooks");
        task.stop_task();
        task.stop_task();
        assert!(task.is_stop_requested());
        rt.join(Duration::from_secs(5)).unwrap();

        assert_eq!(*log.lock(), vec!["start", "stop"]);
        assert!(!task.is_active());
        assert!(rt.task_names().is_empty());
    }

    #[test]
    fn test_submit_after_end_is_inactive() {
        let rt = runtime(1);
        let task = rt.spawn("gone", Recorder::default()).unwrap();
        task.stop_task();
        rt.join(Duration::from_secs(5)).unwrap();

        let err = task.execute(|_, _| {}).unwrap_err();
        assert_eq!(err, AsyncError::TaskInactive { task: "gone".into() });
        assert!(task.call_later(|_, _| 1).join().unwrap_err().is_liveness());
        assert!(task.wakeup().is_err());
    }

    #[test]
    fn test_stop_deactivates_while_loop_is_busy() {
        let rt = runtime(1);
        let task = rt.spawn("busy", Recorder::default()).unwrap();
        let queued = task.call_later(|_, _| {
            std::thread::sleep(Duration::from_millis(300));
            "done"
        });
        std::thread::sleep(Duration::from_millis(50));

        task.stop_task();
        assert!(task.is_stop_requested());
        assert!(!task.is_active());
        assert_eq!(
            task.execute(|_, _| {}).unwrap_err(),
            AsyncError::TaskInactive { task: "busy".into() }
        );
        assert!(task.call_later(|_, _| 1).join().unwrap_err().is_liveness());

        assert_eq!(queued.join(), Ok("done"));
        rt.join(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_epilog_delays_end_of_task() {
        let rt = runtime(1);
        let task = rt.spawn("holder", Recorder::default()).unwrap();
        let (p, c) = promise::<()>();

        task.register_epilog(&c).unwrap();
        assert_eq!(task.call_later(|_, cx| cx.pending_epilogs()).join(), Ok(1));
        task.stop_task();

        let err = rt.join(Duration::from_millis(100)).unwrap_err();
        match err {
            crate::error::RuntimeError::JoinTimeout { remaining, .. } => {
                assert_eq!(remaining, vec!["holder".to_string()])
            }
            other => panic!("unexpected: {other}"),
        }
        assert!(task.is_active());

        p.succeed(());
        rt.join(Duration::from_secs(5)).unwrap();
        assert!(!task.is_active());
    }

    #[test]
    fn test_panicking_job_is_contained() {
        let rt = runtime(1);
        let task = rt.spawn("brittle", Recorder::default()).unwrap();

        let err = task
            .call_later(|_, _| -> u8 { panic!("boom") })
            .join()
            .unwrap_err();
        assert!(matches!(err, AsyncError::Panicked { ref message } if message == "boom"));

        task.execute(|_, _| panic!("fire and forget")).unwrap();
        assert_eq!(task.call_later(|_, _| 7).join(), Ok(7));
    }

    #[test]
    fn test_listen_runs_on_task_thread() {
        let rt = runtime(1);
        let task = rt.spawn("listener", Hooks::default()).unwrap();
        let (p, c) = promise::<i32>();
        let worker_thread = task.call_later(|_, _| std::thread::current().id()).join().unwrap();
        let seen_on = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&seen_on);

        task.listen(c, move |t, _, result| {
            t.total += result.unwrap_or(-1);
            *seen.lock() = Some(std::thread::current().id());
        });
        p.succeed(5);

        assert!(eventually(|| task.call_later(|t, _| t.total).join() == Ok(5)));
        assert_eq!(*seen_on.lock(), Some(worker_thread));
    }

    #[test]
    fn test_timeouts_fire_unless_cancelled() {
        let rt = runtime(1);
        let task = rt.spawn("timed", Hooks::default()).unwrap();
        let cancelled_runs = Arc::new(AtomicUsize::new(0));
        let runs = Arc::clone(&cancelled_runs);

        let fired = task.new_timeout(Duration::from_millis(20), |t, _| t.fired = true);
        let dropped = task.new_timeout(Duration::from_millis(20), move |_, _| {
            runs.fetch_add(1, Ordering::SeqCst);
        });
        assert!(dropped.cancel());

        assert!(eventually(|| task.call_later(|t, _| t.fired).join() == Ok(true)));
        assert!(fired.is_expired());
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cancelled_runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_execute_before_without_context() {
        let rt = runtime(1);
        let task = rt.spawn("plain", Recorder::default()).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);

        let done = task.execute_before(TimeLimit::within(Duration::from_secs(1)), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(done.join(), Ok(()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lifecycle_events_published() {
        let rt = runtime(1);
        let mut rx = rt.bus().subscribe();
        let task = rt.spawn("observed", Recorder::default()).unwrap();
        task.stop_task();
        rt.join(Duration::from_secs(5)).unwrap();

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if ev.task.as_deref() == Some("observed") {
                kinds.push(ev.kind);
            }
        }
        let pos = |k: EventKind| kinds.iter().position(|x| *x == k);
        let starting = pos(EventKind::TaskStarting).unwrap();
        let stop = pos(EventKind::TaskStopRequested).unwrap();
        let stopped = pos(EventKind::TaskStopped).unwrap();
        assert!(starting < stop && stop < stopped);
    }
}
