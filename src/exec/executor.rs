//! # Executors and deadline-bound scheduling.
//!
//! An [`Executor`] accepts boxed jobs that receive `&mut Target` on the
//! executor's own thread. Tasks expose themselves as executors whose target is
//! the task state plus its context; plain event loops have `()` as target.
//!
//! The free functions here schedule work on any executor and hand back a
//! [`Completion`]:
//!
//! ```text
//! call_before(exec, timer, limit, f)
//!   │
//!   ├─ submit rejected ─────────────────────────► Err(TaskInactive)
//!   ▼  (on the executor thread)
//!   ├─ limit already expired ───────────────────► Err(TimeLimitExceeded{executed:false})
//!   ├─ arm interrupt token at limit on timer
//!   ├─ run f (interrupt installed, panics caught)
//!   │     ├─ panic ─────────────────────────────► Err(Panicked)
//!   │     ├─ token fired during run ────────────► Err(TimeLimitExceeded{executed:true, interrupted:true})
//!   │     └─ returned in time ──────────────────► Ok(value)
//!   └─ disarm timer
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::AsyncError;
use crate::exec::completion::{Completion, promise};
use crate::exec::interrupt;
use crate::runtime::{Timeout, Timer};
use crate::time_limit::TimeLimit;

/// Unit of work accepted by an [`Executor`].
pub type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// Something that runs jobs on a thread it owns.
pub trait Executor: Send + Sync + 'static {
    /// What each job gets mutable access to.
    type Target: ?Sized + 'static;

    /// Queues `job`. Fails if the executor no longer accepts work; the job is
    /// dropped in that case.
    fn submit(&self, job: Job<Self::Target>) -> Result<(), AsyncError>;
}

/// Runs `f` under `limit`; see the module diagram for the outcomes.
pub(crate) fn run_guarded<R>(
    timer: &Timer,
    limit: TimeLimit,
    f: impl FnOnce() -> Result<R, AsyncError>,
) -> Result<R, AsyncError> {
    if limit.is_expired() {
        return Err(AsyncError::not_executed());
    }

    let token = CancellationToken::new();
    let alarm: Option<Timeout> = limit.deadline().map(|deadline| {
        let token = token.clone();
        timer.new_timeout_at(deadline, move |_| token.cancel())
    });

    let outcome = interrupt::scope(token.clone(), || catch_unwind(AssertUnwindSafe(f)));

    if let Some(alarm) = alarm {
        alarm.cancel();
    }

    match outcome {
        Err(payload) => Err(AsyncError::from_panic(payload)),
        Ok(_) if token.is_cancelled() => Err(AsyncError::TimeLimitExceeded {
            executed: true,
            interrupted: true,
        }),
        Ok(result) => result,
    }
}

/// Submits a fallible job and returns its completion.
pub(crate) fn submit_guarded<E, R, F>(
    executor: &E,
    timer: &Timer,
    limit: TimeLimit,
    f: F,
) -> Completion<R>
where
    E: Executor + ?Sized,
    R: Send + 'static,
    F: FnOnce(&mut E::Target) -> Result<R, AsyncError> + Send + 'static,
{
    let (p, completion) = promise();
    let timer = timer.clone();
    let job: Job<E::Target> = Box::new(move |target| {
        p.complete(run_guarded(&timer, limit, || f(target)));
    });
    match executor.submit(job) {
        Ok(()) => completion,
        Err(e) => Completion::failed(e),
    }
}

/// Runs `f` on `executor` if it can start before `limit`.
pub fn call_before<E, R, F>(executor: &E, timer: &Timer, limit: TimeLimit, f: F) -> Completion<R>
where
    E: Executor + ?Sized,
    R: Send + 'static,
    F: FnOnce(&mut E::Target) -> R + Send + 'static,
{
    submit_guarded(executor, timer, limit, move |target| Ok(f(target)))
}

/// Like [`call_before`] for work without a value.
pub fn run_before<E, F>(executor: &E, timer: &Timer, limit: TimeLimit, f: F) -> Completion<()>
where
    E: Executor + ?Sized,
    F: FnOnce(&mut E::Target) + Send + 'static,
{
    call_before(executor, timer, limit, f)
}

/// Runs context-free work on `executor`'s thread if it can start before `limit`.
pub fn execute_before<E, F>(executor: &E, timer: &Timer, limit: TimeLimit, f: F) -> Completion<()>
where
    E: Executor + ?Sized,
    F: FnOnce() + Send + 'static,
{
    call_before(executor, timer, limit, move |_| f())
}

/// Runs `f` on `executor` without a deadline.
pub fn call_later<E, R, F>(executor: &E, timer: &Timer, f: F) -> Completion<R>
where
    E: Executor + ?Sized,
    R: Send + 'static,
    F: FnOnce(&mut E::Target) -> R + Send + 'static,
{
    call_before(executor, timer, TimeLimit::no_limit(), f)
}

/// Like [`call_later`] for work without a value.
pub fn run_later<E, F>(executor: &E, timer: &Timer, f: F) -> Completion<()>
where
    E: Executor + ?Sized,
    F: FnOnce(&mut E::Target) + Send + 'static,
{
    call_before(executor, timer, TimeLimit::no_limit(), f)
}

/// Fire-and-forget submission.
pub fn execute<E, F>(executor: &E, f: F) -> Result<(), AsyncError>
where
    E: Executor + ?Sized,
    F: FnOnce(&mut E::Target) + Send + 'static,
{
    executor.submit(Box::new(f))
}

/// Runs `f` on `executor` after `delay`, unless the returned timeout is cancelled.
pub fn new_timeout<E, F>(executor: &E, timer: &Timer, delay: Duration, f: F) -> Timeout
where
    E: Executor + Clone,
    F: FnOnce(&mut E::Target) + Send + 'static,
{
    let executor = executor.clone();
    timer.new_timeout(delay, move |_| {
        if let Err(e) = executor.submit(Box::new(f)) {
            tracing::debug!(error = %e, "timeout dropped: executor rejected the callback");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::exec::interrupted;
    use crate::runtime::event_loop::{EventLoopGroup, LoopThread};

    struct Fixture {
        group: EventLoopGroup,
        svc: LoopThread,
        timer: Timer,
    }

    impl Fixture {
        fn new() -> Self {
            let group = EventLoopGroup::new(1, "exec-test").unwrap();
            let svc = LoopThread::start("exec-test-svc".into()).unwrap();
            let timer = Timer::new(svc.handle().clone());
            Self { group, svc, timer }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.group.shutdown();
            self.svc.stop();
            self.svc.join();
        }
    }

    struct Closed;

    impl Executor for Closed {
        type Target = ();

        fn submit(&self, _job: Job<()>) -> Result<(), AsyncError> {
            Err(AsyncError::TaskInactive {
                task: "closed".into(),
            })
        }
    }

    #[test]
    fn test_call_before_returns_value() {
        let fx = Fixture::new();
        let lp = fx.group.next();
        let c = call_before(&lp, &fx.timer, TimeLimit::within(Duration::from_secs(1)), |_| 40 + 2);
        assert_eq!(c.join(), Ok(42));
    }

    #[test]
    fn test_expired_limit_never_runs() {
        let fx = Fixture::new();
        let lp = fx.group.next();
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        let limit = TimeLimit::before(std::time::Instant::now());
        let c = run_before(&lp, &fx.timer, limit, move |_| r.store(true, Ordering::SeqCst));
        assert_eq!(
            c.join(),
            Err(AsyncError::TimeLimitExceeded {
                executed: false,
                interrupted: false
            })
        );
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_deadline_interrupts_running_work() {
        let fx = Fixture::new();
        let lp = fx.group.next();
        let limit = TimeLimit::within(Duration::from_millis(50));
        let c = call_before(&lp, &fx.timer, limit, |_| {
            let started = std::time::Instant::now();
            while !interrupted() && started.elapsed() < Duration::from_secs(5) {
                std::thread::sleep(Duration::from_millis(2));
            }
            "finished"
        });
        assert_eq!(
            c.join(),
            Err(AsyncError::TimeLimitExceeded {
                executed: true,
                interrupted: true
            })
        );
    }

    #[test]
    fn test_panic_becomes_error_and_loop_survives() {
        let fx = Fixture::new();
        let lp = fx.group.next();
        let c: Completion<()> = call_later(&lp, &fx.timer, |_| panic!("job boom"));
        assert_eq!(
            c.join(),
            Err(AsyncError::Panicked {
                message: "job boom".into()
            })
        );
        assert_eq!(call_later(&lp, &fx.timer, |_| 1).join(), Ok(1));
    }

    #[test]
    fn test_rejected_submit_reports_executor_error() {
        let fx = Fixture::new();
        let c = execute_before(&Closed, &fx.timer, TimeLimit::no_limit(), || {});
        assert_eq!(
            c.join(),
            Err(AsyncError::TaskInactive {
                task: "closed".into()
            })
        );
        assert!(execute(&Closed, |_| {}).is_err());
    }

    #[test]
    fn test_new_timeout_runs_on_executor() {
        let fx = Fixture::new();
        let lp = fx.group.next();
        let (p, c) = promise::<String>();
        new_timeout(&lp, &fx.timer, Duration::from_millis(20), move |_| {
            p.succeed(std::thread::current().name().unwrap_or_default().to_string());
        });
        assert_eq!(c.join().unwrap(), "exec-test-worker-0");
    }
}
