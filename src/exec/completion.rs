//! # Completion / Promise: the result of deferred work.
//!
//! A [`Promise`] is the write side, held by whoever performs the work; a
//! [`Completion`] is the read side handed back to the caller.
//!
//! ## Consumption
//! - **async**: `completion.await` (it implements [`Future`]).
//! - **blocking**: [`Completion::join`] / [`Completion::wait`] from plain threads.
//! - **callback**: [`Completion::on_complete`] (notification only) and
//!   [`Completion::then`] (value-taking).
//!
//! ## Rules
//! - A promise resolves at most once; later attempts are ignored.
//! - Dropping an unresolved promise resolves it with [`AsyncError::Dropped`].
//! - `on_complete` callbacks run on the resolving thread, or immediately on the
//!   registering thread if already resolved.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::AsyncError;

type Listener = Box<dyn FnOnce() + Send + 'static>;

struct Slot<T> {
    result: Option<Result<T, AsyncError>>,
    done: bool,
    waker: Option<Waker>,
    listeners: Vec<Listener>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                result: None,
                done: false,
                waker: None,
                listeners: Vec::new(),
            }),
            cond: Condvar::new(),
        }
    }

    fn resolve(&self, result: Result<T, AsyncError>) -> bool {
        let (waker, listeners) = {
            let mut slot = self.slot.lock();
            if slot.done {
                return false;
            }
            slot.result = Some(result);
            slot.done = true;
            (slot.waker.take(), std::mem::take(&mut slot.listeners))
        };
        self.cond.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        for listener in listeners {
            listener();
        }
        true
    }

    fn is_done(&self) -> bool {
        self.slot.lock().done
    }

    fn on_complete(&self, listener: Listener) {
        let mut slot = self.slot.lock();
        if slot.done {
            drop(slot);
            listener();
        } else {
            slot.listeners.push(listener);
        }
    }

    fn take(&self) -> Option<Result<T, AsyncError>> {
        self.slot.lock().result.take()
    }

    fn wait_until(&self, deadline: Option<Instant>) -> bool {
        let mut slot = self.slot.lock();
        while !slot.done {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut slot, deadline).timed_out() {
                        return slot.done;
                    }
                }
                None => self.cond.wait(&mut slot),
            }
        }
        true
    }
}

/// Write side of a [`Completion`].
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
}

/// Read side of deferred work: resolves with `Ok(value)` or an [`AsyncError`].
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

/// Creates a connected promise / completion pair.
pub fn promise<T>() -> (Promise<T>, Completion<T>) {
    let shared = Arc::new(Shared::new());
    (
        Promise {
            shared: Some(Arc::clone(&shared)),
        },
        Completion { shared },
    )
}

impl<T> Promise<T> {
    /// Resolves the completion. Returns `false` if it was already resolved.
    pub fn complete(mut self, result: Result<T, AsyncError>) -> bool {
        match self.shared.take() {
            Some(shared) => shared.resolve(result),
            None => false,
        }
    }

    pub fn succeed(self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn fail(self, error: AsyncError) -> bool {
        self.complete(Err(error))
    }

    /// True if the read side already resolved (e.g. through another path).
    pub fn is_done(&self) -> bool {
        self.shared.as_ref().map_or(true, |s| s.is_done())
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(Err(AsyncError::Dropped));
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("done", &self.is_done())
            .finish()
    }
}

impl<T: Send + 'static> Completion<T> {
    /// An already resolved completion.
    pub fn ready(result: Result<T, AsyncError>) -> Self {
        let (promise, completion) = promise();
        promise.complete(result);
        completion
    }

    /// An already failed completion.
    pub fn failed(error: AsyncError) -> Self {
        Self::ready(Err(error))
    }

    /// True once resolved.
    pub fn is_done(&self) -> bool {
        self.shared.is_done()
    }

    /// Registers a notification callback. See module rules for the calling thread.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.on_complete(Box::new(f));
    }

    /// Consumes the completion and hands its result to `f` once resolved.
    pub fn then<F>(self, f: F)
    where
        F: FnOnce(Result<T, AsyncError>) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.shared.on_complete(Box::new(move || {
            let result = shared.take().unwrap_or(Err(AsyncError::Dropped));
            f(result);
        }));
    }

    /// Maps the successful value.
    pub fn map<U, F>(self, f: F) -> Completion<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (promise, completion) = promise();
        self.then(move |result| {
            promise.complete(result.map(f));
        });
        completion
    }

    /// Blocks the calling thread until resolved, or until `timeout` elapses.
    ///
    /// Returns `true` if resolved.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.shared.wait_until(Instant::now().checked_add(timeout))
    }

    /// Blocks the calling thread until resolved and returns the result.
    ///
    /// Must not be called from the thread that is expected to resolve it.
    pub fn join(self) -> Result<T, AsyncError> {
        self.shared.wait_until(None);
        self.shared.take().unwrap_or(Err(AsyncError::Dropped))
    }

    /// Erased, non-consuming view used for epilogs and bookkeeping.
    pub fn watch(&self) -> Watch {
        Watch(Arc::clone(&self.shared) as Arc<dyn Pending>)
    }

    /// Resolves once every input resolved, with values in input order.
    ///
    /// Fails with the first error observed.
    pub fn all(completions: Vec<Completion<T>>) -> Completion<Vec<T>> {
        let total = completions.len();
        if total == 0 {
            return Completion::ready(Ok(Vec::new()));
        }

        struct Join<T> {
            values: Mutex<Vec<Option<T>>>,
            remaining: AtomicUsize,
            promise: Mutex<Option<Promise<Vec<T>>>>,
        }

        let (promise, out) = promise();
        let join = Arc::new(Join {
            values: Mutex::new((0..total).map(|_| None).collect()),
            remaining: AtomicUsize::new(total),
            promise: Mutex::new(Some(promise)),
        });

        for (idx, completion) in completions.into_iter().enumerate() {
            let join = Arc::clone(&join);
            completion.then(move |result| match result {
                Ok(value) => {
                    join.values.lock()[idx] = Some(value);
                    if join.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        let values = std::mem::take(&mut *join.values.lock());
                        if let Some(p) = join.promise.lock().take() {
                            p.succeed(values.into_iter().flatten().collect());
                        }
                    }
                }
                Err(e) => {
                    if let Some(p) = join.promise.lock().take() {
                        p.fail(e);
                    }
                }
            });
        }
        out
    }
}

impl<T: Clone + Send + 'static> Completion<T> {
    /// A second completion resolving with a clone of this one's result.
    ///
    /// This completion keeps its own result; only forks and `peek` may observe it
    /// once forked, so do not `join`/`await` this completion and its forks together.
    pub fn fork(&self) -> Completion<T> {
        let (promise, out) = promise();
        let shared = Arc::clone(&self.shared);
        self.shared.on_complete(Box::new(move || {
            let result = shared.slot.lock().result.clone();
            promise.complete(result.unwrap_or(Err(AsyncError::Dropped)));
        }));
        out
    }

    /// The result if resolved, without consuming it.
    pub fn peek(&self) -> Option<Result<T, AsyncError>> {
        self.shared.slot.lock().result.clone()
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, AsyncError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock();
        if slot.done {
            return Poll::Ready(slot.result.take().unwrap_or(Err(AsyncError::Dropped)));
        }
        match &slot.waker {
            Some(w) if w.will_wake(cx.waker()) => {}
            _ => slot.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("done", &self.shared.is_done())
            .finish()
    }
}

/// Object-safe view of a pending completion.
pub(crate) trait Pending: Send + Sync {
    fn is_done(&self) -> bool;
    fn on_complete(&self, listener: Listener);
}

impl<T: Send> Pending for Shared<T> {
    fn is_done(&self) -> bool {
        Shared::is_done(self)
    }

    fn on_complete(&self, listener: Listener) {
        Shared::on_complete(self, listener)
    }
}

/// Type-erased, cloneable handle that observes a [`Completion`] without consuming it.
#[derive(Clone)]
pub struct Watch(Arc<dyn Pending>);

impl Watch {
    pub fn is_done(&self) -> bool {
        self.0.is_done()
    }

    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.0.on_complete(Box::new(f));
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Watch").field(&self.is_done()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    #[test]
    fn test_join_across_threads() {
        let (p, c) = promise::<u32>();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            p.succeed(7);
        });
        assert_eq!(c.join(), Ok(7));
        t.join().unwrap();
    }

    #[test]
    fn test_dropped_promise_fails() {
        let (p, c) = promise::<()>();
        drop(p);
        assert!(c.is_done());
        assert_eq!(c.join(), Err(AsyncError::Dropped));
    }

    #[test]
    fn test_on_complete_after_resolution_runs_inline() {
        let c = Completion::ready(Ok(1_u8));
        let hit = Arc::new(AtomicBool::new(false));
        let h = Arc::clone(&hit);
        c.on_complete(move || h.store(true, Ordering::SeqCst));
        assert!(hit.load(Ordering::SeqCst));
    }

    #[test]
    fn test_wait_times_out_when_unresolved() {
        let (_p, c) = promise::<()>();
        assert!(!c.wait(Duration::from_millis(20)));
        assert!(!c.is_done());
    }

    #[test]
    fn test_all_preserves_order_and_fails_fast() {
        let (p1, c1) = promise::<u32>();
        let (p2, c2) = promise::<u32>();
        let all = Completion::all(vec![c1, c2]);
        p2.succeed(2);
        assert!(!all.is_done());
        p1.succeed(1);
        assert_eq!(all.join(), Ok(vec![1, 2]));

        let (p3, c3) = promise::<u32>();
        let (_p4, c4) = promise::<u32>();
        let all = Completion::all(vec![c3, c4]);
        p3.fail(AsyncError::Dropped);
        assert_eq!(all.join(), Err(AsyncError::Dropped));

        assert_eq!(Completion::<u32>::all(Vec::new()).join(), Ok(vec![]));
    }

    #[test]
    fn test_fork_and_peek_leave_result_in_place() {
        let (p, c) = promise::<String>();
        let fork = c.fork();
        p.succeed("hi".into());
        assert_eq!(fork.join(), Ok("hi".to_string()));
        assert_eq!(c.peek(), Some(Ok("hi".to_string())));
        assert_eq!(c.fork().join(), Ok("hi".to_string()));
    }

    #[test]
    fn test_map_and_watch() {
        let (p, c) = promise::<u32>();
        let watch = c.watch();
        let mapped = c.map(|v| v * 2);
        assert!(!watch.is_done());
        p.succeed(21);
        assert!(watch.is_done());
        assert_eq!(mapped.join(), Ok(42));
    }

    #[tokio::test]
    async fn test_await_resolves() {
        let (p, c) = promise::<&'static str>();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            p.succeed("done");
        });
        assert_eq!(c.await, Ok("done"));
    }
}
