//! # Pinned event loops.
//!
//! Each [`EventLoop`] is one OS thread driving its own current-thread tokio
//! runtime. Futures spawned on a loop never leave its thread, which is what
//! gives tasks their thread affinity.
//!
//! ## Architecture
//! ```text
//! EventLoopGroup
//!   ├─ worker-0 (thread) ── current_thread runtime ── block_on(stop.cancelled())
//!   ├─ worker-1 (thread) ── ...
//!   └─ worker-N
//!
//! next() ──► round-robin EventLoop (Handle + index)
//! ```
//!
//! ## Rules
//! - Threads are named `<prefix>-<role>-<index>`.
//! - Stopping a loop cancels its token; the thread returns and drops its
//!   runtime, which drops every future still parked on it.
//! - `join_threads` never joins the calling thread.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;

use crate::error::{AsyncError, RuntimeError};
use crate::exec::{Executor, Job};

/// One OS thread running a current-thread runtime until stopped.
pub(crate) struct LoopThread {
    name: String,
    handle: Handle,
    stop: CancellationToken,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LoopThread {
    pub(crate) fn start(name: String) -> Result<Self, RuntimeError> {
        let stop = CancellationToken::new();
        let (tx, rx) = mpsc::channel();
        let thread_stop = stop.clone();

        let spawn_err = |source| RuntimeError::WorkerSpawn {
            thread: name.clone(),
            source,
        };

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let rt = match Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                };
                let _ = tx.send(Ok(rt.handle().clone()));
                rt.block_on(thread_stop.cancelled());
            })
            .map_err(spawn_err)?;

        let handle = match rx.recv() {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(spawn_err(e)),
            Err(_) => {
                return Err(spawn_err(std::io::Error::other(
                    "event loop thread exited during startup",
                )));
            }
        };

        Ok(Self {
            name,
            handle,
            stop,
            thread: Mutex::new(Some(thread)),
        })
    }

    #[inline]
    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Signals the loop to exit (non-blocking).
    pub(crate) fn stop(&self) {
        self.stop.cancel();
    }

    /// Joins the thread unless it is the calling thread.
    pub(crate) fn join(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            tracing::error!(thread = %self.name, "event loop thread panicked");
        }
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Handle to one pinned loop; cheap to clone.
#[derive(Clone, Debug)]
pub struct EventLoop {
    index: usize,
    handle: Handle,
}

impl EventLoop {
    /// Position of this loop in its group.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Spawns a future that stays on this loop's thread.
    pub(crate) fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        drop(self.handle.spawn(fut));
    }
}

impl Executor for EventLoop {
    type Target = ();

    fn submit(&self, job: Job<()>) -> Result<(), AsyncError> {
        self.spawn(async move { job(&mut ()) });
        Ok(())
    }
}

/// Fixed set of pinned loops with round-robin placement.
pub struct EventLoopGroup {
    loops: Vec<LoopThread>,
    next: AtomicUsize,
}

impl EventLoopGroup {
    /// Starts `threads` loops (at least one) named `<prefix>-worker-<i>`.
    pub fn new(threads: usize, prefix: &str) -> Result<Self, RuntimeError> {
        let threads = threads.max(1);
        let mut loops = Vec::with_capacity(threads);
        for i in 0..threads {
            match LoopThread::start(format!("{prefix}-worker-{i}")) {
                Ok(l) => loops.push(l),
                Err(e) => {
                    for l in &loops {
                        l.stop();
                    }
                    return Err(e);
                }
            }
        }
        tracing::debug!(threads, "event loop group started");
        Ok(Self {
            loops,
            next: AtomicUsize::new(0),
        })
    }

    /// Next loop in round-robin order.
    pub fn next(&self) -> EventLoop {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        self.get(index)
    }

    fn get(&self, index: usize) -> EventLoop {
        EventLoop {
            index,
            handle: self.loops[index].handle().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Stops every loop and joins their threads (except the calling one).
    pub fn shutdown(&self) {
        for l in &self.loops {
            l.stop();
        }
        for l in &self.loops {
            l.join();
            tracing::trace!(thread = %l.name(), "event loop stopped");
        }
    }
}
