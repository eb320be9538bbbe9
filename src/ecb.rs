//! # EventControlBlock: a coalescing wakeup primitive.
//!
//! One or more producers [`post`](EventControlBlock::post); a consumer
//! [`wait_for_post`](EventControlBlock::wait_for_post)s with a timeout.
//!
//! ## Rules
//! - **Level-triggered**: a post made while nobody waits is remembered, and the
//!   next wait returns immediately.
//! - **Coalescing**: several posts before a wait count as one.
//! - `post` releases one waiter; `post_all` releases every current waiter.
//!
//! ```text
//! post() ─► [posted = true] ─► notify_one ─► waiter consumes flag ─► Posted
//! wait(timeout) with no post ─────────────────────────────────────► TimedOut
//! ```

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Result of [`EventControlBlock::wait_for_post`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A post was observed (and consumed).
    Posted,
    /// The timeout elapsed without a post.
    TimedOut,
}

#[derive(Default)]
struct Signal {
    posted: bool,
    broadcast: u64,
}

/// Mutex + condvar wakeup with a remembered "posted" flag.
#[derive(Default)]
pub struct EventControlBlock {
    signal: Mutex<Signal>,
    cond: Condvar,
}

impl EventControlBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the block posted and wakes one waiter.
    pub fn post(&self) {
        let mut signal = self.signal.lock();
        signal.posted = true;
        self.cond.notify_one();
    }

    /// Marks the block posted and wakes every current waiter.
    pub fn post_all(&self) {
        let mut signal = self.signal.lock();
        signal.posted = true;
        signal.broadcast = signal.broadcast.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Waits until posted or until `timeout` elapses.
    ///
    /// Consumes the posted flag when it returns [`WaitOutcome::Posted`].
    pub fn wait_for_post(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now().checked_add(timeout);
        let mut signal = self.signal.lock();
        let epoch = signal.broadcast;

        loop {
            if signal.posted || signal.broadcast != epoch {
                signal.posted = false;
                return WaitOutcome::Posted;
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut signal, deadline).timed_out() {
                        if signal.posted || signal.broadcast != epoch {
                            signal.posted = false;
                            return WaitOutcome::Posted;
                        }
                        return WaitOutcome::TimedOut;
                    }
                }
                None => self.cond.wait(&mut signal),
            }
        }
    }

    /// True if a post is pending (not yet consumed by a wait).
    pub fn is_posted(&self) -> bool {
        self.signal.lock().posted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_post_before_wait_is_remembered() {
        let ecb = EventControlBlock::new();
        ecb.post();
        assert!(ecb.is_posted());
        assert_eq!(ecb.wait_for_post(Duration::ZERO), WaitOutcome::Posted);
        assert!(!ecb.is_posted());
    }

    #[test]
    fn test_posts_coalesce() {
        let ecb = EventControlBlock::new();
        ecb.post();
        ecb.post();
        ecb.post();
        assert_eq!(ecb.wait_for_post(Duration::ZERO), WaitOutcome::Posted);
        assert_eq!(
            ecb.wait_for_post(Duration::from_millis(20)),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn test_wait_times_out() {
        let ecb = EventControlBlock::new();
        let started = Instant::now();
        assert_eq!(
            ecb.wait_for_post(Duration::from_millis(50)),
            WaitOutcome::TimedOut
        );
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_post_wakes_blocked_waiter() {
        let ecb = Arc::new(EventControlBlock::new());
        let waiter = {
            let ecb = Arc::clone(&ecb);
            thread::spawn(move || ecb.wait_for_post(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(30));
        ecb.post();
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Posted);
    }

    #[test]
    fn test_post_all_releases_every_waiter() {
        let ecb = Arc::new(EventControlBlock::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let ecb = Arc::clone(&ecb);
                thread::spawn(move || ecb.wait_for_post(Duration::from_secs(5)))
            })
            .collect();
        thread::sleep(Duration::from_millis(50));
        ecb.post_all();
        for w in waiters {
            assert_eq!(w.join().unwrap(), WaitOutcome::Posted);
        }
    }
}
