//! # Task registry: names of live tasks and the drain signal.
//!
//! ## Rules
//! - Names are unique among live tasks; a second `add` with the same name fails.
//! - A task is removed by its own loop once it has fully stopped.
//! - Every removal posts the drain block, so `wait_drained` re-checks emptiness
//!   on each removal instead of polling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;

use crate::ecb::{EventControlBlock, WaitOutcome};
use crate::error::RuntimeError;
use crate::tasks::TaskCore;

/// Live tasks by name.
pub(crate) struct TaskRegistry {
    tasks: Mutex<HashMap<Arc<str>, Arc<TaskCore>>>,
    drained: EventControlBlock,
}

impl TaskRegistry {
    pub(crate) fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            drained: EventControlBlock::new(),
        }
    }

    pub(crate) fn add(&self, core: Arc<TaskCore>) -> Result<(), RuntimeError> {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&core.name) {
            return Err(RuntimeError::DuplicateTask {
                name: core.name.to_string(),
            });
        }
        tasks.insert(Arc::clone(&core.name), core);
        Ok(())
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Arc<TaskCore>> {
        let removed = self.tasks.lock().remove(name);
        self.drained.post_all();
        removed
    }

    /// Sorted names of live tasks.
    pub(crate) fn list(&self) -> Vec<String> {
        let tasks = self.tasks.lock();
        let mut names: Vec<String> = tasks.keys().map(|n| n.to_string()).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Requests stop on every live task; returns how many were newly asked.
    pub(crate) fn stop_all(&self) -> usize {
        let cores: Vec<Arc<TaskCore>> = self.tasks.lock().values().cloned().collect();
        cores.iter().filter(|core| core.request_stop()).count()
    }

    /// Names of tasks whose last scan is older than `max_stall`.
    pub(crate) fn stalled(&self, max_stall: Duration) -> Vec<(String, Duration)> {
        let now = SystemTime::now();
        let tasks = self.tasks.lock();
        let mut stalled: Vec<(String, Duration)> = tasks
            .values()
            .filter(|core| !core.is_ended())
            .filter_map(|core| {
                let idle = now.duration_since(core.last_scan()).ok()?;
                (idle > max_stall).then(|| (core.name.to_string(), idle))
            })
            .collect();
        stalled.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        stalled
    }

    /// Blocks until no task is left or `timeout` elapses; true if drained.
    pub(crate) fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if self.is_empty() {
                return true;
            }
            let left = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if left.is_zero() {
                return false;
            }
            if self.drained.wait_for_post(left) == WaitOutcome::TimedOut {
                return self.is_empty();
            }
        }
    }
}
