use std::sync::Arc;

use crate::error::RuntimeError;
use crate::subscribers::Subscribe;

use super::{Config, Runtime};

/// Builder for a [`Runtime`].
pub struct RuntimeBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl RuntimeBuilder {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
        }
    }

    /// Sets lifecycle event subscribers.
    ///
    /// Subscribers run on the service thread through dedicated workers with
    /// bounded queues; they never run on a task thread.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Starts the service thread, the worker loops and the event fan-out.
    pub fn build(self) -> Result<Runtime, RuntimeError> {
        Runtime::start(self.cfg, self.subscribers)
    }
}
