//! Error types used by the tasklane runtime, tasks, terminals and messaging.
//!
//! This module defines three error enums:
//!
//! - [`AsyncError`]: failures of a deferred unit of work (deadline, liveness, panic).
//! - [`RuntimeError`]: errors raised by the runtime itself (spawn, join, signals).
//! - [`MessagingError`]: errors raised synchronously by the messaging layer.
//!
//! All of them provide `as_label` for logs/metrics.

use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

/// # Failure of a scheduled unit of work.
///
/// Every [`Completion`](crate::Completion) resolves either with the value of
/// its work or with one of these errors.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AsyncError {
    /// The deadline passed before the work could start, or while it was running.
    ///
    /// - `executed = false`: the work never started.
    /// - `executed = true, interrupted = true`: the work started and was
    ///   interrupted by the deadline; its result was discarded.
    /// - `executed = true, interrupted = false`: a request handler ran but no
    ///   reply arrived before the deadline.
    #[error("time limit exceeded (executed: {executed}, interrupted: {interrupted})")]
    TimeLimitExceeded {
        /// Whether the work had started before the deadline.
        executed: bool,
        /// Whether running work was interrupted by the deadline.
        interrupted: bool,
    },

    /// The owning task is stopped (or stopping) and no longer accepts work.
    #[error("task '{task}' is not active")]
    TaskInactive {
        /// Name of the task.
        task: String,
    },

    /// The addressed terminal state is no longer the current one.
    #[error("state '{state}' is not active")]
    InactiveState {
        /// Name of the state that was addressed.
        state: String,
    },

    /// The addressed terminal has been terminated.
    #[error("terminal {terminal} is terminated")]
    TerminatedTerminal {
        /// Display form of the terminal.
        terminal: String,
    },

    /// The work panicked; the panic was contained on the executing thread.
    #[error("work panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },

    /// The work was dropped before it ran (its task loop exited).
    #[error("work dropped before completion")]
    Dropped,
}

impl AsyncError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use tasklane::AsyncError;
    ///
    /// let err = AsyncError::TimeLimitExceeded { executed: false, interrupted: false };
    /// assert_eq!(err.as_label(), "async_time_limit_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            AsyncError::TimeLimitExceeded { .. } => "async_time_limit_exceeded",
            AsyncError::TaskInactive { .. } => "async_task_inactive",
            AsyncError::InactiveState { .. } => "async_inactive_state",
            AsyncError::TerminatedTerminal { .. } => "async_terminated_terminal",
            AsyncError::Panicked { .. } => "async_panicked",
            AsyncError::Dropped => "async_dropped",
        }
    }

    /// True for [`AsyncError::TimeLimitExceeded`].
    pub fn is_deadline(&self) -> bool {
        matches!(self, AsyncError::TimeLimitExceeded { .. })
    }

    /// True for errors caused by a stopped task, a left state or a terminated terminal.
    pub fn is_liveness(&self) -> bool {
        matches!(
            self,
            AsyncError::TaskInactive { .. }
                | AsyncError::InactiveState { .. }
                | AsyncError::TerminatedTerminal { .. }
        )
    }

    /// Deadline error for work that never started.
    pub(crate) fn not_executed() -> Self {
        AsyncError::TimeLimitExceeded {
            executed: false,
            interrupted: false,
        }
    }

    /// Renders a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        AsyncError::Panicked { message }
    }
}

/// # Errors produced by the tasklane runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A task with the same name is already registered.
    #[error("task '{name}' is already registered")]
    DuplicateTask {
        /// The conflicting name.
        name: String,
    },

    /// An OS thread or its event loop could not be created.
    #[error("failed to start thread '{thread}': {source}")]
    WorkerSpawn {
        /// Name of the thread.
        thread: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// OS signal listeners could not be installed.
    #[error("failed to listen for shutdown signals: {0}")]
    ShutdownSignal(#[source] std::io::Error),

    /// Tasks were still registered when the join timeout elapsed.
    #[error("join timeout {timeout:?} exceeded; still running: {remaining:?}")]
    JoinTimeout {
        /// The timeout that elapsed.
        timeout: Duration,
        /// Names of tasks that had not ended.
        remaining: Vec<String>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use tasklane::RuntimeError;
    ///
    /// let err = RuntimeError::DuplicateTask { name: "ticker".into() };
    /// assert_eq!(err.as_label(), "runtime_duplicate_task");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::DuplicateTask { .. } => "runtime_duplicate_task",
            RuntimeError::WorkerSpawn { .. } => "runtime_worker_spawn",
            RuntimeError::ShutdownSignal(_) => "runtime_shutdown_signal",
            RuntimeError::JoinTimeout { .. } => "runtime_join_timeout",
        }
    }
}

/// Boxed cause attached to [`MessagingError::InvalidPublish`].
pub type PublishCause = Box<dyn StdError + Send + Sync + 'static>;

/// # Errors produced by the messaging layer.
///
/// Returned synchronously from `register`, `publish`, `publish_request` and
/// `MessageCtx::reply`. Asynchronous outcomes travel as [`AsyncError`].
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum MessagingError {
    /// A subscription pattern is malformed.
    #[error("invalid topic filter '{filter}': {reason}")]
    InvalidTopicFilter {
        /// The rejected pattern.
        filter: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A concrete topic is malformed or matches no subscription.
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic {
        /// The rejected topic.
        topic: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// The publish was refused (validator rejection, inactive publisher).
    #[error("invalid publish: {0}")]
    InvalidPublish(#[source] PublishCause),

    /// `reply` was called on a push message.
    #[error("message on '{topic}' is not a request")]
    NotARequest {
        /// Topic of the message.
        topic: String,
    },

    /// `reply` was called twice for the same request.
    #[error("request on '{topic}' was already replied")]
    AlreadyReplied {
        /// Topic of the request.
        topic: String,
    },

    /// `reply` was called after the request was closed by its deadline or a
    /// failed delivery.
    #[error("request on '{topic}' closed before the reply")]
    ReplyTimedOut {
        /// Topic of the request.
        topic: String,
    },
}

impl MessagingError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            MessagingError::InvalidTopicFilter { .. } => "messaging_invalid_topic_filter",
            MessagingError::InvalidTopic { .. } => "messaging_invalid_topic",
            MessagingError::InvalidPublish(_) => "messaging_invalid_publish",
            MessagingError::NotARequest { .. } => "messaging_not_a_request",
            MessagingError::AlreadyReplied { .. } => "messaging_already_replied",
            MessagingError::ReplyTimedOut { .. } => "messaging_reply_timed_out",
        }
    }

    /// Returns the validator's cause when this is an [`MessagingError::InvalidPublish`].
    pub fn publish_cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            MessagingError::InvalidPublish(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payload_rendering() {
        let err = AsyncError::from_panic(Box::new("boom"));
        assert_eq!(
            err,
            AsyncError::Panicked {
                message: "boom".into()
            }
        );

        let err = AsyncError::from_panic(Box::new(String::from("owned")));
        assert_eq!(err.to_string(), "work panicked: owned");

        let err = AsyncError::from_panic(Box::new(42_u8));
        assert_eq!(err.as_label(), "async_panicked");
    }

    #[test]
    fn test_invalid_publish_keeps_cause() {
        let cause: PublishCause = "payload too large".into();
        let err = MessagingError::InvalidPublish(cause);
        assert_eq!(err.as_label(), "messaging_invalid_publish");
        assert_eq!(
            err.publish_cause().map(|c| c.to_string()).as_deref(),
            Some("payload too large")
        );
        assert!(err.to_string().contains("payload too large"));
    }
}
