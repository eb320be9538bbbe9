//! # MessageCtx: envelope of one publish.
//!
//! Shared between the publisher and every handler it was delivered to.
//!
//! ## Reply state (requests only)
//! ```text
//! Waiting ──reply(r)────────► Replied   (response handler queued on the publisher's task)
//!    │
//!    ├──deadline fired──────► Closed    (completion fails: TimeLimitExceeded { executed, interrupted: false })
//!    └──delivery failed─────► Closed    (completion fails with the delivery error)
//! ```
//! `reply` on a push fails with `NotARequest`; a second reply fails with
//! `AlreadyReplied`; a reply after closing fails with `ReplyTimedOut`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::error::{AsyncError, MessagingError};
use crate::exec::{Completion, Promise, promise};
use crate::runtime::Timeout;
use crate::tasks::{Context, Task};
use crate::time_limit::TimeLimit;

/// Kind of a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Fire-and-forget; no reply path.
    Push,
    /// Expects exactly one reply before the deadline.
    Request,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Push => "PUSH",
            MessageKind::Request => "REQUEST",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives the reply of a request on the publisher's task thread.
pub trait ResponseHandler<P: Task, R>: Send + 'static {
    fn on_response(self, task: &mut P, cx: &mut Context<P>, message: &MessageCtx<R>, response: R);
}

impl<P, R, F> ResponseHandler<P, R> for F
where
    P: Task,
    F: FnOnce(&mut P, &mut Context<P>, &MessageCtx<R>, R) + Send + 'static,
{
    fn on_response(self, task: &mut P, cx: &mut Context<P>, message: &MessageCtx<R>, response: R) {
        self(task, cx, message, response)
    }
}

/// Queues the response handler on the publisher; built by the broker.
pub(crate) type Respond<R> = Box<dyn FnOnce(MessageCtx<R>, R) -> Completion<()> + Send>;

enum ReplyState<R> {
    Push,
    Waiting { respond: Respond<R>, done: Promise<()> },
    Replied,
    Closed,
}

struct Exchange<R> {
    kind: MessageKind,
    topic: Arc<str>,
    publisher: Arc<str>,
    limit: TimeLimit,
    publish_time: SystemTime,
    handlers: usize,
    started: AtomicBool,
    reply: Mutex<ReplyState<R>>,
    deadline: Mutex<Option<Timeout>>,
    completion: Mutex<Option<Completion<()>>>,
}

/// Envelope of one published message; cheap to clone.
pub struct MessageCtx<R> {
    inner: Arc<Exchange<R>>,
}

impl<R> Clone for MessageCtx<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Send + 'static> MessageCtx<R> {
    pub(crate) fn push(topic: Arc<str>, publisher: Arc<str>, limit: TimeLimit, handlers: usize) -> Self {
        Self::new(MessageKind::Push, topic, publisher, limit, handlers, ReplyState::Push)
    }

    pub(crate) fn request(
        topic: Arc<str>,
        publisher: Arc<str>,
        limit: TimeLimit,
        handlers: usize,
        respond: Respond<R>,
        done: Promise<()>,
    ) -> Self {
        Self::new(
            MessageKind::Request,
            topic,
            publisher,
            limit,
            handlers,
            ReplyState::Waiting { respond, done },
        )
    }

    fn new(
        kind: MessageKind,
        topic: Arc<str>,
        publisher: Arc<str>,
        limit: TimeLimit,
        handlers: usize,
        reply: ReplyState<R>,
    ) -> Self {
        Self {
            inner: Arc::new(Exchange {
                kind,
                topic,
                publisher,
                limit,
                publish_time: SystemTime::now(),
                handlers,
                started: AtomicBool::new(false),
                reply: Mutex::new(reply),
                deadline: Mutex::new(None),
                completion: Mutex::new(None),
            }),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.inner.kind
    }

    pub fn is_request(&self) -> bool {
        self.inner.kind == MessageKind::Request
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Name of the publishing task.
    pub fn publisher(&self) -> &str {
        &self.inner.publisher
    }

    /// Deadline of the publish; handlers and the response run under it.
    pub fn limit(&self) -> TimeLimit {
        self.inner.limit
    }

    pub fn publish_time(&self) -> SystemTime {
        self.inner.publish_time
    }

    /// Number of subscriptions this message was delivered to.
    pub fn handlers(&self) -> usize {
        self.inner.handlers
    }

    /// True once at least one handler callback started.
    pub fn is_delivered(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// True once every delivery (and, for requests, the response) resolved.
    pub fn is_done(&self) -> bool {
        self.inner
            .completion
            .lock()
            .as_ref()
            .is_some_and(Completion::is_done)
    }

    /// Completion of the whole exchange.
    ///
    /// Push: resolves once every handler callback ran. Request: additionally
    /// waits for the response handler on the publisher's thread.
    pub fn completion(&self) -> Completion<()> {
        match self.inner.completion.lock().as_ref() {
            Some(c) => c.fork(),
            None => Completion::failed(AsyncError::Dropped),
        }
    }

    /// Blocks until done or `timeout` elapses; true if done.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.completion().wait(timeout)
    }

    /// Blocks until done. Not to be called from a task thread.
    pub fn join(&self) -> Result<(), AsyncError> {
        self.completion().join()
    }

    /// Answers a request. The publisher's response handler runs on its own
    /// task thread, under this message's deadline.
    pub fn reply(&self, response: R) -> Result<(), MessagingError> {
        let topic = || self.inner.topic.to_string();
        let (respond, done) = {
            let mut state = self.inner.reply.lock();
            match std::mem::replace(&mut *state, ReplyState::Replied) {
                ReplyState::Waiting { respond, done } => (respond, done),
                ReplyState::Push => {
                    *state = ReplyState::Push;
                    return Err(MessagingError::NotARequest { topic: topic() });
                }
                ReplyState::Replied => return Err(MessagingError::AlreadyReplied { topic: topic() }),
                ReplyState::Closed => {
                    *state = ReplyState::Closed;
                    return Err(MessagingError::ReplyTimedOut { topic: topic() });
                }
            }
        };
        if let Some(deadline) = self.inner.deadline.lock().take() {
            deadline.cancel();
        }
        respond(self.clone(), response).then(move |result| {
            done.complete(result);
        });
        Ok(())
    }

    pub(crate) fn mark_started(&self) {
        self.inner.started.store(true, Ordering::Release);
    }

    pub(crate) fn set_deadline(&self, timeout: Timeout) {
        *self.inner.deadline.lock() = Some(timeout);
    }

    /// Installs the exchange's completion before any delivery is submitted,
    /// so handlers can observe it; the broker resolves the returned promise.
    pub(crate) fn arm_completion(&self) -> Promise<()> {
        let (settle, completion) = promise();
        *self.inner.completion.lock() = Some(completion);
        settle
    }

    pub(crate) fn has_replied(&self) -> bool {
        matches!(*self.inner.reply.lock(), ReplyState::Replied)
    }

    /// Deadline fired: fails a still pending request.
    pub(crate) fn expire(&self) {
        let executed = self.is_delivered();
        if self.close(AsyncError::TimeLimitExceeded {
            executed,
            interrupted: false,
        }) {
            tracing::debug!(topic = %self.inner.topic, executed, "request timed out");
        }
    }

    /// Fails a still pending request with `error`; true if it was pending.
    pub(crate) fn close(&self, error: AsyncError) -> bool {
        let done = {
            let mut state = self.inner.reply.lock();
            match std::mem::replace(&mut *state, ReplyState::Closed) {
                ReplyState::Waiting { done, .. } => done,
                other => {
                    *state = other;
                    return false;
                }
            }
        };
        if let Some(deadline) = self.inner.deadline.lock().take() {
            deadline.cancel();
        }
        done.fail(error);
        true
    }
}

impl<R> fmt::Display for MessageCtx<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message type {} on topic {}", self.inner.kind, self.inner.topic)
    }
}

impl<R> fmt::Debug for MessageCtx<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageCtx")
            .field("kind", &self.inner.kind)
            .field("topic", &self.inner.topic)
            .field("publisher", &self.inner.publisher)
            .field("handlers", &self.inner.handlers)
            .finish()
    }
}
