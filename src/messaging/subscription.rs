//! Subscriptions: a topic filter bound to a handling task and its subscriber.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::exec::Completion;
use crate::tasks::{Context, Task, TaskRef};

use super::{MessageCtx, TopicFilter};

/// Handles messages delivered on the owning task's thread.
///
/// Implemented for every `Fn(&mut T, &mut Context<T>, &MessageCtx<R>, &Q)`.
pub trait Subscriber<T: Task, Q, R>: Send + Sync + 'static {
    fn on_publish(&self, task: &mut T, cx: &mut Context<T>, message: &MessageCtx<R>, payload: &Q);
}

impl<T, Q, R, F> Subscriber<T, Q, R> for F
where
    T: Task,
    F: Fn(&mut T, &mut Context<T>, &MessageCtx<R>, &Q) + Send + Sync + 'static,
{
    fn on_publish(&self, task: &mut T, cx: &mut Context<T>, message: &MessageCtx<R>, payload: &Q) {
        self(task, cx, message, payload)
    }
}

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one registration, used to unregister it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-erased delivery onto one task.
pub(crate) trait Deliver<Q, R>: Send + Sync {
    fn deliver(&self, message: MessageCtx<R>, payload: Arc<Q>) -> Completion<()>;
}

struct Bound<T: Task, S> {
    task: TaskRef<T>,
    subscriber: Arc<S>,
}

impl<T, S, Q, R> Deliver<Q, R> for Bound<T, S>
where
    T: Task,
    S: Subscriber<T, Q, R>,
    Q: Send + Sync + 'static,
    R: Send + 'static,
{
    fn deliver(&self, message: MessageCtx<R>, payload: Arc<Q>) -> Completion<()> {
        let subscriber = Arc::clone(&self.subscriber);
        self.task.run_before(message.limit(), move |task, cx| {
            message.mark_started();
            subscriber.on_publish(task, cx, &message, &payload);
        })
    }
}

/// A registered (filter, task, subscriber) triple.
pub struct Subscription<Q, R> {
    id: SubscriptionId,
    filter: TopicFilter,
    task: Arc<str>,
    target: Arc<dyn Deliver<Q, R>>,
}

impl<Q, R> Clone for Subscription<Q, R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            filter: self.filter.clone(),
            task: Arc::clone(&self.task),
            target: Arc::clone(&self.target),
        }
    }
}

impl<Q, R> Subscription<Q, R>
where
    Q: Send + Sync + 'static,
    R: Send + 'static,
{
    pub(crate) fn new<T, S>(filter: TopicFilter, task: &TaskRef<T>, subscriber: S) -> Self
    where
        T: Task,
        S: Subscriber<T, Q, R>,
    {
        Self {
            id: SubscriptionId::next(),
            filter,
            task: Arc::from(task.name()),
            target: Arc::new(Bound {
                task: task.clone(),
                subscriber: Arc::new(subscriber),
            }),
        }
    }

    pub(crate) fn deliver(&self, message: MessageCtx<R>, payload: Arc<Q>) -> Completion<()> {
        self.target.deliver(message, payload)
    }
}

impl<Q, R> Subscription<Q, R> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    /// Name of the handling task.
    pub fn task_name(&self) -> &str {
        &self.task
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.filter.matches(topic)
    }
}

impl<Q, R> fmt::Debug for Subscription<Q, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("task", &self.task)
            .finish()
    }
}
