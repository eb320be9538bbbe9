//! # Messaging: topic registry and dispatch.
//!
//! ## Dispatch
//! ```text
//! publish(topic, payload, limit, publisher)
//!   ├─► validate topic (concrete, non-empty)        ──✗─► InvalidTopic
//!   ├─► validator(topic, &payload)                  ──✗─► InvalidPublish
//!   ├─► snapshot every subscription matching topic  ──∅─► InvalidTopic (no subscriber)
//!   └─► for each match: run_before(limit) on the handling task
//!              └─► subscriber.on_publish(task, cx, &message, &payload)
//!
//! publish_request(.., on_response)
//!   └─► as above, plus a deadline timer on the shared timer:
//!         reply(r) first   ─► on_response(r) on the publisher's task (under limit)
//!         deadline first   ─► TimeLimitExceeded { executed: any handler started, interrupted: false }
//!         delivery fails   ─► request fails with that error, unless a reply was already sent
//! ```
//!
//! ## Rules
//! - The subscription table is the only shared state; it is read-locked for
//!   the match snapshot and never held while delivering.
//! - Delivery order across matching subscriptions is unspecified.
//! - The message completion is installed before the first delivery.
//! - Accepted publishes increment `messages_total{task, type}` and
//!   `topic_call_count{task, topic}` through the `metrics` facade.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{AsyncError, MessagingError, PublishCause};
use crate::exec::{Completion, promise};
use crate::tasks::{Context, Task, TaskRef};
use crate::time_limit::TimeLimit;

use super::message::Respond;
use super::{
    MessageCtx, MessageKind, ResponseHandler, Subscriber, Subscription, SubscriptionId, TopicFilter,
    validate_topic,
};

type Validator<Q> = Box<dyn Fn(&str, &Q) -> Result<(), PublishCause> + Send + Sync>;

/// Topic-pattern publish/subscribe over tasks.
///
/// `Q` is the payload type, `R` the reply type of requests.
pub struct Messaging<Q, R = ()> {
    table: RwLock<BTreeMap<String, Vec<Subscription<Q, R>>>>,
    validator: Option<Validator<Q>>,
}

impl<Q, R> Default for Messaging<Q, R>
where
    Q: Send + Sync + 'static,
    R: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Q, R> Messaging<Q, R>
where
    Q: Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            table: RwLock::new(BTreeMap::new()),
            validator: None,
        }
    }

    /// Installs a payload check run on every publish.
    ///
    /// A rejection surfaces as [`MessagingError::InvalidPublish`] wrapping the cause.
    pub fn with_validator<F, E>(mut self, validator: F) -> Self
    where
        F: Fn(&str, &Q) -> Result<(), E> + Send + Sync + 'static,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        self.validator = Some(Box::new(move |topic, payload| {
            validator(topic, payload).map_err(Into::into)
        }));
        self
    }

    /// Subscribes `task` to `filter` with a closure run on the task's thread.
    pub fn register<T, F>(&self, filter: &str, task: &TaskRef<T>, on_publish: F) -> Result<SubscriptionId, MessagingError>
    where
        T: Task,
        F: Fn(&mut T, &mut Context<T>, &MessageCtx<R>, &Q) + Send + Sync + 'static,
    {
        self.register_subscriber(filter, task, on_publish)
    }

    /// Subscribes `task` to `filter` with a [`Subscriber`] implementation.
    ///
    /// Malformed filters fail here with [`MessagingError::InvalidTopicFilter`].
    pub fn register_subscriber<T, S>(
        &self,
        filter: &str,
        task: &TaskRef<T>,
        subscriber: S,
    ) -> Result<SubscriptionId, MessagingError>
    where
        T: Task,
        S: Subscriber<T, Q, R>,
    {
        let compiled = TopicFilter::new(filter)?;
        let subscription = Subscription::new(compiled, task, subscriber);
        let id = subscription.id();
        self.table
            .write()
            .entry(filter.to_string())
            .or_default()
            .push(subscription);
        tracing::debug!(filter, task = task.name(), subscription = %id, "subscription registered");
        Ok(id)
    }

    /// Removes one subscription; false if it was not registered.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let mut table = self.table.write();
        let mut removed = false;
        table.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|s| s.id() != id);
            removed |= subs.len() != before;
            !subs.is_empty()
        });
        removed
    }

    /// Removes every subscription held by `task`; returns how many.
    pub fn unregister_all<T: Task>(&self, task: &TaskRef<T>) -> usize {
        let mut table = self.table.write();
        let mut removed = 0;
        table.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|s| s.task_name() != task.name());
            removed += before - subs.len();
            !subs.is_empty()
        });
        removed
    }

    pub fn subscription_count(&self) -> usize {
        self.table.read().values().map(Vec::len).sum()
    }

    /// Registered filter patterns, sorted.
    pub fn topics(&self) -> Vec<String> {
        self.table.read().keys().cloned().collect()
    }

    /// Subscriptions whose filter matches `topic`.
    pub fn subscriptions_for(&self, topic: &str) -> Vec<Subscription<Q, R>> {
        self.table
            .read()
            .values()
            .flatten()
            .filter(|s| s.matches(topic))
            .cloned()
            .collect()
    }

    /// Publishes a push message to every matching subscription.
    pub fn publish<P: Task>(
        &self,
        topic: &str,
        payload: Q,
        limit: TimeLimit,
        publisher: &TaskRef<P>,
    ) -> Result<MessageCtx<R>, MessagingError> {
        let targets = self.prepare(topic, &payload, publisher, MessageKind::Push)?;
        let message = MessageCtx::push(Arc::from(topic), Arc::from(publisher.name()), limit, targets.len());
        tracing::trace!(topic, publisher = publisher.name(), handlers = targets.len(), "push");

        let settle = message.arm_completion();
        let payload = Arc::new(payload);
        let deliveries = targets
            .iter()
            .map(|s| s.deliver(message.clone(), Arc::clone(&payload)))
            .collect();
        Completion::all(deliveries).then(move |result| {
            settle.complete(result.map(|_| ()));
        });
        Ok(message)
    }

    /// Publishes a request; `on_response` runs on the publisher's task with
    /// the first reply.
    pub fn publish_request<P, F>(
        &self,
        topic: &str,
        payload: Q,
        limit: TimeLimit,
        publisher: &TaskRef<P>,
        on_response: F,
    ) -> Result<MessageCtx<R>, MessagingError>
    where
        P: Task,
        F: FnOnce(&mut P, &mut Context<P>, &MessageCtx<R>, R) + Send + 'static,
    {
        self.publish_request_with(topic, payload, limit, publisher, on_response)
    }

    /// [`publish_request`](Self::publish_request) with a [`ResponseHandler`] implementation.
    pub fn publish_request_with<P, H>(
        &self,
        topic: &str,
        payload: Q,
        limit: TimeLimit,
        publisher: &TaskRef<P>,
        handler: H,
    ) -> Result<MessageCtx<R>, MessagingError>
    where
        P: Task,
        H: ResponseHandler<P, R>,
    {
        let targets = self.prepare(topic, &payload, publisher, MessageKind::Request)?;

        let back = publisher.clone();
        let respond: Respond<R> = Box::new(move |message: MessageCtx<R>, response: R| {
            back.run_before(message.limit(), move |task, cx| {
                handler.on_response(task, cx, &message, response)
            })
        });
        let (done, response) = promise();
        let message = MessageCtx::request(
            Arc::from(topic),
            Arc::from(publisher.name()),
            limit,
            targets.len(),
            respond,
            done,
        );
        tracing::trace!(topic, publisher = publisher.name(), handlers = targets.len(), "request");

        if let Some(deadline) = limit.deadline() {
            let expiring = message.clone();
            let timeout = publisher
                .timer()
                .new_timeout_at(deadline, move |_| expiring.expire());
            message.set_deadline(timeout);
        }

        let settle = message.arm_completion();
        let payload = Arc::new(payload);
        let deliveries: Vec<Completion<()>> = targets
            .iter()
            .map(|s| {
                let delivered = s.deliver(message.clone(), Arc::clone(&payload));
                let watched = message.clone();
                let (p, c) = promise();
                delivered.then(move |result| match result {
                    Err(e) if watched.has_replied() => {
                        tracing::debug!(topic = watched.topic(), error = %e, "delivery failed after the reply");
                        p.succeed(());
                    }
                    Err(e) => {
                        watched.close(e.clone());
                        p.fail(e);
                    }
                    Ok(()) => {
                        p.succeed(());
                    }
                });
                c
            })
            .collect();

        let delivered = Completion::all(deliveries).map(|_| ());
        Completion::all(vec![delivered, response]).then(move |result| {
            settle.complete(result.map(|_| ()));
        });
        Ok(message)
    }

    /// Shared publish checks; returns the matching subscriptions and counts
    /// the publish once it is accepted.
    fn prepare<P: Task>(
        &self,
        topic: &str,
        payload: &Q,
        publisher: &TaskRef<P>,
        kind: MessageKind,
    ) -> Result<Vec<Subscription<Q, R>>, MessagingError> {
        validate_topic(topic)?;
        if let Some(validator) = &self.validator {
            validator(topic, payload).map_err(MessagingError::InvalidPublish)?;
        }
        if !publisher.is_active() {
            let inactive = AsyncError::TaskInactive {
                task: publisher.name().to_string(),
            };
            return Err(MessagingError::InvalidPublish(Box::new(inactive)));
        }

        let targets = self.subscriptions_for(topic);
        if targets.is_empty() {
            return Err(MessagingError::InvalidTopic {
                topic: topic.to_string(),
                reason: "no matching subscription",
            });
        }

        metrics::counter!(
            "topic_call_count",
            "task" => publisher.name().to_string(),
            "topic" => topic.to_string()
        )
        .increment(1);
        metrics::counter!(
            "messages_total",
            "task" => publisher.name().to_string(),
            "type" => kind.as_str()
        )
        .increment(1);
        Ok(targets)
    }
}

impl<Q, R> std::fmt::Debug for Messaging<Q, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.read();
        f.debug_struct("Messaging")
            .field("topics", &table.keys().collect::<Vec<_>>())
            .field("subscriptions", &table.values().map(Vec::len).sum::<usize>())
            .field("validated", &self.validator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use crate::runtime::{Config, Runtime};

    #[derive(Default)]
    struct Node {
        inbox: Vec<String>,
        answers: Vec<String>,
    }

    impl Task for Node {}

    fn runtime(prefix: &str) -> Runtime {
        let cfg = Config {
            worker_threads: 2,
            scan_interval: Duration::from_millis(20),
            watchdog_threshold: Duration::ZERO,
            thread_name_prefix: prefix.into(),
            ..Config::default()
        };
        Runtime::builder(cfg).build().unwrap()
    }

    fn within(ms: u64) -> TimeLimit {
        TimeLimit::within(Duration::from_millis(ms))
    }

    fn inbox(task: &TaskRef<Node>) -> Vec<String> {
        task.call_later(|t, _| t.inbox.clone()).join().unwrap()
    }

    #[test]
    fn test_push_reaches_every_match() {
        let rt = runtime("msg-push");
        let a = rt.spawn("a", Node::default()).unwrap();
        let b = rt.spawn("b", Node::default()).unwrap();
        let bus: Messaging<String> = Messaging::new();

        bus.register("sensors/+/temp", &a, |t: &mut Node, _: &mut Context<Node>, m: &MessageCtx<()>, p: &String| {
            t.inbox.push(format!("{} {p}", m.topic()));
        })
        .unwrap();
        bus.register("sensors/#", &b, |t: &mut Node, _: &mut Context<Node>, _: &MessageCtx<()>, p: &String| {
            t.inbox.push(p.clone());
        })
        .unwrap();
        bus.register("other", &b, |_: &mut Node, _: &mut Context<Node>, _: &MessageCtx<()>, _: &String| {})
            .unwrap();

        let sent = bus
            .publish("sensors/kitchen/temp", "21".to_string(), within(1000), &a)
            .unwrap();
        assert_eq!(sent.kind(), MessageKind::Push);
        assert_eq!(sent.handlers(), 2);
        assert_eq!(sent.publisher(), "a");
        sent.join().unwrap();
        assert!(sent.is_done());
        assert!(sent.is_delivered());

        assert_eq!(inbox(&a), vec!["sensors/kitchen/temp 21".to_string()]);
        assert_eq!(inbox(&b), vec!["21".to_string()]);
        assert_eq!(
            sent.reply(()).unwrap_err().as_label(),
            "messaging_not_a_request"
        );
    }

    #[test]
    fn test_request_reply_runs_on_publisher() {
        let rt = runtime("msg-request");
        let client = rt.spawn("client", Node::default()).unwrap();
        let server = rt.spawn("server", Node::default()).unwrap();
        let bus: Messaging<String, String> = Messaging::new();

        bus.register("echo/+", &server, |t: &mut Node, _: &mut Context<Node>, m: &MessageCtx<String>, p: &String| {
            t.inbox.push(p.clone());
            m.reply(p.to_uppercase()).unwrap();
            assert_eq!(
                m.reply("again".into()).unwrap_err().as_label(),
                "messaging_already_replied"
            );
        })
        .unwrap();

        let client_thread = client
            .call_later(|_, _| std::thread::current().id())
            .join()
            .unwrap();
        let sent = bus
            .publish_request("echo/1", "ping".to_string(), within(1000), &client, |t: &mut Node, _: &mut Context<Node>, _: &MessageCtx<String>, answer: String| {
                t.answers.push(format!("{answer}@{:?}", std::thread::current().id()));
            })
            .unwrap();
        assert!(sent.is_request());
        sent.join().unwrap();

        let answers = client.call_later(|t, _| t.answers.clone()).join().unwrap();
        assert_eq!(answers, vec![format!("PING@{client_thread:?}")]);
        assert_eq!(inbox(&server), vec!["ping".to_string()]);
    }

    #[test]
    fn test_request_without_reply_times_out() {
        let rt = runtime("msg-timeout");
        let client = rt.spawn("client", Node::default()).unwrap();
        let server = rt.spawn("server", Node::default()).unwrap();
        let bus: Messaging<String, String> = Messaging::new();
        let held: Arc<parking_lot::Mutex<Option<MessageCtx<String>>>> = Arc::default();
        let keep = Arc::clone(&held);

        bus.register("silent", &server, move |_: &mut Node, _: &mut Context<Node>, m: &MessageCtx<String>, _: &String| {
            *keep.lock() = Some(m.clone());
        })
        .unwrap();

        let started = Instant::now();
        let sent = bus
            .publish_request("silent", "hello".to_string(), within(100), &client, |t: &mut Node, _: &mut Context<Node>, _: &MessageCtx<String>, answer: String| {
                t.answers.push(answer);
            })
            .unwrap();
        let err = sent.join().unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(
            err,
            AsyncError::TimeLimitExceeded {
                executed: true,
                interrupted: false
            }
        );
        assert!(elapsed >= Duration::from_millis(90), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");

        let late = held.lock().clone().unwrap();
        assert_eq!(
            late.reply("late".into()).unwrap_err().as_label(),
            "messaging_reply_timed_out"
        );
        assert!(client.call_later(|t, _| t.answers.clone()).join().unwrap().is_empty());
    }

    #[test]
    fn test_reply_survives_handler_overrunning_limit() {
        let rt = runtime("msg-overrun");
        let client = rt.spawn("client", Node::default()).unwrap();
        let server = rt.spawn("server", Node::default()).unwrap();
        let bus: Messaging<String, String> = Messaging::new();

        bus.register("slow", &server, |_: &mut Node, _: &mut Context<Node>, m: &MessageCtx<String>, p: &String| {
            m.reply(format!("{p}!")).unwrap();
            std::thread::sleep(Duration::from_millis(250));
        })
        .unwrap();

        let sent = bus
            .publish_request("slow", "hi".to_string(), within(100), &client, |t: &mut Node, _: &mut Context<Node>, _: &MessageCtx<String>, answer: String| {
                t.answers.push(answer);
            })
            .unwrap();
        sent.join().unwrap();

        let answers = client.call_later(|t, _| t.answers.clone()).join().unwrap();
        assert_eq!(answers, vec!["hi!".to_string()]);
    }

    #[test]
    fn test_handler_sees_pending_completion() {
        let rt = runtime("msg-pending");
        let client = rt.spawn("client", Node::default()).unwrap();
        let server = rt.spawn("server", Node::default()).unwrap();
        let held: Arc<parking_lot::Mutex<Vec<Completion<()>>>> = Arc::default();

        let push: Messaging<u32> = Messaging::new();
        let keep = Arc::clone(&held);
        push.register("p", &server, move |t: &mut Node, _: &mut Context<Node>, m: &MessageCtx<()>, _: &u32| {
            let c = m.completion();
            t.inbox.push(format!("push done={}", c.is_done()));
            keep.lock().push(c);
        })
        .unwrap();

        let request: Messaging<u32, u32> = Messaging::new();
        let keep = Arc::clone(&held);
        request
            .register("r", &server, move |t: &mut Node, _: &mut Context<Node>, m: &MessageCtx<u32>, n: &u32| {
                let c = m.completion();
                t.inbox.push(format!("request done={}", c.is_done()));
                keep.lock().push(c);
                m.reply(n + 1).unwrap();
            })
            .unwrap();

        push.publish("p", 1, within(1000), &client).unwrap().join().unwrap();
        request
            .publish_request("r", 1, within(1000), &client, |_: &mut Node, _: &mut Context<Node>, _: &MessageCtx<u32>, _: u32| {})
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(
            inbox(&server),
            vec!["push done=false".to_string(), "request done=false".to_string()]
        );
        let held: Vec<Completion<()>> = held.lock().drain(..).collect();
        assert_eq!(held.len(), 2);
        for c in held {
            c.join().unwrap();
        }
    }

    #[test]
    fn test_publish_counts_messages_and_topics() {
        use metrics_util::debugging::{DebugValue, DebuggingRecorder};

        let rt = runtime("msg-metrics");
        let node = rt.spawn("node", Node::default()).unwrap();
        let push: Messaging<u32> = Messaging::new();
        let request: Messaging<u32, u32> = Messaging::new();
        push.register("m/+", &node, |_: &mut Node, _: &mut Context<Node>, _: &MessageCtx<()>, _: &u32| {})
            .unwrap();
        request
            .register("m/+", &node, |_: &mut Node, _: &mut Context<Node>, m: &MessageCtx<u32>, n: &u32| {
                m.reply(*n).unwrap();
            })
            .unwrap();

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            push.publish("m/a", 1, within(1000), &node).unwrap().join().unwrap();
            push.publish("m/a", 2, within(1000), &node).unwrap().join().unwrap();
            request
                .publish_request("m/b", 3, within(1000), &node, |_: &mut Node, _: &mut Context<Node>, _: &MessageCtx<u32>, _: u32| {})
                .unwrap()
                .join()
                .unwrap();
            assert!(push.publish("none", 4, within(1000), &node).is_err());
        });

        let mut counts: Vec<(String, Vec<(String, String)>, u64)> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| match value {
                DebugValue::Counter(n) => {
                    let labels = key
                        .key()
                        .labels()
                        .map(|l| (l.key().to_string(), l.value().to_string()))
                        .collect();
                    Some((key.key().name().to_string(), labels, n))
                }
                _ => None,
            })
            .collect();
        counts.sort();

        let pair = |k: &str, v: &str| (k.to_string(), v.to_string());
        assert_eq!(
            counts,
            vec![
                ("messages_total".to_string(), vec![pair("task", "node"), pair("type", "PUSH")], 2),
                ("messages_total".to_string(), vec![pair("task", "node"), pair("type", "REQUEST")], 1),
                ("topic_call_count".to_string(), vec![pair("task", "node"), pair("topic", "m/a")], 2),
                ("topic_call_count".to_string(), vec![pair("task", "node"), pair("topic", "m/b")], 1),
            ]
        );
    }

    #[test]
    fn test_topic_errors_surface_at_call_site() {
        let rt = runtime("msg-topics");
        let node = rt.spawn("node", Node::default()).unwrap();
        let bus: Messaging<u32> = Messaging::new();

        let err = bus
            .register("a/#/b", &node, |_: &mut Node, _: &mut Context<Node>, _: &MessageCtx<()>, _: &u32| {})
            .unwrap_err();
        assert_eq!(err.as_label(), "messaging_invalid_topic_filter");
        assert_eq!(bus.subscription_count(), 0);

        bus.register("a/+", &node, |_: &mut Node, _: &mut Context<Node>, _: &MessageCtx<()>, _: &u32| {})
            .unwrap();
        let wildcard = bus.publish("a/+", 1, within(100), &node).unwrap_err();
        assert_eq!(wildcard.as_label(), "messaging_invalid_topic");

        let unmatched = bus.publish("b/c", 1, within(100), &node).unwrap_err();
        assert!(matches!(
            unmatched,
            MessagingError::InvalidTopic { reason: "no matching subscription", .. }
        ));
    }

    #[test]
    fn test_validator_and_inactive_publisher() {
        let rt = runtime("msg-validate");
        let node = rt.spawn("node", Node::default()).unwrap();
        let gone = rt.spawn("gone", Node::default()).unwrap();
        let bus: Messaging<u32> = Messaging::new().with_validator(|_topic, value: &u32| {
            if *value > 10 { Err("value too large") } else { Ok(()) }
        });
        bus.register("n", &node, |_: &mut Node, _: &mut Context<Node>, _: &MessageCtx<()>, _: &u32| {})
            .unwrap();

        let err = bus.publish("n", 11, within(100), &node).unwrap_err();
        assert_eq!(
            err.publish_cause().map(ToString::to_string).as_deref(),
            Some("value too large")
        );
        bus.publish("n", 3, within(1000), &node).unwrap().join().unwrap();

        gone.stop_task();
        assert!(
            (0..500).any(|_| {
                std::thread::sleep(Duration::from_millis(5));
                !gone.is_active()
            })
        );
        let err = bus.publish("n", 1, within(100), &gone).unwrap_err();
        assert_eq!(err.as_label(), "messaging_invalid_publish");
    }

    #[test]
    fn test_unregister() {
        let rt = runtime("msg-unregister");
        let a = rt.spawn("a", Node::default()).unwrap();
        let b = rt.spawn("b", Node::default()).unwrap();
        let bus: Messaging<u32> = Messaging::new();
        let noop = |_: &mut Node, _: &mut Context<Node>, _: &MessageCtx<()>, _: &u32| {};

        let first = bus.register("x/+", &a, noop).unwrap();
        bus.register("x/+", &b, noop).unwrap();
        bus.register("y", &a, noop).unwrap();
        assert_eq!(bus.subscription_count(), 3);
        assert_eq!(bus.topics(), vec!["x/+".to_string(), "y".to_string()]);
        assert_eq!(bus.subscriptions_for("x/1").len(), 2);

        assert!(bus.unregister(first));
        assert!(!bus.unregister(first));
        assert_eq!(bus.unregister_all(&a), 1);
        assert_eq!(bus.topics(), vec!["x/+".to_string()]);
        assert_eq!(bus.subscriptions_for("x/1")[0].task_name(), "b");
    }
}
