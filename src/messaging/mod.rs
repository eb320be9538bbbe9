//! # Messaging: topic-based publish/subscribe between tasks.
//!
//! Handlers run on their own task's thread; request replies run on the
//! publisher's thread. Everything is scheduled under the publish's
//! [`TimeLimit`](crate::TimeLimit).
//!
//! ## Architecture
//! ```text
//! publisher task ──publish(topic)──► Messaging ──match TopicFilter──► Subscription(s)
//!                                                                     │ run_before(limit)
//!                                                                     ▼
//!                                                handling task: Subscriber::on_publish(&MessageCtx, &Q)
//!                                                                     │ message.reply(r)   (requests)
//!                                                                     ▼
//!                                               publisher task: ResponseHandler::on_response(r)
//! ```
//!
//! ## Example
//! ```no_run
//! use tasklane::{Config, Messaging, Runtime, Task, TimeLimit};
//! use std::time::Duration;
//!
//! struct Echo;
//! impl Task for Echo {}
//!
//! let rt = Runtime::builder(Config::default()).build()?;
//! let echo = rt.spawn("echo", Echo)?;
//! let bus: Messaging<String, String> = Messaging::new();
//!
//! bus.register("echo/+", &echo, |_task, _cx, message, payload: &String| {
//!     let _ = message.reply(payload.to_uppercase());
//! })?;
//!
//! let sent = bus.publish_request(
//!     "echo/one",
//!     "hello".to_string(),
//!     TimeLimit::within(Duration::from_millis(200)),
//!     &echo,
//!     |_task, _cx, _message, answer| tracing::info!(%answer, "reply"),
//! )?;
//! sent.join()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod broker;
mod message;
mod subscription;
mod topic_filter;

pub use broker::Messaging;
pub use message::{MessageCtx, MessageKind, ResponseHandler};
pub use subscription::{Subscriber, Subscription, SubscriptionId};
pub use topic_filter::{TopicFilter, validate_topic};
