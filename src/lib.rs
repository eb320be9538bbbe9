//! # tasklane
//!
//! **Tasklane** runs stateful tasks on dedicated worker threads and connects
//! them with deadline-aware scheduling, attached state machines and topic
//! based messaging.
//!
//! Every task is pinned to one event-loop thread for its whole life. All work
//! for a task (jobs, timers, state callbacks, message handlers, replies) runs
//! on that thread, one closure at a time, with `&mut` access to the task.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   TaskRef    │   │   TaskRef    │   │   TaskRef    │
//!     │  (handle #1) │   │  (handle #2) │   │  (handle #3) │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            │ call_before / run_later / new_timeout / listen
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Runtime                                                          │
//! │  - EventLoopGroup (worker threads, round-robin placement)         │
//! │  - TaskRegistry (live tasks by name)                              │
//! │  - Timer (service thread)                                         │
//! │  - Bus + SubscriberSet (lifecycle events)                         │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               │
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   │
//!     │  TaskActor   │   │  TaskActor   │   │  TaskActor   │   │
//!     │ (job loop)   │   │ (job loop)   │   │ (job loop)   │   │
//!     │ + terminals  │   │ + terminals  │   │ + terminals  │   │
//!     └┬─────────────┘   └┬─────────────┘   └┬─────────────┘   │
//!      │ TaskStarting     │ TerminalState-   │ TaskStopped     │
//!      │ TaskStopRequested│   Changed        │ CallbackPanicked│
//!      ▼                  ▼                  ▼                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │                   (capacity: Config::bus_capacity)                │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │  subscriber_listener   │
//!                       └───────────┬────────────┘
//!                                   ▼
//!                             SubscriberSet
//!                          (per-sub queues/workers)
//! ```
//!
//! ### Messaging
//! ```text
//! Messaging<Q, R>
//!   register(filter, &task, handler) ──► TopicFilter ("a/+/c", "a/#")
//!   publish(topic, payload, limit, &publisher)
//!        └─► every matching subscription: run_before(limit) on its task
//!   publish_request(.., on_response)
//!        └─► first reply ─► on_response on the publisher's task
//!            deadline    ─► TimeLimitExceeded
//! ```
//!
//! ### Stop sequence
//! ```text
//! stop_task() ──► on_stop_requested ──► terminals: on_stop_requested
//!             ──► epilogs settle    ──► terminals terminated
//!             ──► queued jobs fail with Dropped ──► removed from registry
//! ```
//!
//! ## Features
//! | Area              | Description                                                    | Key types / traits                          |
//! |-------------------|----------------------------------------------------------------|---------------------------------------------|
//! | **Tasks**         | Thread-affine state with lifecycle hooks and scheduling.       | [`Task`], [`TaskRef`], [`Context`]          |
//! | **Deadlines**     | Absolute time limits and guarded execution.                    | [`TimeLimit`], [`Completion`], [`Promise`]  |
//! | **Terminals**     | State machines attached to a task.                             | [`Terminal`], [`TerminalState`], [`StateRef`] |
//! | **Messaging**     | Topic-pattern push and request/reply between tasks.            | [`Messaging`], [`MessageCtx`], [`TopicFilter`] |
//! | **Signalling**    | Coalescing wake-up primitive.                                  | [`EventControlBlock`]                       |
//! | **Subscriber API**| Hook into lifecycle events (logging, metrics).                 | [`Subscribe`], [`Event`]                    |
//! | **Errors**        | Typed errors for async results, runtime and messaging.         | [`AsyncError`], [`RuntimeError`], [`MessagingError`] |
//! | **Configuration** | Worker count, scan interval, bus capacity, watchdog.           | [`Config`]                                  |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```no_run
//! use std::time::Duration;
//! use tasklane::{Config, Context, Runtime, Task, TimeLimit};
//!
//! struct Counter {
//!     hits: u64,
//! }
//!
//! impl Task for Counter {
//!     fn on_start(&mut self, cx: &mut Context<Self>) {
//!         tracing::info!(task = cx.name(), "counter up");
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rt = Runtime::builder(Config::default()).build()?;
//!     let counter = rt.spawn("counter", Counter { hits: 0 })?;
//!
//!     let hits = counter
//!         .call_before(TimeLimit::within(Duration::from_secs(1)), |c, _cx| {
//!             c.hits += 1;
//!             c.hits
//!         })
//!         .join()?;
//!     assert_eq!(hits, 1);
//!
//!     rt.shutdown(Duration::from_secs(5))?;
//!     Ok(())
//! }
//! ```
mod ecb;
mod error;
mod events;
mod exec;
mod messaging;
mod runtime;
mod subscribers;
mod tasks;
mod terminal;
mod time_limit;

// ---- Public re-exports ----

pub use ecb::{EventControlBlock, WaitOutcome};
pub use error::{AsyncError, MessagingError, PublishCause, RuntimeError};
pub use events::{Bus, Event, EventKind};
pub use exec::{
    Completion, Executor, Job, Promise, Watch, call_before, call_later, current_interrupt,
    execute, execute_before, interrupted, new_timeout, promise, run_before, run_later,
};
pub use messaging::{
    MessageCtx, MessageKind, Messaging, ResponseHandler, Subscriber, Subscription,
    SubscriptionId, TopicFilter, validate_topic,
};
pub use runtime::{Config, EventLoop, EventLoopGroup, Runtime, RuntimeBuilder, Timeout, Timer};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{Context, Task, TaskRef, TaskScope};
pub use terminal::{InitialState, StateRef, Terminal, TerminalCx, TerminalId, TerminalRef, TerminalState};
pub use time_limit::TimeLimit;

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
