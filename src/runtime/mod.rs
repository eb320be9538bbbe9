//! # Runtime: threads, timer and task registry.
//!
//! - [`Runtime`] owns worker loops, the service thread and the live tasks
//! - [`RuntimeBuilder`] wires configuration and lifecycle subscribers
//! - [`Config`] global settings
//! - [`EventLoop`] / [`EventLoopGroup`] pinned current-thread loops
//! - [`Timer`] / [`Timeout`] one-shot timers driven by the service thread

mod app;
mod builder;
mod config;
pub(crate) mod event_loop;
mod registry;
mod shutdown;
mod timer;

pub use app::Runtime;
pub use builder::RuntimeBuilder;
pub use config::Config;
pub use event_loop::{EventLoop, EventLoopGroup};
pub use timer::{Timeout, Timer};
