//! # Tasks: thread-affine actors and their handles.
//!
//! - [`Task`] lifecycle hooks implemented by user state
//! - [`TaskRef`] cloneable cross-thread handle (scheduling, stop, timers)
//! - [`Context`] on-thread companion of the task (epilogs, terminals)
//! - [`TaskScope`] task plus context, as seen by queued jobs

mod actor;
mod context;
mod task;
mod task_ref;

pub use actor::TaskScope;
pub use context::Context;
pub use task::Task;
pub use task_ref::TaskRef;

pub(crate) use actor::{TaskActor, TaskActorParams};
pub(crate) use task_ref::TaskCore;
