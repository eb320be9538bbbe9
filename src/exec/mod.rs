//! # Deferred execution.
//!
//! - [`Completion`] / [`Promise`]: result of deferred work, awaitable and joinable.
//! - [`Executor`]: anything that runs jobs on a thread it owns.
//! - [`call_before`], [`run_before`], [`execute_before`], [`call_later`],
//!   [`run_later`], [`execute`], [`new_timeout`]: deadline-aware scheduling on
//!   any executor.
//! - [`interrupted`] / [`current_interrupt`]: cooperative interruption for work
//!   whose deadline fires while it runs.

mod completion;
mod executor;
mod interrupt;

pub use completion::{Completion, Promise, Watch, promise};
pub use executor::{
    Executor, Job, call_before, call_later, execute, execute_before, new_timeout, run_before,
    run_later,
};
pub use interrupt::{current_interrupt, interrupted};

pub(crate) use executor::{run_guarded, submit_guarded};
