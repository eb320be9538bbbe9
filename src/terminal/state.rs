//! Terminal states.

use crate::tasks::Task;

use super::TerminalCx;

/// One state of a terminal's state machine.
///
/// Hooks run on the owning task's thread and receive a [`TerminalCx`] giving
/// access to the task, its context and transition requests. A transition
/// requested from a hook is applied once the hook returns.
///
/// # Example
/// ```no_run
/// use tasklane::{Task, TerminalCx, TerminalState};
///
/// struct Link;
/// impl Task for Link {}
///
/// enum Conn {
///     Connecting,
///     Connected,
/// }
///
/// impl TerminalState<Link> for Conn {
///     fn name(&self) -> &'static str {
///         match self {
///             Conn::Connecting => "Connecting",
///             Conn::Connected => "Connected",
///         }
///     }
///
///     fn on_entry(&mut self, term: &mut TerminalCx<'_, Link, Self>) {
///         if let Conn::Connecting = self {
///             term.next_state(Conn::Connected);
///         }
///     }
/// }
/// ```
pub trait TerminalState<T: Task>: Send + Sized + 'static {
    /// Name used in logs, events and errors.
    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }

    /// Runs after the previous state left.
    fn on_entry(&mut self, term: &mut TerminalCx<'_, T, Self>) {
        let _ = term;
    }

    /// Runs before the next state enters, and on termination.
    fn on_leave(&mut self, term: &mut TerminalCx<'_, T, Self>) {
        let _ = term;
    }

    /// Runs when the owning task starts its stop sequence.
    fn on_stop_requested(&mut self, term: &mut TerminalCx<'_, T, Self>) {
        let _ = term;
    }
}

/// Marker for a terminal that is not attached to a task yet (or was detached).
///
/// Scheduling through the terminal's handle is legal in this phase; effects
/// that need a live owner, such as [`Terminal::wakeup`](super::Terminal::wakeup),
/// fail with an inactive-state error.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InitialState;

impl InitialState {
    pub const NAME: &'static str = "InitialState";

    pub fn name(&self) -> &'static str {
        Self::NAME
    }
}

/// Last path segment of a type name, without generic arguments.
pub(crate) fn short_type_name<X: ?Sized>() -> &'static str {
    let full = std::any::type_name::<X>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
