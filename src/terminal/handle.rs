//! Handles to attached terminals and their states.
//!
//! - [`TerminalRef`] addresses a terminal by id; it stays valid across state
//!   changes and fails with `TerminatedTerminal` once the terminal is gone.
//! - [`StateRef`] addresses one state instance (terminal + generation); it
//!   fails with `InactiveState` as soon as the terminal moved on.
//! - [`TerminalCx`] is what closures and hooks receive on the task thread.
//!
//! Every scheduling method hops onto the owning task's thread first, so the
//! liveness checks and the closure run atomically with respect to other work
//! of that task.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use crate::error::AsyncError;
use crate::exec::Completion;
use crate::runtime::Timeout;
use crate::tasks::{Context, Task, TaskRef};
use crate::time_limit::TimeLimit;

use super::fsm::Transition;
use super::{TerminalId, TerminalState};

/// On-thread view handed to terminal hooks and terminal-bound closures.
pub struct TerminalCx<'a, T: Task, S: TerminalState<T>> {
    task: &'a mut T,
    cx: &'a mut Context<T>,
    terminal: &'a TerminalRef<T, S>,
    generation: u64,
    state_name: &'static str,
    next: Option<Transition<S>>,
}

impl<'a, T: Task, S: TerminalState<T>> TerminalCx<'a, T, S> {
    pub(crate) fn new(
        task: &'a mut T,
        cx: &'a mut Context<T>,
        terminal: &'a TerminalRef<T, S>,
        generation: u64,
        state_name: &'static str,
    ) -> Self {
        Self {
            task,
            cx,
            terminal,
            generation,
            state_name,
            next: None,
        }
    }

    pub fn task(&mut self) -> &mut T {
        &mut *self.task
    }

    pub fn cx(&mut self) -> &mut Context<T> {
        &mut *self.cx
    }

    /// Both the task and its context.
    pub fn split(&mut self) -> (&mut T, &mut Context<T>) {
        (&mut *self.task, &mut *self.cx)
    }

    pub fn terminal(&self) -> &TerminalRef<T, S> {
        self.terminal
    }

    /// Name of the state this view was opened for.
    pub fn state_name(&self) -> &'static str {
        self.state_name
    }

    /// Handle to the state instance this view was opened for.
    pub fn state_ref(&self) -> StateRef<T, S> {
        StateRef {
            terminal: self.terminal.clone(),
            generation: self.generation,
            name: self.state_name,
        }
    }

    /// Requests a transition to `state` once the current hook/closure returns.
    ///
    /// A later request replaces an earlier one.
    pub fn next_state(&mut self, state: S) {
        self.next = Some(Transition::To(state));
    }

    /// Requests termination once the current hook/closure returns.
    pub fn terminate(&mut self) {
        self.next = Some(Transition::Terminate);
    }

    pub fn has_pending_transition(&self) -> bool {
        self.next.is_some()
    }

    pub(crate) fn take_transition(&mut self) -> Option<Transition<S>> {
        self.next.take()
    }
}

/// Cloneable handle to an attached terminal.
pub struct TerminalRef<T: Task, S> {
    task: TaskRef<T>,
    id: TerminalId,
    _state: PhantomData<fn() -> S>,
}

impl<T: Task, S> Clone for TerminalRef<T, S> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            id: self.id,
            _state: PhantomData,
        }
    }
}

fn gone(id: TerminalId) -> AsyncError {
    AsyncError::TerminatedTerminal {
        terminal: format!("Terminal(id={id})"),
    }
}

impl<T: Task, S: TerminalState<T>> TerminalRef<T, S> {
    pub(crate) fn new(task: TaskRef<T>, id: TerminalId) -> Self {
        Self {
            task,
            id,
            _state: PhantomData,
        }
    }

    pub fn id(&self) -> TerminalId {
        self.id
    }

    /// The owning task.
    pub fn task(&self) -> &TaskRef<T> {
        &self.task
    }

    /// Forces a scan cycle of the owning task.
    pub fn wakeup(&self) -> Result<(), AsyncError> {
        self.task.wakeup()
    }

    /// On-thread check: true once the terminal has left its task.
    pub fn is_terminated(&self, cx: &Context<T>) -> bool {
        cx.terminal::<S>(self.id).is_none()
    }

    /// On-thread: handle to the current state, if one is installed.
    pub fn state_ref(&self, cx: &Context<T>) -> Option<StateRef<T, S>> {
        let terminal = cx.terminal::<S>(self.id)?;
        let state = terminal.state()?;
        Some(StateRef {
            terminal: self.clone(),
            generation: terminal.generation(),
            name: state.name(),
        })
    }

    fn submit<R, F>(&self, limit: TimeLimit, f: F) -> Completion<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut T, &mut Context<T>) -> Result<R, AsyncError> + Send + 'static,
    {
        self.task.submit_fallible(limit, f)
    }

    /// Moves the terminal to `state`: the current state's `on_leave` runs,
    /// then `state.on_entry`.
    pub fn next_state(&self, state: S) -> Completion<()> {
        let id = self.id;
        self.submit(TimeLimit::no_limit(), move |task, cx| {
            cx.with_terminal::<S, _, _>(task, id, |term, task, cx| {
                if term.is_terminated() {
                    return Err(term.terminated_error());
                }
                term.drive(task, cx, Transition::To(state));
                Ok(())
            })
            .unwrap_or_else(|| Err(gone(id)))
        })
    }

    /// Terminates the terminal. Idempotent: resolves `Ok` if already gone.
    pub fn terminate(&self) -> Completion<()> {
        let id = self.id;
        self.submit(TimeLimit::no_limit(), move |task, cx| {
            cx.with_terminal::<S, _, _>(task, id, |term, task, cx| {
                term.drive(task, cx, Transition::Terminate)
            });
            Ok(())
        })
    }

    /// Runs `f` with the current state if the call can start before `limit`.
    ///
    /// `f` gets `None` while the terminal is still in [`InitialState`](super::InitialState).
    pub fn call_before<R, F>(&self, limit: TimeLimit, f: F) -> Completion<R>
    where
        R: Send + 'static,
        F: FnOnce(Option<&mut S>, &mut TerminalCx<'_, T, S>) -> R + Send + 'static,
    {
        let id = self.id;
        self.submit(limit, move |task, cx| {
            cx.with_terminal::<S, _, _>(task, id, |term, task, cx| term.invoke(task, cx, f))
                .unwrap_or_else(|| Err(gone(id)))
        })
    }

    pub fn run_before<F>(&self, limit: TimeLimit, f: F) -> Completion<()>
    where
        F: FnOnce(Option<&mut S>, &mut TerminalCx<'_, T, S>) + Send + 'static,
    {
        self.call_before(limit, f)
    }

    pub fn call_later<R, F>(&self, f: F) -> Completion<R>
    where
        R: Send + 'static,
        F: FnOnce(Option<&mut S>, &mut TerminalCx<'_, T, S>) -> R + Send + 'static,
    {
        self.call_before(TimeLimit::no_limit(), f)
    }

    pub fn run_later<F>(&self, f: F) -> Completion<()>
    where
        F: FnOnce(Option<&mut S>, &mut TerminalCx<'_, T, S>) + Send + 'static,
    {
        self.call_before(TimeLimit::no_limit(), f)
    }

    /// Runs `f` on the task thread after `delay`, if the terminal still exists then.
    pub fn new_timeout<F>(&self, delay: Duration, f: F) -> Timeout
    where
        F: FnOnce(Option<&mut S>, &mut TerminalCx<'_, T, S>) + Send + 'static,
    {
        let id = self.id;
        self.task.new_timeout(delay, move |task, cx| {
            let fired = cx.with_terminal::<S, _, _>(task, id, |term, task, cx| term.invoke(task, cx, f));
            if !matches!(fired, Some(Ok(()))) {
                tracing::trace!(terminal = %id, "terminal timeout skipped: terminal gone");
            }
        })
    }
}

impl<T: Task, S> fmt::Display for TerminalRef<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Terminal(task={}, id={})", self.task.name(), self.id)
    }
}

impl<T: Task, S> fmt::Debug for TerminalRef<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalRef")
            .field("task", &self.task.name())
            .field("id", &self.id)
            .finish()
    }
}

/// Handle to one state instance of a terminal.
///
/// Becomes inactive as soon as the terminal transitions away from it.
pub struct StateRef<T: Task, S> {
    terminal: TerminalRef<T, S>,
    generation: u64,
    name: &'static str,
}

impl<T: Task, S> Clone for StateRef<T, S> {
    fn clone(&self) -> Self {
        Self {
            terminal: self.terminal.clone(),
            generation: self.generation,
            name: self.name,
        }
    }
}

impl<T: Task, S: TerminalState<T>> StateRef<T, S> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn terminal(&self) -> &TerminalRef<T, S> {
        &self.terminal
    }

    /// On-thread check: true while this state is the terminal's current one.
    pub fn is_active(&self, cx: &Context<T>) -> bool {
        cx.terminal::<S>(self.terminal.id).is_some_and(|t| {
            t.generation() == self.generation && t.state().is_some() && t.is_active()
        })
    }

    /// Runs `f` with this state if it is still current and the call can start
    /// before `limit`.
    pub fn call_before<R, F>(&self, limit: TimeLimit, f: F) -> Completion<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S, &mut TerminalCx<'_, T, S>) -> R + Send + 'static,
    {
        let id = self.terminal.id;
        let generation = self.generation;
        let name = self.name;
        self.terminal.submit(limit, move |task, cx| {
            cx.with_terminal::<S, _, _>(task, id, |term, task, cx| {
                term.invoke_state(task, cx, generation, name, f)
            })
            .unwrap_or_else(|| {
                Err(AsyncError::InactiveState {
                    state: name.to_string(),
                })
            })
        })
    }

    pub fn run_before<F>(&self, limit: TimeLimit, f: F) -> Completion<()>
    where
        F: FnOnce(&mut S, &mut TerminalCx<'_, T, S>) + Send + 'static,
    {
        self.call_before(limit, f)
    }

    pub fn call_later<R, F>(&self, f: F) -> Completion<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S, &mut TerminalCx<'_, T, S>) -> R + Send + 'static,
    {
        self.call_before(TimeLimit::no_limit(), f)
    }

    pub fn run_later<F>(&self, f: F) -> Completion<()>
    where
        F: FnOnce(&mut S, &mut TerminalCx<'_, T, S>) + Send + 'static,
    {
        self.call_before(TimeLimit::no_limit(), f)
    }

    /// Runs `f` on the task thread after `delay`, if this state is still current then.
    pub fn new_timeout<F>(&self, delay: Duration, f: F) -> Timeout
    where
        F: FnOnce(&mut S, &mut TerminalCx<'_, T, S>) + Send + 'static,
    {
        let id = self.terminal.id;
        let generation = self.generation;
        let name = self.name;
        self.terminal.task.new_timeout(delay, move |task, cx| {
            let fired = cx.with_terminal::<S, _, _>(task, id, |term, task, cx| {
                term.invoke_state(task, cx, generation, name, f)
            });
            if !matches!(fired, Some(Ok(()))) {
                tracing::trace!(terminal = %id, state = name, "state timeout skipped: state left");
            }
        })
    }
}

impl<T: Task, S> fmt::Debug for StateRef<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateRef")
            .field("terminal", &self.terminal)
            .field("state", &self.name)
            .field("generation", &self.generation)
            .finish()
    }
}
