//! # Context: on-thread state of a task owned by its loop.
//!
//! Holds the task's attached terminals and pending epilogs. Only the task
//! thread ever touches it, so none of it is locked.
//!
//! ## Terminal table
//! ```text
//! register_terminal(t) ──► table[id] = Box<dyn AttachedTerminal<T>>
//! with_terminal(id, f) ──► take table[id] ─► f(&mut Terminal<T,S>, task, cx) ─► put back
//!                                                            (dropped if terminated)
//! ```
//! While `f` runs, the terminal is out of the table: addressing it from inside
//! its own callback behaves as if it were gone.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;

use crate::events::Event;
use crate::exec::{Completion, Watch};
use crate::runtime::Timer;
use crate::terminal::{AttachedTerminal, Terminal, TerminalId, TerminalRef, TerminalState};

use super::task_ref::TaskCore;
use super::{Task, TaskRef};

/// Per-task context passed alongside `&mut T` to every hook and job.
pub struct Context<T: Task> {
    me: TaskRef<T>,
    epilogs: Vec<Watch>,
    terminals: BTreeMap<TerminalId, Box<dyn AttachedTerminal<T>>>,
}

impl<T: Task> Context<T> {
    pub(crate) fn new(me: TaskRef<T>) -> Self {
        Self {
            me,
            epilogs: Vec::new(),
            terminals: BTreeMap::new(),
        }
    }

    /// Handle to this task.
    pub fn me(&self) -> &TaskRef<T> {
        &self.me
    }

    pub fn name(&self) -> &str {
        self.me.name()
    }

    pub fn timer(&self) -> &Timer {
        self.me.timer()
    }

    /// Requests a graceful stop of this task (idempotent).
    pub fn stop_task(&self) {
        self.me.stop_task();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.me.is_stop_requested()
    }

    pub(crate) fn core(&self) -> &Arc<TaskCore> {
        &self.me.core
    }

    pub(crate) fn publish(&self, ev: Event) {
        self.me.core.publish(ev);
    }

    pub(crate) fn report_panic(&self, what: &str, payload: Box<dyn Any + Send>) {
        self.me.core.report_panic(what, payload);
    }

    // === Epilogs ===

    /// Keeps the task from ending until `completion` resolves.
    ///
    /// The task is woken as soon as it does.
    pub fn register_epilog<R: Send + 'static>(&mut self, completion: &Completion<R>) {
        self.register_watch(completion.watch());
    }

    pub(crate) fn register_watch(&mut self, watch: Watch) {
        let core = Arc::clone(self.core());
        watch.on_complete(move || core.wake.notify_one());
        self.epilogs.push(watch);
        self.core().set_pending_epilogs(self.epilogs.len());
    }

    /// Number of epilogs not yet resolved (as of the last scan).
    pub fn pending_epilogs(&self) -> usize {
        self.epilogs.len()
    }

    pub(crate) fn prune_epilogs(&mut self) -> usize {
        self.epilogs.retain(|w| !w.is_done());
        self.core().set_pending_epilogs(self.epilogs.len());
        self.epilogs.len()
    }

    // === Terminals ===

    /// Attaches `terminal` to this task; it stays in its current phase.
    pub fn register_terminal<S: TerminalState<T>>(
        &mut self,
        mut terminal: Terminal<T, S>,
    ) -> TerminalRef<T, S> {
        let id = terminal.id();
        let handle = TerminalRef::new(self.me.clone(), id);
        terminal.attach(handle.clone());
        tracing::debug!(task = self.name(), terminal = %terminal, "terminal registered");
        self.terminals.insert(id, Box::new(terminal));
        handle
    }

    /// Detaches a terminal: its current state's `on_leave` runs and it returns
    /// to `InitialState`.
    ///
    /// Returns `None` if the terminal is not attached here (or is the one
    /// currently running a callback).
    pub fn unregister_terminal<S: TerminalState<T>>(
        &mut self,
        task: &mut T,
        handle: &TerminalRef<T, S>,
    ) -> Option<Terminal<T, S>> {
        let boxed = self.terminals.remove(&handle.id())?;
        let mut terminal = match boxed.into_any().downcast::<Terminal<T, S>>() {
            Ok(terminal) => terminal,
            Err(_) => return None,
        };
        terminal.detach(task, self);
        Some(*terminal)
    }

    /// Number of attached terminals.
    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    pub(crate) fn terminal<S: TerminalState<T>>(&self, id: TerminalId) -> Option<&Terminal<T, S>> {
        self.terminals
            .get(&id)?
            .as_any()
            .downcast_ref::<Terminal<T, S>>()
    }

    /// Runs `f` on the terminal `id`; `None` if it is not attached.
    ///
    /// A panic in `f` propagates after the terminal is put back.
    pub(crate) fn with_terminal<S, R, F>(&mut self, task: &mut T, id: TerminalId, f: F) -> Option<R>
    where
        S: TerminalState<T>,
        F: FnOnce(&mut Terminal<T, S>, &mut T, &mut Context<T>) -> R,
    {
        let mut boxed = self.terminals.remove(&id)?;
        if !boxed.as_any().is::<Terminal<T, S>>() {
            self.terminals.insert(id, boxed);
            return None;
        }
        let terminal = boxed.as_any_mut().downcast_mut::<Terminal<T, S>>()?;
        let outcome = catch_unwind(AssertUnwindSafe(|| f(terminal, task, self)));
        if !boxed.is_terminated() {
            self.terminals.insert(id, boxed);
        }
        match outcome {
            Ok(r) => Some(r),
            Err(payload) => resume_unwind(payload),
        }
    }

    /// Stop hook of every attached terminal's current state.
    pub(crate) fn notify_terminals_stop(&mut self, task: &mut T) {
        let ids: Vec<TerminalId> = self.terminals.keys().copied().collect();
        for id in ids {
            let Some(mut terminal) = self.terminals.remove(&id) else {
                continue;
            };
            terminal.notify_stop(task, self);
            if !terminal.is_terminated() {
                self.terminals.insert(id, terminal);
            }
        }
    }

    /// Terminates every terminal still attached.
    pub(crate) fn terminate_terminals(&mut self, task: &mut T) {
        while let Some((_, mut terminal)) = self.terminals.pop_first() {
            terminal.force_terminate(task, self);
        }
    }
}

impl<T: Task> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("task", &self.me.name())
            .field("epilogs", &self.epilogs.len())
            .field("terminals", &self.terminals.len())
            .finish()
    }
}
