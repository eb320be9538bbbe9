//! # Terminal: one attached state machine.
//!
//! ## Phases
//! ```text
//! Initial ──register──► Initial(attached) ──next_state(s1)──► Active(s1)
//!                                                             │
//!                               next_state(s2): s1.on_leave ──┤── s2.on_entry
//!                                                             ▼
//!                                   terminate(): on_leave ──► Terminated (absorbing)
//! ```
//!
//! ## Rules
//! - The new state is installed (and the generation bumped) before the old
//!   state's `on_leave` runs; `on_entry` of the new state runs after it.
//! - A transition requested from `on_entry` is applied right after it returns;
//!   one requested from `on_leave` is ignored.
//! - Hook panics are caught, logged and published; the transition still completes.
//! - Once terminated the terminal is dropped from its task.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::AsyncError;
use crate::events::{Event, EventKind};
use crate::tasks::{Context, Task};

use super::state::short_type_name;
use super::{InitialState, TerminalCx, TerminalRef, TerminalState};

static NEXT_TERMINAL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique terminal identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TerminalId(u64);

impl TerminalId {
    fn next() -> Self {
        Self(NEXT_TERMINAL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) enum Phase<S> {
    Initial,
    Active(S),
    Terminated,
}

/// Transition requested through a [`TerminalCx`].
pub(crate) enum Transition<S> {
    To(S),
    Terminate,
}

/// A state machine attached to a task.
pub struct Terminal<T: Task, S: TerminalState<T>> {
    id: TerminalId,
    label: Option<Arc<str>>,
    phase: Phase<S>,
    generation: u64,
    attached: Option<TerminalRef<T, S>>,
}

impl<T: Task, S: TerminalState<T>> Terminal<T, S> {
    /// A detached terminal in [`InitialState`].
    pub fn new() -> Self {
        Self {
            id: TerminalId::next(),
            label: None,
            phase: Phase::Initial,
            generation: 0,
            attached: None,
        }
    }

    /// Attaches a human-readable label used in logs and `Display`.
    pub fn with_label(mut self, label: impl Into<Arc<str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn id(&self) -> TerminalId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Name of the current phase: `InitialState`, the state's name, or `Terminated`.
    pub fn state_name(&self) -> &'static str {
        match &self.phase {
            Phase::Initial => InitialState::NAME,
            Phase::Active(s) => s.name(),
            Phase::Terminated => "Terminated",
        }
    }

    /// Current state, if one is installed.
    pub fn state(&self) -> Option<&S> {
        match &self.phase {
            Phase::Active(s) => Some(s),
            _ => None,
        }
    }

    pub fn state_mut(&mut self) -> Option<&mut S> {
        match &mut self.phase {
            Phase::Active(s) => Some(s),
            _ => None,
        }
    }

    /// Bumped on every transition; identifies the current state instance.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.phase, Phase::Terminated)
    }

    /// True while attached to a live task and not terminated.
    pub fn is_active(&self) -> bool {
        !self.is_terminated()
            && self
                .attached
                .as_ref()
                .is_some_and(|h| h.task().is_active())
    }

    /// Handle of the attached terminal.
    pub fn handle(&self) -> Option<&TerminalRef<T, S>> {
        self.attached.as_ref()
    }

    /// Forces a scan cycle of the owning task.
    ///
    /// Fails with [`AsyncError::InactiveState`] while detached.
    pub fn wakeup(&self) -> Result<(), AsyncError> {
        match &self.attached {
            Some(handle) => handle.wakeup(),
            None => Err(AsyncError::InactiveState {
                state: InitialState::NAME.to_string(),
            }),
        }
    }

    pub(crate) fn attach(&mut self, handle: TerminalRef<T, S>) {
        self.attached = Some(handle);
    }

    /// Leaves the current state and returns to [`InitialState`], detached.
    pub(crate) fn detach(&mut self, task: &mut T, cx: &mut Context<T>) {
        let Some(handle) = self.attached.clone() else {
            return;
        };
        self.generation += 1;
        if let Phase::Active(mut old) = std::mem::replace(&mut self.phase, Phase::Initial) {
            self.leave(&mut old, task, cx, &handle);
        }
        self.attached = None;
        tracing::debug!(task = cx.name(), terminal = %self, "terminal detached");
    }

    /// Applies `first` and every transition requested from the entered states.
    pub(crate) fn drive(&mut self, task: &mut T, cx: &mut Context<T>, first: Transition<S>) {
        let Some(handle) = self.attached.clone() else {
            return;
        };

        let mut next = Some(first);
        while let Some(transition) = next.take() {
            if self.is_terminated() {
                break;
            }
            self.generation += 1;
            let incoming = match transition {
                Transition::To(s) => Phase::Active(s),
                Transition::Terminate => Phase::Terminated,
            };
            if let Phase::Active(mut old) = std::mem::replace(&mut self.phase, incoming) {
                self.leave(&mut old, task, cx, &handle);
            }

            let shown = self.to_string();
            let generation = self.generation;
            match &mut self.phase {
                Phase::Active(state) => {
                    tracing::debug!(task = cx.name(), terminal = %shown, "state entered");
                    cx.publish(
                        Event::new(EventKind::TerminalStateChanged)
                            .with_terminal(shown)
                            .with_state(state.name()),
                    );
                    let mut term = TerminalCx::new(task, cx, &handle, generation, state.name());
                    let entered = catch_unwind(AssertUnwindSafe(|| state.on_entry(&mut term)));
                    next = term.take_transition();
                    if let Err(payload) = entered {
                        cx.report_panic("terminal on_entry", payload);
                    }
                }
                Phase::Terminated => {
                    tracing::debug!(task = cx.name(), terminal = %shown, "terminal terminated");
                    cx.publish(Event::new(EventKind::TerminalTerminated).with_terminal(shown));
                }
                Phase::Initial => {}
            }
        }
    }

    fn leave(&self, old: &mut S, task: &mut T, cx: &mut Context<T>, handle: &TerminalRef<T, S>) {
        let mut term = TerminalCx::new(task, cx, handle, self.generation - 1, old.name());
        let left = catch_unwind(AssertUnwindSafe(|| old.on_leave(&mut term)));
        if term.take_transition().is_some() {
            tracing::warn!(terminal = %self, state = old.name(), "transition requested in on_leave ignored");
        }
        if let Err(payload) = left {
            cx.report_panic("terminal on_leave", payload);
        }
    }

    /// Runs `f` with the current state (if any) and applies its transition request.
    pub(crate) fn invoke<R>(
        &mut self,
        task: &mut T,
        cx: &mut Context<T>,
        f: impl FnOnce(Option<&mut S>, &mut TerminalCx<'_, T, S>) -> R,
    ) -> Result<R, AsyncError> {
        let Some(handle) = self.attached.clone() else {
            return Err(self.terminated_error());
        };
        if self.is_terminated() {
            return Err(self.terminated_error());
        }

        let generation = self.generation;
        let (state, name) = match &mut self.phase {
            Phase::Active(s) => {
                let name = s.name();
                (Some(s), name)
            }
            _ => (None, InitialState::NAME),
        };
        let mut term = TerminalCx::new(task, cx, &handle, generation, name);
        let out = f(state, &mut term);
        let next = term.take_transition();
        if let Some(transition) = next {
            self.drive(task, cx, transition);
        }
        Ok(out)
    }

    /// Runs `f` only if `generation` still names the current state.
    pub(crate) fn invoke_state<R>(
        &mut self,
        task: &mut T,
        cx: &mut Context<T>,
        generation: u64,
        state_name: &'static str,
        f: impl FnOnce(&mut S, &mut TerminalCx<'_, T, S>) -> R,
    ) -> Result<R, AsyncError> {
        let Some(handle) = self.attached.clone() else {
            return Err(inactive(state_name));
        };
        if self.generation != generation {
            return Err(inactive(state_name));
        }
        let Phase::Active(state) = &mut self.phase else {
            return Err(inactive(state_name));
        };

        let mut term = TerminalCx::new(task, cx, &handle, generation, state_name);
        let out = f(state, &mut term);
        let next = term.take_transition();
        if let Some(transition) = next {
            self.drive(task, cx, transition);
        }
        Ok(out)
    }

    /// Runs the current state's `on_stop_requested`.
    pub(crate) fn notify_stop(&mut self, task: &mut T, cx: &mut Context<T>) {
        let Some(handle) = self.attached.clone() else {
            return;
        };
        let generation = self.generation;
        let Phase::Active(state) = &mut self.phase else {
            return;
        };
        let mut term = TerminalCx::new(task, cx, &handle, generation, state.name());
        let notified = catch_unwind(AssertUnwindSafe(|| state.on_stop_requested(&mut term)));
        let next = term.take_transition();
        if let Err(payload) = notified {
            cx.report_panic("terminal on_stop_requested", payload);
        }
        if let Some(transition) = next {
            self.drive(task, cx, transition);
        }
    }

    pub(crate) fn terminated_error(&self) -> AsyncError {
        AsyncError::TerminatedTerminal {
            terminal: self.to_string(),
        }
    }
}

fn inactive(state: &'static str) -> AsyncError {
    AsyncError::InactiveState {
        state: state.to_string(),
    }
}

impl<T: Task, S: TerminalState<T>> Default for Terminal<T, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Task, S: TerminalState<T>> fmt::Display for Terminal<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Terminal(type={}", short_type_name::<S>())?;
        if let Some(label) = &self.label {
            write!(f, ", label={label}")?;
        }
        write!(f, ", state={}, id={})", self.state_name(), self.id)
    }
}

impl<T: Task, S: TerminalState<T>> fmt::Debug for Terminal<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminal")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("state", &self.state_name())
            .field("generation", &self.generation)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Type-erased terminal as stored in a task's [`Context`].
pub(crate) trait AttachedTerminal<T: Task>: Send {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn is_terminated(&self) -> bool;
    fn notify_stop(&mut self, task: &mut T, cx: &mut Context<T>);
    fn force_terminate(&mut self, task: &mut T, cx: &mut Context<T>);
}

impl<T: Task, S: TerminalState<T>> AttachedTerminal<T> for Terminal<T, S> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn is_terminated(&self) -> bool {
        Terminal::is_terminated(self)
    }

    fn notify_stop(&mut self, task: &mut T, cx: &mut Context<T>) {
        Terminal::notify_stop(self, task, cx)
    }

    fn force_terminate(&mut self, task: &mut T, cx: &mut Context<T>) {
        self.drive(task, cx, Transition::Terminate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use parking_lot::Mutex;

    use crate::runtime::{Config, Runtime};
    use crate::tasks::TaskRef;

    #[derive(Default)]
    struct Host {
        log: Arc<Mutex<Vec<String>>>,
        auto_connect: bool,
    }

    impl Host {
        fn note(&self, line: String) {
            self.log.lock().push(line);
        }
    }

    impl Task for Host {}

    enum Link {
        Connecting,
        Connected,
        Closing,
        Fragile,
    }

    impl TerminalState<Host> for Link {
        fn name(&self) -> &'static str {
            match self {
                Link::Connecting => "Connecting",
                Link::Connected => "Connected",
                Link::Closing => "Closing",
                Link::Fragile => "Fragile",
            }
        }

        fn on_entry(&mut self, term: &mut TerminalCx<'_, Host, Self>) {
            term.task().note(format!("enter {}", self.name()));
            let auto_connect = term.task().auto_connect;
            match self {
                Link::Connecting if auto_connect => term.next_state(Link::Connected),
                Link::Fragile => panic!("fragile entry"),
                _ => {}
            }
        }

        fn on_leave(&mut self, term: &mut TerminalCx<'_, Host, Self>) {
            term.task().note(format!("leave {}", self.name()));
        }

        fn on_stop_requested(&mut self, term: &mut TerminalCx<'_, Host, Self>) {
            term.task().note(format!("stop {}", self.name()));
            if let Link::Connected = self {
                term.terminate();
            }
        }
    }

    fn runtime(prefix: &str) -> Runtime {
        let cfg = Config {
            worker_threads: 1,
            scan_interval: Duration::from_millis(20),
            thread_name_prefix: prefix.into(),
            ..Config::default()
        };
        Runtime::builder(cfg).build().unwrap()
    }

    fn attach(task: &TaskRef<Host>) -> TerminalRef<Host, Link> {
        task.call_later(|_, cx| cx.register_terminal(Terminal::<Host, Link>::new().with_label("uplink")))
            .join()
            .unwrap()
    }

    fn log_of(host: &Host) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&host.log)
    }

    #[test]
    fn test_detached_terminal() {
        let term = Terminal::<Host, Link>::new().with_label("uplink");
        assert_eq!(term.state_name(), "InitialState");
        assert!(!term.is_attached());
        assert!(!term.is_active());
        assert_eq!(
            term.wakeup(),
            Err(AsyncError::InactiveState {
                state: "InitialState".into()
            })
        );
        let shown = term.to_string();
        assert!(shown.starts_with("Terminal(type=Link, label=uplink, state=InitialState, id="));

        let other = Terminal::<Host, Link>::new();
        assert_ne!(term.id(), other.id());
    }

    #[test]
    fn test_leave_runs_before_entry() {
        let rt = runtime("term-order");
        let mut rx = rt.bus().subscribe();
        let host = Host::default();
        let log = log_of(&host);
        let task = rt.spawn("host", host).unwrap();
        let term = attach(&task);

        term.next_state(Link::Connecting).join().unwrap();
        term.next_state(Link::Connected).join().unwrap();
        assert_eq!(
            *log.lock(),
            vec!["enter Connecting", "leave Connecting", "enter Connected"]
        );

        let mut entered = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::TerminalStateChanged {
                entered.push(ev.state.as_deref().map(str::to_string));
            }
        }
        assert_eq!(
            entered,
            vec![Some("Connecting".to_string()), Some("Connected".to_string())]
        );
    }

    #[test]
    fn test_transition_requested_on_entry_is_applied() {
        let rt = runtime("term-chain");
        let host = Host {
            auto_connect: true,
            ..Host::default()
        };
        let log = log_of(&host);
        let task = rt.spawn("host", host).unwrap();
        let term = attach(&task);

        term.next_state(Link::Connecting).join().unwrap();
        assert_eq!(term.call_later(|s, _| s.map(|s| s.name())).join(), Ok(Some("Connected")));
        assert_eq!(
            *log.lock(),
            vec!["enter Connecting", "leave Connecting", "enter Connected"]
        );
    }

    #[test]
    fn test_closure_sees_initial_state_and_can_transition() {
        let rt = runtime("term-initial");
        let task = rt.spawn("host", Host::default()).unwrap();
        let term = attach(&task);

        let seen = term
            .call_later(|s, t| (s.is_none(), t.state_name()))
            .join()
            .unwrap();
        assert_eq!(seen, (true, "InitialState"));

        term.run_later(|_, t| t.next_state(Link::Connected)).join().unwrap();
        assert_eq!(term.call_later(|s, _| s.map(|s| s.name())).join(), Ok(Some("Connected")));
    }

    #[test]
    fn test_state_ref_goes_inactive() {
        let rt = runtime("term-stateref");
        let task = rt.spawn("host", Host::default()).unwrap();
        let term = attach(&task);
        term.next_state(Link::Connected).join().unwrap();

        let peek = term.clone();
        let state = task
            .call_later(move |_, cx| peek.state_ref(cx))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(state.name(), "Connected");
        assert_eq!(state.call_later(|s, _| s.name()).join(), Ok("Connected"));

        term.next_state(Link::Closing).join().unwrap();
        assert_eq!(
            state.call_later(|s, _| s.name()).join(),
            Err(AsyncError::InactiveState {
                state: "Connected".into()
            })
        );
        let check = state.clone();
        assert_eq!(task.call_later(move |_, cx| check.is_active(cx)).join(), Ok(false));
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let rt = runtime("term-end");
        let host = Host::default();
        let log = log_of(&host);
        let task = rt.spawn("host", host).unwrap();
        let term = attach(&task);
        term.next_state(Link::Closing).join().unwrap();

        assert_eq!(term.terminate().join(), Ok(()));
        assert_eq!(term.terminate().join(), Ok(()));
        assert_eq!(log.lock().last().map(String::as_str), Some("leave Closing"));

        let err = term.next_state(Link::Connected).join().unwrap_err();
        assert_eq!(
            err,
            AsyncError::TerminatedTerminal {
                terminal: format!("Terminal(id={})", term.id())
            }
        );
        assert!(term.call_later(|_, _| ()).join().unwrap_err().is_liveness());

        let peek = term.clone();
        assert_eq!(task.call_later(move |_, cx| peek.is_terminated(cx)).join(), Ok(true));
        assert_eq!(task.call_later(|_, cx| cx.terminal_count()).join(), Ok(0));
    }

    #[test]
    fn test_unregister_returns_to_initial() {
        let rt = runtime("term-unregister");
        let host = Host::default();
        let log = log_of(&host);
        let task = rt.spawn("host", host).unwrap();
        let term = attach(&task);
        term.next_state(Link::Connected).join().unwrap();

        let handle = term.clone();
        let (state, attached, count) = task
            .call_later(move |t, cx| {
                let back = cx.unregister_terminal(t, &handle).unwrap();
                (back.state_name(), back.is_attached(), cx.terminal_count())
            })
            .join()
            .unwrap();
        assert_eq!((state, attached, count), ("InitialState", false, 0));
        assert_eq!(log.lock().last().map(String::as_str), Some("leave Connected"));
    }

    #[test]
    fn test_timeouts_follow_terminal_and_state() {
        let rt = runtime("term-timers");
        let host = Host::default();
        let log = log_of(&host);
        let task = rt.spawn("host", host).unwrap();
        let term = attach(&task);
        term.next_state(Link::Connecting).join().unwrap();

        let peek = term.clone();
        let state = task
            .call_later(move |_, cx| peek.state_ref(cx))
            .join()
            .unwrap()
            .unwrap();
        state.new_timeout(Duration::from_millis(30), |_, t| t.task().note("stale".into()));
        term.new_timeout(Duration::from_millis(30), |s, t| {
            let name = s.map(|s| s.name()).unwrap_or("none");
            t.task().note(format!("timer {name}"));
        });
        term.next_state(Link::Connected).join().unwrap();

        std::thread::sleep(Duration::from_millis(120));
        let lines = log.lock().clone();
        assert!(lines.contains(&"timer Connected".to_string()));
        assert!(!lines.contains(&"stale".to_string()));
    }

    #[test]
    fn test_entry_panic_is_contained() {
        let rt = runtime("term-panic");
        let task = rt.spawn("host", Host::default()).unwrap();
        let term = attach(&task);

        assert_eq!(term.next_state(Link::Fragile).join(), Ok(()));
        assert_eq!(term.call_later(|s, _| s.map(|s| s.name())).join(), Ok(Some("Fragile")));
        term.next_state(Link::Connected).join().unwrap();
    }

    #[test]
    fn test_task_stop_reaches_terminals() {
        let rt = runtime("term-stop");
        let host = Host::default();
        let log = log_of(&host);
        let task = rt.spawn("host", host).unwrap();
        let first = attach(&task);
        let second = attach(&task);
        first.next_state(Link::Connected).join().unwrap();
        second.next_state(Link::Connecting).join().unwrap();
        log.lock().clear();

        task.stop_task();
        rt.join(Duration::from_secs(5)).unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "stop Connected",
                "leave Connected",
                "stop Connecting",
                "leave Connecting"
            ]
        );
    }
}
