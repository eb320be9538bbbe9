//! # Terminals: state machines attached to a task.
//!
//! A task hosts any number of independently lifecycled sub-protocols (a
//! socket, a health check, a session) as [`Terminal`]s. Each terminal holds exactly
//! one current [`TerminalState`]; entry and leave hooks run on the owning
//! task's thread, so a state never observes concurrent re-entry.
//!
//! ## Architecture
//! ```text
//! Terminal::new() ──► cx.register_terminal(t) ──► TerminalRef (by id)
//!                                                    │
//!                    next_state / terminate / call_* │  (hop onto task thread)
//!                                                    ▼
//!                         Context terminal table ──► Terminal driver
//!                                                    │
//!                                   on_leave(old) ──►┴──► on_entry(new)
//! ```
//!
//! ## Errors
//! - Addressing a terminated (or unregistered) terminal through a
//!   [`TerminalRef`] fails with `TerminatedTerminal`.
//! - Addressing a state that is no longer current through a [`StateRef`]
//!   fails with `InactiveState`.
//! - Waking a detached terminal fails with `InactiveState`.

mod fsm;
mod handle;
mod state;

pub use fsm::{Terminal, TerminalId};
pub use handle::{StateRef, TerminalCx, TerminalRef};
pub use state::{InitialState, TerminalState};

pub(crate) use fsm::AttachedTerminal;

