//! Lifecycle events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to lifecycle events emitted by the runtime, task loops,
//! terminals and subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Runtime`, task loops, terminal drivers, the watchdog,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the runtime's event listener on the service thread, which
//!   fans out to the `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
