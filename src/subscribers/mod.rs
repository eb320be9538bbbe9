//! # Lifecycle-event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out
//! and built-in implementations for handling lifecycle events broadcast
//! through the [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! task loop / terminal ── publish(Event) ──► Bus ──► event listener (service thread)
//!                                                         │
//!                                                         ▼
//!                                                   SubscriberSet
//!                                               ┌─────────┼─────────┐
//!                                               ▼         ▼         ▼
//!                                           LogWriter   Metrics   Custom
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use tasklane::{Event, EventKind, Subscribe};
//! use async_trait::async_trait;
//!
//! struct StallAlarm;
//!
//! #[async_trait]
//! impl Subscribe for StallAlarm {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::WatchdogStall {
//!             // page someone
//!         }
//!     }
//! }
//! ```

#[cfg(feature = "logging")]
mod embedded;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
