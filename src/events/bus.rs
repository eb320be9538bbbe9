//! # Event bus for broadcasting lifecycle events.
//!
//! [`Bus`] wraps a [`tokio::sync::broadcast`] sender. Task loops, terminals,
//! the watchdog and subscriber workers all publish through clones of it, from
//! any thread and without a runtime context.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                    Subscriber (one):
//!   task loop 1 ──┐
//!   task loop 2 ──┼──────► Bus ───────► event listener ────► SubscriberSet
//!   terminal    ──┤  (broadcast chan)   (service thread)
//!   runtime     ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks and never needs a runtime context.
//! - **Bounded**: one ring of `Config::bus_capacity` events shared by all receivers.
//! - **Lagging receivers** get `RecvError::Lagged(n)` and lose the `n` oldest events.
//! - **No persistence**: events are lost if there are no active receivers at send time.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for lifecycle events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    ///
    /// If there are no receivers, the event is dropped.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// A receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn test_receiver_sees_events_after_subscribe() {
        let bus = Bus::new(8);
        bus.publish(Event::new(EventKind::TaskStarting).with_task("lost"));

        let mut rx = bus.subscribe();
        assert_eq!(bus.receiver_count(), 1);
        bus.publish(Event::new(EventKind::TaskStopped).with_task("seen"));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::TaskStopped);
        assert_eq!(ev.task.as_deref(), Some("seen"));
    }

    #[tokio::test]
    async fn test_slow_receiver_lags() {
        let bus = Bus::new(1);
        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::TaskStarting));
        bus.publish(Event::new(EventKind::TaskStopped));
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::TaskStopped);
    }
}
