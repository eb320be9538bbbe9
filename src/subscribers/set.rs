//! # SubscriberSet: lifecycle events fanned out to subscribers.
//!
//! Every subscriber owns a bounded queue drained by its own worker on the
//! runtime's service thread. Subscriber code therefore never runs on a task
//! thread, and a slow subscriber only backs up its own queue.
//!
//! ```text
//!   emit(&Event) ──► Arc<Event> ──┬─► lane "log"    ─► worker ─► on_event()
//!                                 ├─► lane "audit"  ─► worker ─► on_event()
//!                                 └─► lane "..."    ─► worker ─► on_event()
//! ```
//!
//! - `emit` never waits; a full or closed lane drops the event for that
//!   subscriber and publishes `SubscriberOverflow`.
//! - Within a lane, events keep emit order. Across lanes there is no order.
//! - A panicking `on_event` is caught and published as `SubscriberPanicked`;
//!   the worker keeps draining.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::error::AsyncError;
use crate::events::{Bus, Event, EventKind};

use super::Subscribe;

struct Lane {
    subscriber: &'static str,
    queue: mpsc::Sender<Arc<Event>>,
}

/// Fan-out of lifecycle events to a fixed list of subscribers.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
    bus: Bus,
}

impl SubscriberSet {
    /// Spawns one draining worker per subscriber on `handle`.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus, handle: &Handle) -> Self {
        let lanes = subs
            .into_iter()
            .map(|sub| {
                let (queue, rx) = mpsc::channel(sub.queue_capacity().max(1));
                let subscriber = sub.name();
                drop(handle.spawn(drain(sub, rx, bus.clone())));
                Lane { subscriber, queue }
            })
            .collect();
        Self { lanes, bus }
    }

    /// Queues `event` on every lane without waiting.
    ///
    /// Dropping an overflow event does not publish another one.
    pub fn emit(&self, event: &Event) {
        let shared = Arc::new(event.clone());
        for lane in &self.lanes {
            let reason = match lane.queue.try_send(Arc::clone(&shared)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            if event.kind != EventKind::SubscriberOverflow {
                self.bus
                    .publish(Event::subscriber_overflow(lane.subscriber, reason));
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }
}

async fn drain(sub: Arc<dyn Subscribe>, mut rx: mpsc::Receiver<Arc<Event>>, bus: Bus) {
    while let Some(event) = rx.recv().await {
        let handled = AssertUnwindSafe(sub.on_event(&event)).catch_unwind().await;
        if let Err(panic) = handled {
            let info = match AsyncError::from_panic(panic) {
                AsyncError::Panicked { message } => message,
                other => other.to_string(),
            };
            tracing::warn!(subscriber = sub.name(), %info, "subscriber panicked");
            bus.publish(Event::subscriber_panicked(sub.name(), info));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Recorder {
        seen: Arc<Mutex<Vec<EventKind>>>,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, event: &Event) {
            self.seen.lock().push(event.kind);
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    struct Exploding;

    #[async_trait]
    impl Subscribe for Exploding {
        async fn on_event(&self, _event: &Event) {
            panic!("subscriber boom");
        }

        fn name(&self) -> &'static str {
            "exploding"
        }
    }

    #[tokio::test]
    async fn test_emit_preserves_per_subscriber_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let bus = Bus::new(16);
        let set = SubscriberSet::new(
            vec![Arc::new(Recorder {
                seen: Arc::clone(&seen),
            })],
            bus,
            &Handle::current(),
        );
        assert_eq!(set.len(), 1);

        set.emit(&Event::new(EventKind::TaskStarting));
        set.emit(&Event::new(EventKind::TaskStopRequested));
        set.emit(&Event::new(EventKind::TaskStopped));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            *seen.lock(),
            vec![
                EventKind::TaskStarting,
                EventKind::TaskStopRequested,
                EventKind::TaskStopped
            ]
        );
    }

    #[tokio::test]
    async fn test_panicking_subscriber_is_reported() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let set = SubscriberSet::new(vec![Arc::new(Exploding)], bus, &Handle::current());

        set.emit(&Event::new(EventKind::TaskStarting));

        let ev = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberPanicked);
        assert_eq!(ev.task.as_deref(), Some("exploding"));
        assert_eq!(ev.reason.as_deref(), Some("subscriber boom"));
    }
}
