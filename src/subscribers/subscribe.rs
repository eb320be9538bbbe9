//! # Subscribe: the lifecycle-event extension point
//!
//! `Subscribe` is the extension point for plugging custom lifecycle-event
//! handlers into the runtime. Each subscriber is driven by a dedicated worker
//! on the service thread, fed by a bounded queue owned by the
//! [`SubscriberSet`](crate::subscribers::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow; they do **not** block task threads nor other
//!   subscribers.
//! - Each subscriber declares its queue capacity via [`Subscribe::queue_capacity`].
//!   If the queue overflows, events for that subscriber are **dropped** and a
//!   `SubscriberOverflow` event is published.

use async_trait::async_trait;

use crate::events::Event;

/// Contract for lifecycle-event subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Called once per event, in emit order, on the service thread.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow/panic events and logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this subscriber's lane (clamped to at least 1).
    fn queue_capacity(&self) -> usize {
        1024
    }
}
