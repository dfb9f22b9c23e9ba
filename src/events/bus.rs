//! # Event bus for broadcasting cluster events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking event publishing from many sources (worker pumps, sequencers,
//! signal relays, the replacement loop).
//!
//! ```text
//! Publishers (many):                   Receivers (any):
//!   inbound pump ──┐
//!   sequencers   ──┼──────► Bus ──────► Cluster::subscribe() callers
//!   signal relay ──┤   (broadcast)  └──► subscriber listener ──► SubscriberSet
//!   replace loop ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks.
//! - **Bounded capacity**: one ring buffer shared by all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if nobody is subscribed at send time.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for cluster events.
///
/// Cheap to clone (internally an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (min 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    ///
    /// If there are no receivers, the event is dropped.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that observes subsequent events only.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn receivers_only_see_later_events() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::WorkerForked).with_pid(1));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::WorkerExited).with_pid(2));

        let ev = rx.recv().await.expect("event");
        assert_eq!(ev.kind, EventKind::WorkerExited);
        assert_eq!(ev.pid, Some(2));
    }
}
