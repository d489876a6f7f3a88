//! Typed publish/subscribe dispatcher.
//!
//! The bus is the only path between sensor producers and the fusion core.
//! Each subscription owns a private bounded queue; `publish` never blocks
//! and drops the event for any subscriber whose queue is full.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

use crate::events::{Event, EventKind};

/// Queue depth of every subscription.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 10;

/// Receive side of a subscription.
pub type Subscription = mpsc::Receiver<Event>;

/// At-most-once, best-effort event fan-out keyed by [`EventKind`].
///
/// Delivery to one subscriber is FIFO. Nothing is retained for late
/// subscribers.
pub struct EventBus {
    subscribers: RwLock<HashMap<EventKind, Vec<mpsc::Sender<Event>>>>,

    /// Events dropped on full queues since construction
    dropped: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Opens a new subscription to `kind`.
    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);

        let mut subscribers = self.subscribers.write();
        let senders = subscribers.entry(kind).or_default();
        senders.retain(|s| !s.is_closed());
        senders.push(tx);

        rx
    }

    /// Delivers `event` to every current subscriber of its kind.
    ///
    /// Returns how many subscribers received it.
    pub fn publish(&self, event: Event) -> usize {
        let kind = event.kind();
        let subscribers = self.subscribers.read();
        let Some(senders) = subscribers.get(&kind) else {
            return 0;
        };

        let mut delivered = 0;
        for sender in senders {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(kind = %kind, "subscriber queue full, event dropped");
                }
                // Receiver gone; pruned on the next subscribe
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        delivered
    }

    /// Releases every subscription. Receivers drain what is queued, then end.
    pub fn close(&self) {
        self.subscribers.write().clear();
    }

    /// Number of live subscriptions to `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .read()
            .get(&kind)
            .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    /// Total events dropped because a subscriber queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventPayload, ProximitySample};

    fn proximity_event(distance_mm: u32) -> Event {
        Event::new(
            distance_mm as u64,
            EventPayload::Proximity(ProximitySample::from_distance(distance_mm, 300)),
        )
    }

    fn distance_of(event: &Event) -> u32 {
        match event.payload() {
            EventPayload::Proximity(sample) => sample.distance_mm,
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let bus = EventBus::new();
        let mut slow = bus.subscribe(EventKind::Proximity);
        let mut fast = bus.subscribe(EventKind::Proximity);

        for i in 0..SUBSCRIBER_QUEUE_CAPACITY as u32 {
            assert_eq!(bus.publish(proximity_event(i)), 2);
        }

        // Drain only the fast subscriber, then overflow the slow one
        while fast.try_recv().is_ok() {}
        assert_eq!(bus.publish(proximity_event(999)), 1);
        assert_eq!(bus.dropped_events(), 1);

        let mut slow_seen = Vec::new();
        while let Ok(event) = slow.try_recv() {
            slow_seen.push(distance_of(&event));
        }
        assert_eq!(slow_seen.len(), SUBSCRIBER_QUEUE_CAPACITY);
        assert!(!slow_seen.contains(&999));

        assert_eq!(distance_of(&fast.try_recv().unwrap()), 999);
    }

    #[test]
    fn test_per_subscriber_fifo() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(EventKind::Proximity);

        for d in [100, 200, 300] {
            bus.publish(proximity_event(d));
        }

        let order: Vec<u32> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| distance_of(&e))
            .collect();
        assert_eq!(order, vec![100, 200, 300]);
    }

    #[test]
    fn test_routes_by_kind_only() {
        let bus = EventBus::new();
        let mut vision = bus.subscribe(EventKind::Vision);

        assert_eq!(bus.publish(proximity_event(120)), 0);
        assert!(vision.try_recv().is_err());
    }

    #[test]
    fn test_no_retroactive_delivery() {
        let bus = EventBus::new();
        bus.publish(proximity_event(120));

        let mut late = bus.subscribe(EventKind::Proximity);
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn test_close_ends_subscriptions() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(EventKind::Proximity);
        bus.publish(proximity_event(120));
        bus.close();

        assert_eq!(bus.subscriber_count(EventKind::Proximity), 0);
        assert!(rx.try_recv().is_ok());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_dropped_receivers_are_not_counted() {
        let bus = EventBus::new();
        let rx = bus.subscribe(EventKind::Motion);
        let _kept = bus.subscribe(EventKind::Motion);
        assert_eq!(bus.subscriber_count(EventKind::Motion), 2);

        drop(rx);
        assert_eq!(bus.subscriber_count(EventKind::Motion), 1);
    }
}
