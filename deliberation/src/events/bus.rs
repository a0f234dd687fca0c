//! Event bus for discussion events
//!
//! Fire-and-forget pub/sub over a Tokio broadcast channel. Publishing never
//! fails: with no subscribers the event is dropped.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::DiscussionEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<DiscussionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Slow subscribers lag (and skip) once `capacity` events are queued.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: DiscussionEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscussionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
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
    use chrono::Utc;

    fn started(phase_id: &str) -> DiscussionEvent {
        DiscussionEvent::PhaseStarted {
            phase_id: phase_id.to_string(),
            goal: "g".into(),
            phase_type: Default::default(),
            max_turns: 4,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe_in_order() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        bus.publish(started("a"));
        bus.publish(started("b"));
        assert_eq!(receiver.recv().await.unwrap().phase_id(), Some("a"));
        assert_eq!(receiver.recv().await.unwrap().phase_id(), Some("b"));
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        assert!(!bus.has_subscribers());
        bus.publish(started("a"));
    }
}
