use krpc_encoding::{Addr, InfoHash, NodeID};
use tokio::sync::broadcast;

/// Typed events the core publishes for external subscribers
/// (persistence, an admin UI, metrics) without depending on any of
/// them being present.
#[derive(Clone, Debug)]
pub enum Event {
    NodeDiscovered { id: NodeID, endpoint: Addr },
    PeerDiscovered { info_hash: InfoHash, endpoint: Addr },
    InfoHashDiscovered { info_hash: InfoHash },
    MessageSent { method: &'static str, to: Addr },
    MessageReceived { method: &'static str, from: Addr },
    SystemStarted { local_addr: Addr },
    SystemStopped,
}

const CHANNEL_CAPACITY: usize = 1024;

/// A bounded broadcast bus. Subscribers that fall behind silently
/// miss old events rather than backing up publishers — this is
/// diagnostics, not a delivery guarantee.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> EventBus {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event. No-op (never errors) when nobody is
    /// subscribed, matching "the core must not depend on any
    /// subscriber being present."
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> EventBus {
        EventBus::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscriber_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Event::SystemStopped);
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Event::InfoHashDiscovered {
            info_hash: NodeID::random(),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::InfoHashDiscovered { .. }));
    }
}
