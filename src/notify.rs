use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for outbound client-notification events, one channel per
/// studio. The engine publishes every committed event; delivery is
/// fire-and-forget; retry/backoff belongs to the consuming collaborator.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a studio's events. Creates the channel if needed.
    pub fn subscribe(&self, studio: &str) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(studio.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, studio: &str, event: &Event) {
        if let Some(sender) = self.channels.get(studio) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a studio is retired).
    pub fn remove(&self, studio: &str) {
        self.channels.remove(studio);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe("braidery");

        let event = Event::ProviderRemoved { id: Ulid::new() };
        hub.send("braidery", &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber, should not panic
        hub.send("nowhere", &Event::ProviderRemoved { id: Ulid::new() });
    }

    #[tokio::test]
    async fn studios_are_isolated() {
        let hub = NotifyHub::new();
        let mut rx_a = hub.subscribe("studio_a");
        let _rx_b = hub.subscribe("studio_b");

        hub.send("studio_b", &Event::ProviderRemoved { id: Ulid::new() });
        assert!(rx_a.try_recv().is_err());
    }
}
