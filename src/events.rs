//! Typed pub/sub event bus (C9, spec §4.9).
//!
//! Delivery is best-effort to live subscribers; there is no persistence, and
//! a lagging subscriber simply misses events rather than blocking producers
//! (the lag is surfaced as a `RecvError::Lagged` to that subscriber only).

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// One variant per topic named in spec §4.9. Each carries a typed payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "topic", content = "payload")]
pub enum Event {
    #[serde(rename = "mail:new")]
    MailNew { account_id: Uuid, folder: String },

    #[serde(rename = "indexing:started")]
    IndexingStarted,
    /// Integer percent in `[0,100]`.
    #[serde(rename = "indexing:progress")]
    IndexingProgress { percent: u8 },
    #[serde(rename = "indexing:complete")]
    IndexingComplete,
    #[serde(rename = "indexing:error")]
    IndexingError { message: String },

    #[serde(rename = "embedding:started")]
    EmbeddingStarted { total: usize },
    #[serde(rename = "embedding:progress")]
    EmbeddingProgress {
        total: usize,
        done: usize,
        id: String,
    },
    #[serde(rename = "embedding:complete")]
    EmbeddingComplete { count: usize },
    #[serde(rename = "embedding:error")]
    EmbeddingError { message: String },

    #[serde(rename = "model:progress")]
    ModelProgress { model_id: String, percent: u8 },
    #[serde(rename = "model:complete")]
    ModelComplete { model_id: String },
    #[serde(rename = "model:error")]
    ModelError { model_id: String, message: String },

    #[serde(rename = "ai:token")]
    AiToken { token: String },
}

/// Lock-free multi-producer/multi-consumer broadcast handle.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }

    /// Best-effort publish; returns the number of live subscribers reached.
    /// A channel with zero subscribers is not an error.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
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

    #[tokio::test]
    async fn delivers_to_live_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Event::IndexingStarted);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::IndexingStarted));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Event::IndexingComplete);
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(Event::EmbeddingComplete { count: 3 });
        assert!(matches!(
            a.recv().await.unwrap(),
            Event::EmbeddingComplete { count: 3 }
        ));
        assert!(matches!(
            b.recv().await.unwrap(),
            Event::EmbeddingComplete { count: 3 }
        ));
    }
}
