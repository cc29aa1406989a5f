//! In-process event bus: a broadcast channel that
//! does not survive a restart. `event_log` (the relational table) is the
//! durable audit trail; this bus is only for live subscribers such as
//! analytics collaborators wired in-process.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Every published event, tagged by kind with kind-specific `extra` payload
/// (`{kind, ts, id?, project?, extra}`).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "extra")]
pub enum Event {
    MemorySaved {
        content_hash: String,
        new_record: bool,
    },
    MemoryUpdated,
    MemoryArchived,
    Contradiction {
        other_id: String,
    },
    Promoted {
        stability: f64,
        review_count: u32,
        projects_validated: usize,
    },
    MaintenanceTick,
}

/// The full envelope delivered to subscribers; `id`/`project` are `None`
/// for events not scoped to a single record (e.g. `MaintenanceTick`).
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub ts: DateTime<Utc>,
    pub id: Option<String>,
    pub project: Option<String>,
    #[serde(flatten)]
    pub event: Event,
}

/// Broadcast capacity, per the resilience config default.
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Publish an event. At-least-once delivery to current subscribers; a
    /// subscriber lagging behind the channel's capacity drops the oldest
    /// entries rather than blocking this call (`broadcast::Sender::send`
    /// never blocks the publisher).
    pub fn publish(&self, id: Option<String>, project: Option<String>, event: Event) {
        let envelope = Envelope {
            ts: Utc::now(),
            id,
            project,
            event,
        };
        let _ = self.tx.send(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(
            Some("rec-1".into()),
            None,
            Event::MemorySaved {
                content_hash: "abc".into(),
                new_record: true,
            },
        );
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.id.as_deref(), Some("rec-1"));
        assert!(matches!(envelope.event, Event::MemorySaved { .. }));
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.publish(None, None, Event::MaintenanceTick);
    }
}
