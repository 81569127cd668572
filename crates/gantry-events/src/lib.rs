use serde_json::Value;
use tokio::sync::broadcast;

use gantry_types::EngineEvent;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(2048);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("published event with no active subscribers");
        }
    }

    /// Convenience for call sites that don't already hold an `EngineEvent`.
    pub fn emit(&self, topic: &str, data: Value, now_ms: u64) {
        self.publish(EngineEvent::new(topic, data, now_ms));
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
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(gantry_types::event::topics::TASK_QUEUED, json!({"task_id": "t1"}), 0);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, gantry_types::event::topics::TASK_QUEUED);
    }
}
