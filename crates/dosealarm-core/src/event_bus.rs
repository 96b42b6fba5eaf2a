//! Broadcast fan-out for alarm events.

use dosealarm_protocol::{AlarmEvent, NotificationSink};
use log::{debug, warn};
use tokio::sync::broadcast;

/// Broadcast-backed notification sink; every subscriber sees every event.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<AlarmEvent>,
}

impl EventBus {
    /// Create a bus whose subscribers may lag by up to `buffer` events.
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        debug!("alarm event bus initialized (buffer={})", buffer);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlarmEvent> {
        self.sender.subscribe()
    }
}

impl NotificationSink for EventBus {
    fn fire(&self, event: AlarmEvent) {
        if self.sender.send(event).is_err() {
            warn!("alarm event dropped (reason=no subscribers)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EventBus;
    use chrono::Utc;
    use dosealarm_protocol::{AlarmEvent, AlarmKind, MedicationSummary, NotificationSink, RecordId};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn subscribers_receive_fired_events() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        let now = Utc::now();
        let event = AlarmEvent::new(
            RecordId::new("a"),
            AlarmKind::Test,
            now,
            now,
            MedicationSummary {
                name: "Aspirin".to_string(),
                quantity: "1 pill".to_string(),
                image: None,
            },
        );
        bus.fire(event.clone());
        assert_eq!(first.recv().await.expect("first"), event);
        assert_eq!(second.recv().await.expect("second"), event);
    }
}
