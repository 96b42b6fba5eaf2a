//! Notification sink that records what the scheduler fired.

use dosealarm_protocol::{AlarmEvent, AlarmKind, NotificationSink};
use parking_lot::Mutex;

/// Sink that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AlarmEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AlarmEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<AlarmKind> {
        self.events.lock().iter().map(|event| event.kind).collect()
    }

    pub fn count_kind(&self, kind: AlarmKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind == kind)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl NotificationSink for RecordingSink {
    fn fire(&self, event: AlarmEvent) {
        self.events.lock().push(event);
    }
}
