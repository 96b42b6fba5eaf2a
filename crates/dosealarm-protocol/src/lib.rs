//! Shared types for dose alarm events and the notification seam.

mod text;

pub use text::{primary_message, reminder_message};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a medication record.
///
/// Ids are opaque strings: new records get a UUID, records imported from older
/// stores keep whatever identifier they were written with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Wrap an existing identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Channel an alarm event was emitted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AlarmKind {
    /// The dose is due now.
    Primary,
    /// Precursor notification a fixed number of minutes before the dose.
    Reminder { offset_minutes: u32 },
    /// Re-assertion of a primary alarm that is still waiting for the user.
    Repeat,
    /// Manually triggered test alarm.
    Test,
}

impl AlarmKind {
    /// Whether the event should be presented as a full alarm rather than a reminder.
    pub fn is_alarm(&self) -> bool {
        !matches!(self, AlarmKind::Reminder { .. })
    }

    /// Notification title for this kind of event.
    pub fn title(&self) -> &'static str {
        match self {
            AlarmKind::Reminder { .. } => "Reminder",
            AlarmKind::Primary | AlarmKind::Repeat | AlarmKind::Test => "Medication time",
        }
    }
}

/// Display fields of the medication an alarm refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationSummary {
    /// Medication name.
    pub name: String,
    /// Dose quantity, free text.
    pub quantity: String,
    /// Optional photo reference.
    #[serde(default)]
    pub image: Option<String>,
}

/// Event emitted when a channel fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmEvent {
    /// Unique id for the event.
    pub id: Uuid,
    /// Record the alarm belongs to.
    pub record_id: RecordId,
    /// Channel that fired.
    pub kind: AlarmKind,
    /// Due instant of the cycle (or the postponed instant).
    pub due: DateTime<Utc>,
    /// Instant the event was emitted.
    pub fired_at: DateTime<Utc>,
    /// Medication display fields.
    pub medication: MedicationSummary,
}

impl AlarmEvent {
    /// Build an event with a fresh id.
    pub fn new(
        record_id: RecordId,
        kind: AlarmKind,
        due: DateTime<Utc>,
        fired_at: DateTime<Utc>,
        medication: MedicationSummary,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            record_id,
            kind,
            due,
            fired_at,
            medication,
        }
    }

    /// Render the spoken/notified text for this event.
    pub fn message(&self, user_name: Option<&str>) -> String {
        match self.kind {
            AlarmKind::Reminder { offset_minutes } => {
                reminder_message(&self.medication, offset_minutes, user_name)
            }
            AlarmKind::Primary | AlarmKind::Repeat | AlarmKind::Test => {
                primary_message(&self.medication, user_name)
            }
        }
    }
}

/// Sink for fired alarm events.
///
/// Rendering, speech and vibration are the sink's business; the scheduler only
/// hands events over and never waits on them.
pub trait NotificationSink: Send + Sync {
    /// Deliver an event to downstream listeners.
    fn fire(&self, event: AlarmEvent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn summary() -> MedicationSummary {
        MedicationSummary {
            name: "Losartan".to_string(),
            quantity: "1 tablet".to_string(),
            image: None,
        }
    }

    #[test]
    fn record_id_serializes_transparently() {
        let id = RecordId::new("1712345678901");
        assert_eq!(serde_json::to_value(&id).expect("serialize"), json!("1712345678901"));
        assert_eq!(id.to_string(), "1712345678901");
    }

    #[test]
    fn reminder_kind_is_tagged() {
        let kind = AlarmKind::Reminder { offset_minutes: 5 };
        let value = serde_json::to_value(kind).expect("serialize");
        assert_eq!(value, json!({ "type": "reminder", "offset_minutes": 5 }));
        assert!(!kind.is_alarm());
        assert_eq!(kind.title(), "Reminder");
    }

    #[test]
    fn event_message_depends_on_kind() {
        let now = Utc::now();
        let alarm = AlarmEvent::new(
            RecordId::new("a"),
            AlarmKind::Primary,
            now,
            now,
            summary(),
        );
        assert_eq!(alarm.message(None), "Time to take 1 tablet of Losartan");

        let reminder = AlarmEvent {
            kind: AlarmKind::Reminder { offset_minutes: 3 },
            ..alarm
        };
        assert_eq!(
            reminder.message(Some("Ana")),
            "In 3 minutes it will be time to take 1 tablet of Losartan, Ana"
        );
    }
}
