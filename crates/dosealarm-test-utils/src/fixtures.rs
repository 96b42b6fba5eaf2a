//! Record fixtures anchored at a fixed reference instant.

use chrono::{DateTime, Duration, Utc};
use dosealarm_store::MedicationRecord;

/// Fixed reference instant plus `minutes`.
pub fn at(minutes: i64) -> DateTime<Utc> {
    let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default();
    base + Duration::minutes(minutes)
}

/// Hourly record starting at `at(0)`, with the given pre-reminders.
pub fn hourly_record(name: &str, reminders: impl IntoIterator<Item = u32>) -> MedicationRecord {
    MedicationRecord::new(name, "1 tablet", at(0), 60).with_pre_reminders(reminders)
}

/// Record that fires once at `at(minutes)`.
pub fn one_shot_record(name: &str, minutes: i64) -> MedicationRecord {
    MedicationRecord::new(name, "1 tablet", at(minutes), 0)
}
