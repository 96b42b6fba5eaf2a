//! Medication record model persisted by stores.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use dosealarm_protocol::{MedicationSummary, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Minute offsets a pre-reminder may use.
pub const ALLOWED_PRE_REMINDER_OFFSETS: [u32; 3] = [1, 3, 5];

/// Persisted medication record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationRecord {
    /// Record identifier.
    pub id: RecordId,
    /// Medication name.
    pub name: String,
    /// Dose quantity, free text.
    pub quantity: String,
    /// Instant of the first intended dose.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    /// Repeat interval; zero means the record fires once.
    #[serde(default)]
    pub interval_minutes: u32,
    /// Minutes before each due instant at which a reminder fires.
    #[serde(default)]
    pub pre_reminder_offsets: BTreeSet<u32>,
    /// Acknowledgement instants, oldest first.
    #[serde(default, with = "millis_list")]
    pub history: Vec<DateTime<Utc>>,
    /// Optional photo reference.
    #[serde(default)]
    pub image: Option<String>,
}

impl MedicationRecord {
    /// Create a record with a fresh id and empty history.
    pub fn new(
        name: impl Into<String>,
        quantity: impl Into<String>,
        start_time: DateTime<Utc>,
        interval_minutes: u32,
    ) -> Self {
        Self {
            id: RecordId::generate(),
            name: name.into(),
            quantity: quantity.into(),
            start_time,
            interval_minutes,
            pre_reminder_offsets: BTreeSet::new(),
            history: Vec::new(),
            image: None,
        }
    }

    /// Replace the pre-reminder offsets.
    pub fn with_pre_reminders(mut self, offsets: impl IntoIterator<Item = u32>) -> Self {
        self.pre_reminder_offsets = offsets.into_iter().collect();
        self
    }

    /// Attach a photo reference.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Whether the record fires at most once.
    pub fn is_one_shot(&self) -> bool {
        self.interval_minutes == 0
    }

    /// Most recent acknowledgement, if any.
    pub fn last_acknowledged(&self) -> Option<DateTime<Utc>> {
        self.history.last().copied()
    }

    /// Insert an acknowledgement keeping history sorted.
    pub fn record_acknowledgement(&mut self, at: DateTime<Utc>) {
        let position = self.history.partition_point(|entry| *entry <= at);
        self.history.insert(position, at);
    }

    /// Drop the oldest acknowledgements beyond `limit`.
    pub fn trim_history(&mut self, limit: usize) {
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }

    /// Display fields used in alarm events.
    pub fn summary(&self) -> MedicationSummary {
        MedicationSummary {
            name: self.name.clone(),
            quantity: self.quantity.clone(),
            image: self.image.clone(),
        }
    }

    /// Check fields a user can get wrong when creating or editing a record.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.id.as_str().trim().is_empty() {
            return Err(StoreError::InvalidRecord("id must not be empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(StoreError::InvalidRecord(
                "name must not be empty".to_string(),
            ));
        }
        if let Some(offset) = self
            .pre_reminder_offsets
            .iter()
            .find(|offset| !ALLOWED_PRE_REMINDER_OFFSETS.contains(offset))
        {
            return Err(StoreError::InvalidRecord(format!(
                "pre-reminder offset {offset} is not one of {ALLOWED_PRE_REMINDER_OFFSETS:?}"
            )));
        }
        if self.history.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(StoreError::InvalidRecord(
                "history must be in chronological order".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serde adapter for a list of instants stored as epoch milliseconds.
mod millis_list {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(values: &[DateTime<Utc>], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&value.timestamp_millis())?;
        }
        seq.end()
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Vec::<i64>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|millis| {
                DateTime::from_timestamp_millis(millis)
                    .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {millis}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::MedicationRecord;
    use chrono::{DateTime, Duration, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).expect("timestamp")
    }

    #[test]
    fn serializes_instants_as_epoch_millis() {
        let mut record = MedicationRecord::new("Aspirin", "1 pill", at(1_000), 30)
            .with_pre_reminders([5, 1]);
        record.id = "med-1".into();
        record.history = vec![at(2_000), at(3_000)];

        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(
            value,
            json!({
                "id": "med-1",
                "name": "Aspirin",
                "quantity": "1 pill",
                "startTime": 1000,
                "intervalMinutes": 30,
                "preReminderOffsets": [1, 5],
                "history": [2000, 3000],
                "image": null
            })
        );
    }

    #[test]
    fn acknowledgement_keeps_history_sorted() {
        let start = at(0);
        let mut record = MedicationRecord::new("Aspirin", "1 pill", start, 60);
        record.record_acknowledgement(start + Duration::minutes(10));
        record.record_acknowledgement(start + Duration::minutes(5));
        record.record_acknowledgement(start + Duration::minutes(20));
        assert_eq!(
            record.history,
            vec![
                start + Duration::minutes(5),
                start + Duration::minutes(10),
                start + Duration::minutes(20),
            ]
        );
        assert_eq!(record.last_acknowledged(), Some(start + Duration::minutes(20)));

        record.trim_history(2);
        assert_eq!(record.history.len(), 2);
        assert_eq!(record.history[0], start + Duration::minutes(10));
    }

    #[test]
    fn validate_rejects_unknown_offsets_and_blank_names() {
        let record = MedicationRecord::new("Aspirin", "1 pill", at(0), 60).with_pre_reminders([2]);
        let err = record.validate().unwrap_err();
        assert!(err.to_string().contains("pre-reminder offset 2"));

        let record = MedicationRecord::new("  ", "1 pill", at(0), 60);
        assert!(record.validate().is_err());

        let record = MedicationRecord::new("Aspirin", "1 pill", at(0), 0).with_pre_reminders([1, 3, 5]);
        assert!(record.validate().is_ok());
    }
}
