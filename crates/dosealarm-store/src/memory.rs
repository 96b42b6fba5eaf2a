//! Volatile record store used by tests and throwaway sessions.

use crate::error::StoreError;
use crate::model::MedicationRecord;
use crate::provider::{RecordStore, upsert};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dosealarm_protocol::RecordId;
use parking_lot::Mutex;

/// Store that keeps records in memory only.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<MedicationRecord>>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with records.
    pub fn with_records(records: impl IntoIterator<Item = MedicationRecord>) -> Self {
        let mut seeded = Vec::new();
        for record in records {
            upsert(&mut seeded, record);
        }
        Self {
            records: Mutex::new(seeded),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(&self, record: MedicationRecord) -> Result<(), StoreError> {
        record.validate()?;
        upsert(&mut self.records.lock(), record);
        Ok(())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<MedicationRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .iter()
            .find(|record| &record.id == id)
            .cloned())
    }

    async fn get_all(&self) -> Result<Vec<MedicationRecord>, StoreError> {
        Ok(self.records.lock().clone())
    }

    async fn delete(&self, id: &RecordId) -> Result<bool, StoreError> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|record| &record.id != id);
        Ok(records.len() != before)
    }

    async fn set_history(
        &self,
        id: &RecordId,
        mut history: Vec<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        history.sort();
        let mut records = self.records.lock();
        let record = records
            .iter_mut()
            .find(|record| &record.id == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.history = history;
        Ok(())
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let mut records = self.records.lock();
        let count = records.len();
        records.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryRecordStore;
    use crate::{MedicationRecord, RecordStore, StoreError};
    use chrono::{DateTime, Duration, Utc};
    use pretty_assertions::assert_eq;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(0).expect("timestamp")
    }

    #[tokio::test]
    async fn append_history_uses_default_implementation() {
        let record = MedicationRecord::new("Aspirin", "1 pill", start(), 60);
        let store = MemoryRecordStore::with_records([record.clone()]);

        let late = start() + Duration::minutes(70);
        let early = start() + Duration::minutes(5);
        store.append_history(&record.id, late).await.expect("append late");
        let updated = store.append_history(&record.id, early).await.expect("append early");
        assert_eq!(updated.history, vec![early, late]);

        let err = store
            .append_history(&"missing".into(), late)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_and_clear_report_what_was_removed() {
        let a = MedicationRecord::new("A", "1", start(), 0);
        let b = MedicationRecord::new("B", "1", start(), 0);
        let store = MemoryRecordStore::with_records([a.clone(), b]);
        assert!(store.delete(&a.id).await.expect("delete"));
        assert!(!store.delete(&a.id).await.expect("delete twice"));
        assert_eq!(store.clear().await.expect("clear"), 1);
        assert_eq!(store.get_all().await.expect("all"), Vec::new());
    }
}
