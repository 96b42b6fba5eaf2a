//! Record store wrapper whose writes can be switched to fail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dosealarm_protocol::RecordId;
use dosealarm_store::{MedicationRecord, MemoryRecordStore, RecordStore, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory store whose writes can be switched to fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryRecordStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn with_records(records: impl IntoIterator<Item = MedicationRecord>) -> Self {
        Self {
            inner: MemoryRecordStore::with_records(records),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("writes disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn put(&self, record: MedicationRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        self.inner.put(record).await
    }

    async fn get(&self, id: &RecordId) -> Result<Option<MedicationRecord>, StoreError> {
        self.inner.get(id).await
    }

    async fn get_all(&self) -> Result<Vec<MedicationRecord>, StoreError> {
        self.inner.get_all().await
    }

    async fn delete(&self, id: &RecordId) -> Result<bool, StoreError> {
        self.check_writable()?;
        self.inner.delete(id).await
    }

    async fn set_history(
        &self,
        id: &RecordId,
        history: Vec<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        self.inner.set_history(id, history).await
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        self.check_writable()?;
        self.inner.clear().await
    }
}
