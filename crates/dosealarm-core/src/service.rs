//! Alarm service: scheduler plus the store, sink and clock it works against.

use crate::calculator;
use crate::clock::Clock;
use crate::error::CoreError;
use crate::scheduler::{Postponement, Scheduler, SchedulerPolicy, SchedulerState};
use chrono::{DateTime, Utc};
use dosealarm_protocol::{AlarmEvent, AlarmKind, MedicationSummary, NotificationSink, RecordId};
use dosealarm_store::{MedicationRecord, RecordStore};
use log::{debug, info, warn};
use std::sync::Arc;

/// Record id carried by test alarms.
pub const TEST_ALARM_ID: &str = "test-alarm";

/// Next dose of a record, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpcomingDose {
    pub record: MedicationRecord,
    /// Next due instant.
    pub due: DateTime<Utc>,
    /// One-shot record that was already taken.
    pub settled: bool,
}

/// Owns the scheduler state and applies user actions to the store.
pub struct AlarmService {
    store: Arc<dyn RecordStore>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    scheduler: Scheduler,
}

impl AlarmService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        policy: SchedulerPolicy,
    ) -> Self {
        Self {
            store,
            sink,
            clock,
            scheduler: Scheduler::new(policy),
        }
    }

    pub fn policy(&self) -> &SchedulerPolicy {
        self.scheduler.policy()
    }

    /// Ephemeral scheduler state, mostly useful for inspection in tests.
    pub fn state(&self) -> &SchedulerState {
        self.scheduler.state()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run one scheduler pass and deliver what fired. Returns the number of events.
    pub async fn tick(&mut self) -> Result<usize, CoreError> {
        let records = self.store.get_all().await?;
        let now = self.clock.now();
        let events = self.scheduler.tick(&records, now);
        Ok(self.deliver(events))
    }

    /// Re-emit alarms still waiting for the user. Returns the number of events.
    pub async fn repeat_active(&mut self) -> Result<usize, CoreError> {
        if self.scheduler.state().active_count() == 0 {
            return Ok(0);
        }
        let records = self.store.get_all().await?;
        let now = self.clock.now();
        let events = self.scheduler.repeat_active(&records, now);
        Ok(self.deliver(events))
    }

    /// Record a dose taken now.
    ///
    /// History is persisted first; scheduler state is only cleared once the
    /// write succeeded, so a failed write keeps the alarm ringing.
    pub async fn acknowledge(&mut self, id: &RecordId) -> Result<MedicationRecord, CoreError> {
        let now = self.clock.now();
        let record = self
            .store
            .append_history(id, now)
            .await
            .map_err(CoreError::from_store)?;
        self.scheduler.acknowledged(id);
        info!(
            "dose acknowledged (record={}, at={}, next_due={})",
            id,
            now,
            self.scheduler.next_due(&record, now)
        );
        Ok(record)
    }

    /// Snooze the record's current cycle without touching its history.
    pub async fn postpone(
        &mut self,
        id: &RecordId,
        minutes: u32,
    ) -> Result<Postponement, CoreError> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| CoreError::UnknownRecord(id.clone()))?;
        let now = self.clock.now();
        self.scheduler.postpone(&record, minutes, now)
    }

    /// Add a new record.
    pub async fn register(&mut self, record: MedicationRecord) -> Result<(), CoreError> {
        let id = record.id.clone();
        self.store.put(record).await?;
        self.scheduler.forget(&id);
        info!("record registered (record={})", id);
        Ok(())
    }

    /// Replace an existing record; its alarms re-arm from the new fields.
    pub async fn update(&mut self, record: MedicationRecord) -> Result<(), CoreError> {
        if self.store.get(&record.id).await?.is_none() {
            return Err(CoreError::UnknownRecord(record.id));
        }
        let id = record.id.clone();
        self.store.put(record).await?;
        self.scheduler.forget(&id);
        info!("record updated (record={})", id);
        Ok(())
    }

    /// Delete a record and stop its alarms. Returns whether it existed.
    pub async fn delete(&mut self, id: &RecordId) -> Result<bool, CoreError> {
        let removed = self.store.delete(id).await?;
        self.scheduler.forget(id);
        Ok(removed)
    }

    /// Delete every record. Returns how many were removed.
    pub async fn clear_all(&mut self) -> Result<usize, CoreError> {
        let removed = self.store.clear().await?;
        self.scheduler.reset();
        info!("all records cleared (removed={})", removed);
        Ok(removed)
    }

    /// Next dose of every record, soonest first.
    pub async fn upcoming(&self) -> Result<Vec<UpcomingDose>, CoreError> {
        let now = self.clock.now();
        let mut doses: Vec<UpcomingDose> = self
            .store
            .get_all()
            .await?
            .into_iter()
            .map(|record| {
                let due = self.scheduler.next_due(&record, now);
                let settled = calculator::cycle_acknowledged(&record, due);
                UpcomingDose {
                    record,
                    due,
                    settled,
                }
            })
            .collect();
        doses.sort_by(|a, b| a.settled.cmp(&b.settled).then(a.due.cmp(&b.due)));
        Ok(doses)
    }

    /// Fire a test alarm immediately, bypassing the schedule.
    pub fn test_alarm(&self, medication: MedicationSummary) -> AlarmEvent {
        let now = self.clock.now();
        let event = AlarmEvent::new(
            RecordId::new(TEST_ALARM_ID),
            AlarmKind::Test,
            now,
            now,
            medication,
        );
        self.sink.fire(event.clone());
        event
    }

    fn deliver(&self, events: Vec<AlarmEvent>) -> usize {
        let count = events.len();
        for event in events {
            debug!(
                "delivering alarm event (record={}, kind={:?})",
                event.record_id, event.kind
            );
            self.sink.fire(event);
        }
        if count > 0 {
            debug!("alarm events delivered (count={})", count);
        }
        count
    }
}

impl std::fmt::Debug for AlarmService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmService")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

/// Log and swallow a service error from a background pass.
pub(crate) fn log_pass_error(pass: &str, result: Result<usize, CoreError>) {
    if let Err(err) = result {
        warn!("alarm pass failed (pass={}, err={})", pass, err);
    }
}
