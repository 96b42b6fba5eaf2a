//! Alarm scheduling state machine.
//!
//! [`Scheduler`] turns records and the current instant into alarm events. It
//! owns the process-local [`SchedulerState`]: which due instant each channel
//! already fired for, pending postponements, and alarms still waiting for the
//! user. The state is rebuilt from nothing on restart; persisted history is the
//! only durable input.

use crate::calculator::{self, add, sub};
use crate::error::CoreError;
use chrono::{DateTime, Duration, Utc};
use dosealarm_config::SchedulerConfig;
use dosealarm_protocol::{AlarmEvent, AlarmKind, RecordId};
use dosealarm_store::MedicationRecord;
use log::{debug, info};
use std::collections::{HashMap, HashSet};

/// Notification channel of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// The due alarm itself.
    Primary,
    /// Pre-reminder fired this many minutes before the due instant.
    Reminder(u32),
}

/// A snoozed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Postponement {
    /// Due instant of the cycle that was postponed.
    pub cycle_due: DateTime<Utc>,
    /// Instant the postponed alarm fires.
    pub until: DateTime<Utc>,
}

/// A fired primary alarm the user has not dealt with yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveAlarm {
    /// Instant the alarm fired for; the postponed instant for snoozed cycles.
    pub due: DateTime<Utc>,
    /// Due instant of the underlying cycle.
    pub cycle_due: DateTime<Utc>,
    /// Last time the alarm was emitted.
    pub last_asserted: DateTime<Utc>,
    /// Number of repeat events emitted so far.
    pub repeats: u32,
}

/// Ephemeral per-record scheduling state.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerState {
    markers: HashMap<(RecordId, Channel), DateTime<Utc>>,
    postponements: HashMap<RecordId, Postponement>,
    active: HashMap<RecordId, ActiveAlarm>,
}

impl SchedulerState {
    /// Due instant the channel last fired for.
    pub fn marker(&self, id: &RecordId, channel: Channel) -> Option<DateTime<Utc>> {
        self.markers.get(&(id.clone(), channel)).copied()
    }

    pub fn postponement(&self, id: &RecordId) -> Option<Postponement> {
        self.postponements.get(id).copied()
    }

    pub fn active(&self, id: &RecordId) -> Option<ActiveAlarm> {
        self.active.get(id).copied()
    }

    /// Number of alarms waiting for acknowledgement.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Whether nothing is tracked at all.
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty() && self.postponements.is_empty() && self.active.is_empty()
    }

    fn set_marker(&mut self, id: &RecordId, channel: Channel, due: DateTime<Utc>) {
        self.markers.insert((id.clone(), channel), due);
    }

    fn activate(&mut self, id: &RecordId, due: DateTime<Utc>, cycle_due: DateTime<Utc>, now: DateTime<Utc>) {
        self.active.insert(
            id.clone(),
            ActiveAlarm {
                due,
                cycle_due,
                last_asserted: now,
                repeats: 0,
            },
        );
    }

    /// Drop everything tracked for a record.
    fn clear_record(&mut self, id: &RecordId) {
        self.markers.retain(|(marker_id, _), _| marker_id != id);
        self.postponements.remove(id);
        self.active.remove(id);
    }

    /// Keep state only for records in `ids`.
    fn retain_records(&mut self, ids: &HashSet<&RecordId>) {
        self.markers.retain(|(id, _), _| ids.contains(id));
        self.postponements.retain(|id, _| ids.contains(id));
        self.active.retain(|id, _| ids.contains(id));
    }
}

/// Cadence and tolerance windows used by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerPolicy {
    /// How late a primary alarm may fire; also the calculator's grace.
    pub grace: Duration,
    /// How early any alarm may fire.
    pub future_tolerance: Duration,
    /// How late a pre-reminder may fire.
    pub reminder_tolerance: Duration,
    /// Cadence of repeat events for active alarms.
    pub repeat_interval: Duration,
    /// Cadence of scheduler passes.
    pub poll_interval: std::time::Duration,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

impl SchedulerPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            grace: seconds(config.grace_minutes.saturating_mul(60)),
            future_tolerance: seconds(config.future_tolerance_secs),
            reminder_tolerance: seconds(config.reminder_tolerance_secs),
            repeat_interval: seconds(config.repeat_interval_secs),
            poll_interval: std::time::Duration::from_secs(config.poll_interval_secs),
        }
    }
}

fn seconds(value: u64) -> Duration {
    Duration::try_seconds(i64::try_from(value).unwrap_or(i64::MAX)).unwrap_or(Duration::MAX)
}

/// Decides which alarms fire on each pass.
#[derive(Debug, Default, Clone)]
pub struct Scheduler {
    policy: SchedulerPolicy,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(policy: SchedulerPolicy) -> Self {
        Self {
            policy,
            state: SchedulerState::default(),
        }
    }

    pub fn policy(&self) -> &SchedulerPolicy {
        &self.policy
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Next due instant of a record under this scheduler's grace window.
    pub fn next_due(&self, record: &MedicationRecord, now: DateTime<Utc>) -> DateTime<Utc> {
        calculator::next_due(record, now, self.policy.grace)
    }

    /// Run one pass over every record, pruning state of records that are gone.
    pub fn tick(&mut self, records: &[MedicationRecord], now: DateTime<Utc>) -> Vec<AlarmEvent> {
        let ids: HashSet<&RecordId> = records.iter().map(|record| &record.id).collect();
        self.state.retain_records(&ids);
        let events: Vec<AlarmEvent> = records
            .iter()
            .flat_map(|record| self.evaluate(record, now))
            .collect();
        debug!(
            "scheduler pass complete (records={}, fired={}, active={})",
            records.len(),
            events.len(),
            self.state.active_count()
        );
        events
    }

    /// Decide what fires for a single record at `now`.
    ///
    /// Within one call the primary channel and the pre-reminders are mutually
    /// exclusive, and each channel fires at most once per due instant.
    pub fn evaluate(&mut self, record: &MedicationRecord, now: DateTime<Utc>) -> Vec<AlarmEvent> {
        let due = calculator::firing_due(record, now, self.policy.grace);
        if calculator::cycle_acknowledged(record, due) {
            return Vec::new();
        }
        let earliest = sub(now, self.policy.grace);
        let latest = add(now, self.policy.future_tolerance);

        if let Some(postponement) = self.state.postponement(&record.id) {
            if postponement.until > latest {
                return Vec::new();
            }
            self.state.postponements.remove(&record.id);
            if postponement.until > earliest {
                let marker = if due <= postponement.until {
                    due
                } else {
                    postponement.cycle_due
                };
                self.state.set_marker(&record.id, Channel::Primary, marker);
                self.state
                    .activate(&record.id, postponement.until, postponement.cycle_due, now);
                info!(
                    "postponed alarm fired (record={}, until={})",
                    record.id, postponement.until
                );
                return vec![self.event(record, AlarmKind::Primary, postponement.until, now)];
            }
            debug!(
                "postponed alarm missed; resuming schedule (record={}, until={})",
                record.id, postponement.until
            );
        }

        if self.state.marker(&record.id, Channel::Primary) == Some(due) {
            return Vec::new();
        }
        if due > earliest && due <= latest {
            self.state.set_marker(&record.id, Channel::Primary, due);
            self.state.activate(&record.id, due, due, now);
            info!("primary alarm fired (record={}, due={})", record.id, due);
            return vec![self.event(record, AlarmKind::Primary, due, now)];
        }

        let reminder_earliest = sub(now, self.policy.reminder_tolerance);
        let mut events = Vec::new();
        for &offset in &record.pre_reminder_offsets {
            let at = sub(due, Duration::minutes(i64::from(offset)));
            if at <= reminder_earliest || at > latest {
                continue;
            }
            let channel = Channel::Reminder(offset);
            if self.state.marker(&record.id, channel) == Some(due) {
                continue;
            }
            self.state.set_marker(&record.id, channel, due);
            info!(
                "pre-reminder fired (record={}, offset_minutes={}, due={})",
                record.id, offset, due
            );
            events.push(self.event(record, AlarmKind::Reminder { offset_minutes: offset }, due, now));
        }
        events
    }

    /// Re-emit active alarms whose repeat interval elapsed.
    ///
    /// Alarms whose record disappeared or whose cycle got acknowledged are
    /// dropped instead.
    pub fn repeat_active(&mut self, records: &[MedicationRecord], now: DateTime<Utc>) -> Vec<AlarmEvent> {
        let repeat_interval = self.policy.repeat_interval;
        let mut events = Vec::new();
        let mut live = HashSet::new();
        for record in records {
            let Some(alarm) = self.state.active.get_mut(&record.id) else {
                continue;
            };
            if calculator::cycle_acknowledged(record, alarm.due) {
                continue;
            }
            live.insert(record.id.clone());
            if now.signed_duration_since(alarm.last_asserted) < repeat_interval {
                continue;
            }
            alarm.last_asserted = now;
            alarm.repeats = alarm.repeats.saturating_add(1);
            debug!(
                "repeating active alarm (record={}, due={}, repeats={})",
                record.id, alarm.due, alarm.repeats
            );
            let due = alarm.due;
            events.push(AlarmEvent::new(
                record.id.clone(),
                AlarmKind::Repeat,
                due,
                now,
                record.summary(),
            ));
        }
        self.state.active.retain(|id, _| live.contains(id));
        events
    }

    /// Snooze a record's current cycle by `minutes`.
    ///
    /// The cycle is the active alarm's if one is ringing, otherwise the
    /// upcoming due instant. The alarm fires again at
    /// `max(cycle due, now) + minutes`; pre-reminders stay quiet until then.
    pub fn postpone(
        &mut self,
        record: &MedicationRecord,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<Postponement, CoreError> {
        if minutes == 0 {
            return Err(CoreError::InvalidPostpone(
                "postpone duration must be at least one minute".to_string(),
            ));
        }
        let (anchor, cycle_due) = match self.state.active(&record.id) {
            Some(alarm) => (alarm.due, alarm.cycle_due),
            None => {
                let due = calculator::firing_due(record, now, self.policy.grace);
                (due, due)
            }
        };
        let until = add(anchor.max(now), Duration::minutes(i64::from(minutes)));
        let postponement = Postponement { cycle_due, until };
        self.state.set_marker(&record.id, Channel::Primary, cycle_due);
        self.state.active.remove(&record.id);
        self.state.postponements.insert(record.id.clone(), postponement);
        info!(
            "alarm postponed (record={}, cycle_due={}, until={})",
            record.id, cycle_due, until
        );
        Ok(postponement)
    }

    /// Clear state after the record's dose was acknowledged.
    pub fn acknowledged(&mut self, id: &RecordId) {
        self.state.clear_record(id);
    }

    /// Clear state of a record that was deleted or edited.
    pub fn forget(&mut self, id: &RecordId) {
        self.state.clear_record(id);
    }

    /// Drop all state.
    pub fn reset(&mut self) {
        self.state = SchedulerState::default();
    }

    fn event(
        &self,
        record: &MedicationRecord,
        kind: AlarmKind,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AlarmEvent {
        AlarmEvent::new(record.id.clone(), kind, due, now, record.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::{Channel, Scheduler, SchedulerPolicy};
    use crate::error::CoreError;
    use chrono::{DateTime, Duration, Utc};
    use dosealarm_protocol::{AlarmEvent, AlarmKind};
    use dosealarm_store::MedicationRecord;
    use pretty_assertions::assert_eq;

    fn t() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).expect("timestamp")
    }

    fn minutes(value: i64) -> Duration {
        Duration::minutes(value)
    }

    fn secs(value: i64) -> Duration {
        Duration::seconds(value)
    }

    fn kinds(events: &[AlarmEvent]) -> Vec<AlarmKind> {
        events.iter().map(|event| event.kind).collect()
    }

    fn hourly() -> MedicationRecord {
        MedicationRecord::new("Aspirin", "1 pill", t(), 60)
    }

    #[test]
    fn primary_fires_once_across_many_ticks() {
        let records = vec![hourly()];
        let mut scheduler = Scheduler::default();
        let mut fired = Vec::new();
        for tick in 0..100 {
            fired.extend(scheduler.tick(&records, t() + secs(tick * 10)));
        }
        // Ticks span t .. t+990s; the first alarm belongs to t, and the next
        // slot (t+60min) is out of reach.
        assert_eq!(kinds(&fired), vec![AlarmKind::Primary]);
        assert_eq!(fired[0].due, t());
        assert_eq!(
            scheduler.state().marker(&records[0].id, Channel::Primary),
            Some(t())
        );
    }

    #[test]
    fn early_primary_waits_for_future_tolerance() {
        let records = vec![hourly()];
        let mut scheduler = Scheduler::default();
        assert_eq!(scheduler.tick(&records, t() - secs(1)), Vec::new());
        assert_eq!(kinds(&scheduler.tick(&records, t())), vec![AlarmKind::Primary]);

        let mut tolerant = Scheduler::new(SchedulerPolicy {
            future_tolerance: secs(5),
            ..SchedulerPolicy::default()
        });
        assert_eq!(kinds(&tolerant.tick(&records, t() - secs(5))), vec![AlarmKind::Primary]);
    }

    #[test]
    fn late_primary_beyond_grace_is_skipped() {
        let records = vec![hourly()];
        let mut scheduler = Scheduler::default();
        assert_eq!(scheduler.tick(&records, t() + minutes(11)), Vec::new());
        // The skipped slot leaves the next one armed.
        let fired = scheduler.tick(&records, t() + minutes(60));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].due, t() + minutes(60));
    }

    #[test]
    fn reminders_fire_once_each_before_primary() {
        let record = hourly().with_pre_reminders([1, 5]);
        let records = vec![record.clone()];
        let mut scheduler = Scheduler::default();

        let mut fired = Vec::new();
        let mut now = t() - minutes(6);
        while now <= t() + minutes(2) {
            for event in scheduler.tick(&records, now) {
                fired.push((now, event.kind));
            }
            now += secs(10);
        }
        assert_eq!(
            fired,
            vec![
                (t() - minutes(5), AlarmKind::Reminder { offset_minutes: 5 }),
                (t() - minutes(1), AlarmKind::Reminder { offset_minutes: 1 }),
                (t(), AlarmKind::Primary),
            ]
        );
    }

    #[test]
    fn late_reminder_outside_tolerance_is_not_fired() {
        let records = vec![hourly().with_pre_reminders([5])];
        let mut scheduler = Scheduler::default();
        // Reminder instant t-5min is 61s in the past.
        assert_eq!(scheduler.tick(&records, t() - minutes(5) + secs(61)), Vec::new());
        assert_eq!(
            kinds(&scheduler.tick(&records, t() - minutes(5) + secs(59))),
            vec![AlarmKind::Reminder { offset_minutes: 5 }]
        );
    }

    #[test]
    fn primary_and_reminder_are_exclusive_on_one_tick() {
        // With a wide future tolerance both the reminder and the primary are
        // in range at once; only the primary fires and the reminder is dropped.
        let records = vec![hourly().with_pre_reminders([1])];
        let mut scheduler = Scheduler::new(SchedulerPolicy {
            future_tolerance: minutes(2),
            ..SchedulerPolicy::default()
        });
        assert_eq!(kinds(&scheduler.tick(&records, t() - minutes(1))), vec![AlarmKind::Primary]);
        assert_eq!(scheduler.tick(&records, t() - minutes(1) + secs(10)), Vec::new());
    }

    #[test]
    fn acknowledgement_rearms_next_cycle() {
        let mut record = hourly().with_pre_reminders([5]);
        let mut scheduler = Scheduler::default();
        assert_eq!(scheduler.tick(std::slice::from_ref(&record), t()).len(), 1);

        record.record_acknowledgement(t() + minutes(2));
        scheduler.acknowledged(&record.id);
        assert!(scheduler.state().is_empty());

        let records = vec![record];
        assert_eq!(scheduler.tick(&records, t() + minutes(3)), Vec::new());
        assert_eq!(
            kinds(&scheduler.tick(&records, t() + minutes(57))),
            vec![AlarmKind::Reminder { offset_minutes: 5 }]
        );
        let fired = scheduler.tick(&records, t() + minutes(62));
        assert_eq!(kinds(&fired), vec![AlarmKind::Primary]);
        assert_eq!(fired[0].due, t() + minutes(62));
    }

    #[test]
    fn postponed_alarm_fires_once_at_postponed_instant() {
        let records = vec![hourly().with_pre_reminders([5])];
        let id = records[0].id.clone();
        let mut scheduler = Scheduler::default();
        assert_eq!(scheduler.tick(&records, t()).len(), 1);

        let postponement = scheduler.postpone(&records[0], 30, t()).expect("postpone");
        assert_eq!(postponement.until, t() + minutes(30));
        assert_eq!(postponement.cycle_due, t());
        assert_eq!(scheduler.state().active(&id), None);

        let mut fired = Vec::new();
        let mut now = t() + secs(10);
        while now <= t() + minutes(40) {
            for event in scheduler.tick(&records, now) {
                fired.push((now, event.kind, event.due));
            }
            now += secs(10);
        }
        assert_eq!(
            fired,
            vec![(t() + minutes(30), AlarmKind::Primary, t() + minutes(30))]
        );
        assert_eq!(scheduler.state().postponement(&id), None);
        assert_eq!(
            scheduler.state().active(&id).map(|alarm| alarm.due),
            Some(t() + minutes(30))
        );
    }

    #[test]
    fn postponing_before_due_suppresses_reminders_and_primary() {
        let records = vec![hourly().with_pre_reminders([1, 3])];
        let mut scheduler = Scheduler::default();
        let postponement = scheduler
            .postpone(&records[0], 10, t() - minutes(20))
            .expect("postpone");
        assert_eq!(postponement.until, t() + minutes(10));

        let mut fired = Vec::new();
        let mut now = t() - minutes(20);
        while now <= t() + minutes(15) {
            for event in scheduler.tick(&records, now) {
                fired.push((now, event.kind));
            }
            now += secs(10);
        }
        assert_eq!(fired, vec![(t() + minutes(10), AlarmKind::Primary)]);
    }

    #[test]
    fn missed_postponement_resumes_normal_schedule() {
        let records = vec![hourly()];
        let mut scheduler = Scheduler::default();
        scheduler.tick(&records, t());
        scheduler.postpone(&records[0], 5, t()).expect("postpone");

        // Process was not polled until long after the postponed instant.
        assert_eq!(scheduler.tick(&records, t() + minutes(30)), Vec::new());
        assert_eq!(scheduler.state().postponement(&records[0].id), None);
        let fired = scheduler.tick(&records, t() + minutes(60));
        assert_eq!(kinds(&fired), vec![AlarmKind::Primary]);
    }

    #[test]
    fn zero_minute_postpone_is_rejected() {
        let record = hourly();
        let mut scheduler = Scheduler::default();
        let err = scheduler.postpone(&record, 0, t()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPostpone(_)));
        assert!(scheduler.state().is_empty());
    }

    #[test]
    fn active_alarm_repeats_until_acknowledged() {
        let records = vec![hourly()];
        let id = records[0].id.clone();
        let mut scheduler = Scheduler::default();
        scheduler.tick(&records, t());

        assert_eq!(scheduler.repeat_active(&records, t() + secs(5)), Vec::new());
        let repeated = scheduler.repeat_active(&records, t() + secs(10));
        assert_eq!(kinds(&repeated), vec![AlarmKind::Repeat]);
        assert_eq!(repeated[0].due, t());
        assert_eq!(scheduler.repeat_active(&records, t() + secs(15)), Vec::new());
        assert_eq!(scheduler.repeat_active(&records, t() + secs(20)).len(), 1);
        assert_eq!(scheduler.state().active(&id).map(|alarm| alarm.repeats), Some(2));

        scheduler.acknowledged(&id);
        assert_eq!(scheduler.repeat_active(&records, t() + secs(60)), Vec::new());
    }

    #[test]
    fn repeat_drops_alarms_for_missing_or_settled_records() {
        let one_shot = MedicationRecord::new("Vitamin D", "1 drop", t(), 0);
        let other = hourly();
        let mut scheduler = Scheduler::default();
        let records = vec![one_shot.clone(), other.clone()];
        assert_eq!(scheduler.tick(&records, t()).len(), 2);

        let mut settled = one_shot;
        settled.record_acknowledgement(t() + secs(5));
        let repeated = scheduler.repeat_active(&[settled], t() + minutes(1));
        assert_eq!(repeated, Vec::new());
        assert_eq!(scheduler.state().active_count(), 0);
    }

    #[test]
    fn deleted_records_are_pruned_on_tick() {
        let keep = hourly();
        let gone = hourly();
        let mut scheduler = Scheduler::default();
        scheduler.tick(&[keep.clone(), gone.clone()], t());
        assert_eq!(scheduler.state().active_count(), 2);

        scheduler.tick(std::slice::from_ref(&keep), t() + secs(10));
        assert_eq!(scheduler.state().active(&gone.id), None);
        assert_eq!(scheduler.state().marker(&gone.id, Channel::Primary), None);
        assert_eq!(scheduler.state().marker(&keep.id, Channel::Primary), Some(t()));
    }

    #[test]
    fn one_shot_fires_once_and_never_after_acknowledgement() {
        let mut record = MedicationRecord::new("Antibiotic", "1 capsule", t(), 0);
        let mut scheduler = Scheduler::default();
        assert_eq!(scheduler.tick(std::slice::from_ref(&record), t()).len(), 1);
        record.record_acknowledgement(t() + secs(30));
        scheduler.acknowledged(&record.id);
        for tick in 0..10 {
            assert_eq!(
                scheduler.tick(std::slice::from_ref(&record), t() + secs(40 + tick * 10)),
                Vec::new()
            );
        }
    }
}
