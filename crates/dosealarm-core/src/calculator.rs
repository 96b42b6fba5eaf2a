//! Due-time computation for medication records.
//!
//! The next due instant is always re-derived from the record's start time,
//! interval and acknowledgement history; it is never stored. Every function
//! here is pure and total: out-of-range arithmetic saturates instead of
//! panicking.
//!
//! A first dose that was never acknowledged and is more than `grace` overdue
//! is skipped, the same way any other missed slot is.

use chrono::{DateTime, Duration, Utc};
use dosealarm_store::MedicationRecord;

/// Next instant the record's primary alarm is due.
///
/// One-shot records are always due at their start time. Recurring records are
/// due one interval after the latest acknowledgement (or at the start time
/// when nothing was acknowledged yet); a slot more than `grace` in the past is
/// fast-forwarded to the first slot strictly after `now`.
pub fn next_due(record: &MedicationRecord, now: DateTime<Utc>, grace: Duration) -> DateTime<Utc> {
    let start = record.start_time;
    if record.is_one_shot() {
        return start;
    }
    let interval = interval_of(record);
    let (base, candidate) = match record.last_acknowledged() {
        Some(last) => (last, add(last, interval)),
        None => (start, start),
    };
    let candidate = candidate.max(start);
    if candidate >= sub(now, grace) {
        return candidate;
    }

    let interval_ms = interval.num_milliseconds();
    let elapsed_ms = now.signed_duration_since(base).num_milliseconds().max(0);
    let steps = elapsed_ms / interval_ms + 1;
    let skipped = steps
        .checked_mul(interval_ms)
        .and_then(Duration::try_milliseconds)
        .map(|offset| add(base, offset))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    skipped.max(start)
}

/// Due instant whose firing window `(now - grace, ..]` is open or still ahead.
///
/// Differs from [`next_due`] only when a later slot already lies inside the
/// window; polling loops use it so that every slot gets a chance to fire.
pub fn firing_due(record: &MedicationRecord, now: DateTime<Utc>, grace: Duration) -> DateTime<Utc> {
    next_due(record, sub(now, grace), Duration::zero())
}

/// Whether the cycle due at `due` was already settled by an acknowledgement.
pub fn cycle_acknowledged(record: &MedicationRecord, due: DateTime<Utc>) -> bool {
    if record.is_one_shot() {
        return !record.history.is_empty();
    }
    record.last_acknowledged().is_some_and(|last| last >= due)
}

fn interval_of(record: &MedicationRecord) -> Duration {
    Duration::minutes(i64::from(record.interval_minutes))
}

/// `at + by`, saturating at the representable bounds.
pub(crate) fn add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(if by < Duration::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// `at - by`, saturating at the representable bounds.
pub(crate) fn sub(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(by).unwrap_or(if by < Duration::zero() {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    })
}
