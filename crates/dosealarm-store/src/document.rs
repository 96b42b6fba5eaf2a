//! Versioned record documents and tolerant decoding of older schemas.
//!
//! Version 1 is the bare JSON array written by the first releases (`qty`,
//! `start`, `img`, `reminders`, ISO-8601 history). Version 2 wraps the records
//! in `{"version": 2, "records": [...]}` with epoch-millisecond instants.
//! Decoding never fails on a single bad record: problems are normalized to safe
//! defaults and collected in a [`LoadReport`].

use crate::error::StoreError;
use crate::model::{ALLOWED_PRE_REMINDER_OFFSETS, MedicationRecord};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use dosealarm_protocol::RecordId;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Schema version written by this release.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Naive local formats accepted for instants.
const LOCAL_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
];

/// A problem found while decoding one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadIssue {
    /// Position of the record in the document.
    pub index: usize,
    /// Record id when it could be determined.
    pub record_id: Option<RecordId>,
    /// Human readable description.
    pub message: String,
}

impl fmt::Display for LoadIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.record_id {
            Some(id) => write!(f, "record[{}] ({id}): {}", self.index, self.message),
            None => write!(f, "record[{}]: {}", self.index, self.message),
        }
    }
}

/// Outcome of loading a record document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Schema version found on disk.
    pub schema_version: u32,
    /// Whether the document must be rewritten in the current schema.
    pub migrated: bool,
    /// Records kept after normalization.
    pub loaded: usize,
    /// Records dropped because they could not be scheduled.
    pub skipped: usize,
    /// Normalization problems, one entry per fix.
    pub issues: Vec<LoadIssue>,
}

impl LoadReport {
    /// Report for a store that had nothing on disk.
    pub fn empty() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            migrated: false,
            loaded: 0,
            skipped: 0,
            issues: Vec::new(),
        }
    }
}

#[derive(Serialize)]
struct RecordDocument<'a> {
    version: u32,
    records: &'a [MedicationRecord],
}

/// Encode records in the current schema.
pub(crate) fn encode_document(records: &[MedicationRecord]) -> Result<String, StoreError> {
    let document = RecordDocument {
        version: CURRENT_SCHEMA_VERSION,
        records,
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

/// Decode a document of any supported version.
pub(crate) fn decode_document(
    value: Value,
) -> Result<(Vec<MedicationRecord>, LoadReport), StoreError> {
    let (version, items) = match value {
        Value::Array(items) => (1, items),
        Value::Object(mut map) => {
            let version = match map.get("version") {
                Some(Value::Number(number)) => number
                    .as_u64()
                    .and_then(|version| u32::try_from(version).ok())
                    .ok_or_else(|| {
                        StoreError::InvalidDocument(format!("invalid version {number}"))
                    })?,
                Some(other) => {
                    return Err(StoreError::InvalidDocument(format!(
                        "invalid version {other}"
                    )));
                }
                None => return Err(StoreError::InvalidDocument("missing version".to_string())),
            };
            if version > CURRENT_SCHEMA_VERSION {
                return Err(StoreError::UnsupportedSchema(version));
            }
            let items = match map.remove("records") {
                Some(Value::Array(items)) => items,
                Some(_) => {
                    return Err(StoreError::InvalidDocument(
                        "records must be an array".to_string(),
                    ));
                }
                None => Vec::new(),
            };
            (version, items)
        }
        _ => {
            return Err(StoreError::InvalidDocument(
                "expected an array or an object".to_string(),
            ));
        }
    };

    let mut issues = Vec::new();
    let mut records: Vec<MedicationRecord> = Vec::with_capacity(items.len());
    let mut seen = HashSet::new();
    let mut skipped = 0;
    for (index, item) in items.iter().enumerate() {
        let Some(record) = normalize_record(item, index, &mut issues) else {
            skipped += 1;
            continue;
        };
        if !seen.insert(record.id.clone()) {
            issues.push(LoadIssue {
                index,
                record_id: Some(record.id.clone()),
                message: "duplicate id, later entry replaces earlier one".to_string(),
            });
            records.retain(|existing| existing.id != record.id);
        }
        records.push(record);
    }

    let report = LoadReport {
        schema_version: version,
        migrated: version < CURRENT_SCHEMA_VERSION,
        loaded: records.len(),
        skipped,
        issues,
    };
    Ok((records, report))
}

/// Collects issues for a single record.
struct IssueSink<'a> {
    issues: &'a mut Vec<LoadIssue>,
    index: usize,
    record_id: Option<RecordId>,
}

impl IssueSink<'_> {
    fn push(&mut self, message: impl Into<String>) {
        self.issues.push(LoadIssue {
            index: self.index,
            record_id: self.record_id.clone(),
            message: message.into(),
        });
    }
}

/// Normalize a raw record into the current model, or `None` if it cannot be scheduled.
fn normalize_record(
    value: &Value,
    index: usize,
    issues: &mut Vec<LoadIssue>,
) -> Option<MedicationRecord> {
    let mut sink = IssueSink {
        issues,
        index,
        record_id: None,
    };
    let Value::Object(map) = value else {
        sink.push("record is not an object; skipped");
        return None;
    };

    let id = match field(map, &["id"]) {
        Some(Value::String(id)) if !id.trim().is_empty() => RecordId::new(id.trim()),
        Some(Value::Number(id)) => RecordId::new(id.to_string()),
        _ => {
            let id = RecordId::generate();
            sink.record_id = Some(id.clone());
            sink.push("missing id; generated a new one");
            id
        }
    };
    sink.record_id = Some(id.clone());

    let Some(start_time) = field(map, &["startTime", "start"]).and_then(instant_from_value) else {
        sink.push("missing or malformed start time; skipped");
        return None;
    };

    let name = text_field(map, &["name"]).unwrap_or_else(|| {
        sink.push("missing name");
        String::new()
    });
    let quantity = text_field(map, &["quantity", "qty"]).unwrap_or_default();
    let interval_minutes = normalize_interval(field(map, &["intervalMinutes", "interval"]), &mut sink);
    let pre_reminder_offsets =
        normalize_offsets(field(map, &["preReminderOffsets", "reminders"]), &mut sink);
    let history = normalize_history(field(map, &["history"]), &mut sink);
    let image = match field(map, &["image", "img"]) {
        Some(Value::String(image)) if !image.is_empty() => Some(image.clone()),
        _ => None,
    };

    Some(MedicationRecord {
        id,
        name,
        quantity,
        start_time,
        interval_minutes,
        pre_reminder_offsets,
        history,
        image,
    })
}

fn normalize_interval(value: Option<&Value>, sink: &mut IssueSink<'_>) -> u32 {
    let minutes = match value {
        None | Some(Value::Null) => {
            sink.push("missing interval; treated as one-shot");
            return 0;
        }
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|minutes| minutes.trunc() as i64)),
        Some(Value::String(text)) => text.trim().parse::<i64>().ok(),
        Some(_) => None,
    };
    match minutes {
        Some(minutes) if minutes < 0 => {
            sink.push(format!("negative interval {minutes}; treated as one-shot"));
            0
        }
        Some(minutes) => u32::try_from(minutes).unwrap_or_else(|_| {
            sink.push(format!("interval {minutes} out of range; clamped"));
            u32::MAX
        }),
        None => {
            sink.push("malformed interval; treated as one-shot");
            0
        }
    }
}

fn normalize_offsets(value: Option<&Value>, sink: &mut IssueSink<'_>) -> BTreeSet<u32> {
    let mut offsets = BTreeSet::new();
    let entries = match value {
        None | Some(Value::Null) => return offsets,
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            sink.push(format!("malformed pre-reminder offsets {other}; ignored"));
            return offsets;
        }
    };
    for entry in entries {
        let offset = entry
            .as_u64()
            .and_then(|offset| u32::try_from(offset).ok())
            .filter(|offset| ALLOWED_PRE_REMINDER_OFFSETS.contains(offset));
        match offset {
            Some(offset) => {
                offsets.insert(offset);
            }
            None => sink.push(format!("dropped pre-reminder offset {entry}")),
        }
    }
    offsets
}

fn normalize_history(value: Option<&Value>, sink: &mut IssueSink<'_>) -> Vec<DateTime<Utc>> {
    let entries = match value {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            sink.push(format!("malformed history {other}; reset to empty"));
            return Vec::new();
        }
    };
    let mut history = Vec::with_capacity(entries.len());
    for entry in entries {
        match instant_from_value(entry) {
            Some(instant) => history.push(instant),
            None => sink.push(format!("dropped malformed history entry {entry}")),
        }
    }
    if history.windows(2).any(|pair| pair[0] > pair[1]) {
        sink.push("history out of order; sorted");
        history.sort();
    }
    history
}

fn field<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| map.get(*name))
}

fn text_field(map: &Map<String, Value>, names: &[&str]) -> Option<String> {
    match field(map, names)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn instant_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(number) => {
            let millis = number
                .as_i64()
                .or_else(|| number.as_f64().map(|millis| millis.trunc() as i64))?;
            DateTime::from_timestamp_millis(millis)
        }
        Value::String(text) => parse_instant(text),
        _ => None,
    }
}

/// Parse an instant from RFC 3339, epoch milliseconds, or a naive local date-time.
///
/// Naive values (`2024-05-01T08:00`, `2024-05-01 08:00:30`) are read in the
/// host's local time zone.
pub fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(millis) = text.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis);
    }
    LOCAL_FORMATS.iter().find_map(|format| {
        let naive = NaiveDateTime::parse_from_str(text, format).ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).expect("timestamp")
    }

    fn local(text: &str) -> DateTime<Utc> {
        let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M").expect("naive");
        Local
            .from_local_datetime(&naive)
            .earliest()
            .expect("local")
            .with_timezone(&Utc)
    }

    #[test]
    fn legacy_array_is_migrated() {
        let legacy = json!([{
            "id": "1712345678901",
            "name": "Losartan",
            "qty": "1 tablet",
            "start": "2024-04-05T08:00",
            "intervalMinutes": 480,
            "img": "data:image/jpeg;base64,AAAA",
            "reminders": [5, 1],
            "history": ["2024-04-05T08:03:00.000Z"]
        }]);

        let (records, report) = decode_document(legacy).expect("decode");
        assert_eq!(report.schema_version, 1);
        assert!(report.migrated);
        assert_eq!(report.issues, Vec::new());
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.id, RecordId::new("1712345678901"));
        assert_eq!(record.quantity, "1 tablet");
        assert_eq!(record.start_time, local("2024-04-05T08:00"));
        assert_eq!(record.interval_minutes, 480);
        assert_eq!(record.pre_reminder_offsets, BTreeSet::from([1, 5]));
        assert_eq!(
            record.history,
            vec![parse_instant("2024-04-05T08:03:00Z").expect("instant")]
        );
        assert_eq!(record.image.as_deref(), Some("data:image/jpeg;base64,AAAA"));
    }

    #[test]
    fn partial_records_are_normalized_with_issues() {
        let document = json!({
            "version": 2,
            "records": [
                { "id": "a", "name": "A", "quantity": "1", "startTime": 1000 },
                { "id": "b", "name": "B", "quantity": "1", "startTime": 1000,
                  "intervalMinutes": -30, "preReminderOffsets": [3, 7],
                  "history": [5000, "garbage", 2000] },
                { "id": "c", "name": "C", "quantity": "1" }
            ]
        });

        let (records, report) = decode_document(document).expect("decode");
        assert!(!report.migrated);
        assert_eq!(report.loaded, 2);
        assert_eq!(report.skipped, 1);

        let a = &records[0];
        assert_eq!(a.interval_minutes, 0);
        assert_eq!(a.history, Vec::<chrono::DateTime<chrono::Utc>>::new());

        let b = &records[1];
        assert_eq!(b.interval_minutes, 0);
        assert_eq!(b.pre_reminder_offsets, BTreeSet::from([3]));
        assert_eq!(b.history, vec![at(2000), at(5000)]);

        let messages: Vec<String> = report.issues.iter().map(ToString::to_string).collect();
        assert_eq!(
            messages,
            vec![
                "record[0] (a): missing interval; treated as one-shot".to_string(),
                "record[1] (b): negative interval -30; treated as one-shot".to_string(),
                "record[1] (b): dropped pre-reminder offset 7".to_string(),
                "record[1] (b): dropped malformed history entry \"garbage\"".to_string(),
                "record[1] (b): history out of order; sorted".to_string(),
                "record[2] (c): missing or malformed start time; skipped".to_string(),
            ]
        );
    }

    #[test]
    fn newer_schema_is_rejected() {
        let err = decode_document(json!({ "version": 3, "records": [] })).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedSchema(3)));
    }

    #[test]
    fn duplicate_ids_keep_the_later_entry() {
        let document = json!({
            "version": 2,
            "records": [
                { "id": "a", "name": "old", "quantity": "1", "startTime": 0, "intervalMinutes": 10 },
                { "id": "a", "name": "new", "quantity": "1", "startTime": 0, "intervalMinutes": 10 }
            ]
        });
        let (records, report) = decode_document(document).expect("decode");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "new");
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn encoded_document_decodes_to_same_records() {
        let start = at(1_700_000_000_000);
        let mut record = MedicationRecord::new("Aspirin", "1 pill", start, 60).with_pre_reminders([5]);
        record.record_acknowledgement(start + Duration::minutes(2));

        let encoded = encode_document(std::slice::from_ref(&record)).expect("encode");
        let value: Value = serde_json::from_str(&encoded).expect("json");
        assert_eq!(value["version"], json!(CURRENT_SCHEMA_VERSION));

        let (records, report) = decode_document(value).expect("decode");
        assert_eq!(report.issues, Vec::new());
        assert_eq!(records, vec![record]);
    }

    #[test]
    fn parse_instant_accepts_supported_formats() {
        assert_eq!(parse_instant("1700000000000"), Some(at(1_700_000_000_000)));
        assert_eq!(
            parse_instant("2023-11-14T22:13:20Z"),
            Some(at(1_700_000_000_000))
        );
        assert_eq!(parse_instant("2024-04-05T08:00"), Some(local("2024-04-05T08:00")));
        assert_eq!(parse_instant("2024-04-05 08:00"), Some(local("2024-04-05T08:00")));
        assert_eq!(parse_instant("tomorrow"), None);
        assert_eq!(parse_instant("  "), None);
    }
}
