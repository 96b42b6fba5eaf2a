//! Parsing of user-typed values: start times, record ids, interactive commands.

use anyhow::{Context, bail};
use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use dosealarm_protocol::RecordId;
use dosealarm_store::{MedicationRecord, parse_instant};

/// Command typed on stdin while `dosealarm run` is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractiveCommand {
    Take(String),
    Snooze(String, Option<u32>),
    List,
    Help,
    Quit,
}

/// Parse a start time relative to `now` (local clock).
///
/// Besides the formats of [`parse_instant`], a bare `HH:MM` means that time
/// today.
pub fn parse_start(text: &str, now: DateTime<Local>) -> anyhow::Result<DateTime<Utc>> {
    if let Some(instant) = parse_instant(text) {
        return Ok(instant);
    }
    let time = NaiveTime::parse_from_str(text.trim(), "%H:%M")
        .with_context(|| format!("unrecognized start time `{text}`"))?;
    let local = Local
        .from_local_datetime(&now.date_naive().and_time(time))
        .earliest()
        .with_context(|| format!("start time `{text}` does not exist today"))?;
    Ok(local.with_timezone(&Utc))
}

/// Resolve a full id or a unique id prefix.
pub fn resolve_id(records: &[MedicationRecord], query: &str) -> anyhow::Result<RecordId> {
    let query = query.trim();
    if query.is_empty() {
        bail!("record id is empty");
    }
    if let Some(record) = records.iter().find(|record| record.id.as_str() == query) {
        return Ok(record.id.clone());
    }
    let matches: Vec<&MedicationRecord> = records
        .iter()
        .filter(|record| record.id.as_str().starts_with(query))
        .collect();
    match matches.as_slice() {
        [record] => Ok(record.id.clone()),
        [] => bail!("no record matches `{query}`"),
        many => bail!("`{query}` matches {} records; use a longer prefix", many.len()),
    }
}

/// Parse one stdin line of the foreground loop.
pub fn parse_interactive(line: &str) -> anyhow::Result<InteractiveCommand> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(InteractiveCommand::Help);
    };
    let command = match verb {
        "take" | "ok" => {
            let id = parts.next().context("usage: take <id>")?;
            InteractiveCommand::Take(id.to_string())
        }
        "snooze" | "later" => {
            let id = parts.next().context("usage: snooze <id> [minutes]")?;
            let minutes = parts
                .next()
                .map(|value| {
                    value
                        .parse::<u32>()
                        .with_context(|| format!("`{value}` is not a number of minutes"))
                })
                .transpose()?;
            InteractiveCommand::Snooze(id.to_string(), minutes)
        }
        "list" | "ls" => InteractiveCommand::List,
        "help" | "?" => InteractiveCommand::Help,
        "quit" | "exit" | "q" => InteractiveCommand::Quit,
        other => bail!("unknown command `{other}`; type `help`"),
    };
    if parts.next().is_some() {
        bail!("too many arguments for `{verb}`");
    }
    Ok(command)
}
