//! End-to-end subcommand behavior against in-memory and file stores.

use clap::Parser;
use dosealarm::cli::Cli;
use dosealarm::commands::{App, open_store};
use dosealarm::config::{DoseAlarmConfig, NotificationsConfig, StoreConfig};
use dosealarm::core::ManualClock;
use dosealarm::protocol::RecordId;
use dosealarm::store::{MemoryRecordStore, RecordStore};
use dosealarm_test_utils::{at, hourly_record};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn quiet_config() -> DoseAlarmConfig {
    DoseAlarmConfig::builder()
        .notifications(NotificationsConfig {
            console: false,
            bell: false,
            speech_command: None,
            notify_command: None,
        })
        .build()
}

fn app_with(store: Arc<dyn RecordStore>, minutes: i64) -> App {
    App::new(quiet_config(), store, Arc::new(ManualClock::new(at(minutes))))
}

async fn run(app: &mut App, args: &[&str]) -> anyhow::Result<String> {
    let cli = Cli::try_parse_from(std::iter::once("dosealarm").chain(args.iter().copied()))?;
    let mut out = Vec::new();
    app.run_command(cli.command, &mut out).await?;
    Ok(String::from_utf8(out)?)
}

fn losartan() -> dosealarm::store::MedicationRecord {
    let mut record = hourly_record("Losartan", [5]);
    record.id = RecordId::new("abc123");
    record
}

#[tokio::test]
async fn added_record_is_listed_with_its_cadence() {
    let store = Arc::new(MemoryRecordStore::new());
    let mut app = app_with(store.clone(), 0);

    let added = run(
        &mut app,
        &[
            "add", "--name", "Losartan", "--quantity", "1 tablet", "--start",
            "2023-11-14T22:13:20Z", "--interval", "60", "--remind", "5",
        ],
    )
    .await
    .expect("add");
    assert!(added.starts_with("added Losartan ("));

    let listed = run(&mut app, &["list"]).await.expect("list");
    assert_eq!(listed.lines().count(), 1);
    assert!(listed.contains("Losartan (1 tablet), every 1h, reminders 5 min before"));

    let records = store.get_all().await.expect("records");
    assert_eq!(records[0].start_time, at(0));
}

#[tokio::test]
async fn add_without_start_schedules_one_minute_ahead() {
    let store = Arc::new(MemoryRecordStore::new());
    let mut app = app_with(store.clone(), 30);
    run(
        &mut app,
        &["add", "--name", "Aspirin", "--quantity", "1", "--interval", "0"],
    )
    .await
    .expect("add");
    let records = store.get_all().await.expect("records");
    assert_eq!(records[0].start_time, at(31));
    assert!(records[0].is_one_shot());
}

#[tokio::test]
async fn take_by_prefix_records_history() {
    let store = Arc::new(MemoryRecordStore::with_records([losartan()]));
    let mut app = app_with(store.clone(), 5);

    let taken = run(&mut app, &["take", "abc"]).await.expect("take");
    assert!(taken.starts_with("dose of Losartan recorded; next "));

    let record = store
        .get(&RecordId::new("abc123"))
        .await
        .expect("get")
        .expect("record");
    assert_eq!(record.history, vec![at(5)]);

    let history = run(&mut app, &["history", "abc123"]).await.expect("history");
    assert_eq!(history.lines().count(), 1);
    assert!(history.ends_with("Losartan\n"));
}

#[tokio::test]
async fn unknown_id_is_reported() {
    let store = Arc::new(MemoryRecordStore::with_records([losartan()]));
    let mut app = app_with(store, 0);
    let err = run(&mut app, &["remove", "zzz"]).await.unwrap_err();
    assert!(err.to_string().contains("no record matches `zzz`"));
}

#[tokio::test]
async fn edit_replaces_fields_and_clears_reminders() {
    let store = Arc::new(MemoryRecordStore::with_records([losartan()]));
    let mut app = app_with(store.clone(), 0);
    run(
        &mut app,
        &["edit", "abc", "--quantity", "2 tablets", "--interval", "480", "--no-reminders"],
    )
    .await
    .expect("edit");
    let record = store
        .get(&RecordId::new("abc123"))
        .await
        .expect("get")
        .expect("record");
    assert_eq!(record.quantity, "2 tablets");
    assert_eq!(record.interval_minutes, 480);
    assert!(record.pre_reminder_offsets.is_empty());
}

#[tokio::test]
async fn clear_requires_confirmation() {
    let store = Arc::new(MemoryRecordStore::with_records([losartan()]));
    let mut app = app_with(store.clone(), 0);
    assert!(run(&mut app, &["clear"]).await.is_err());
    assert_eq!(store.get_all().await.expect("records").len(), 1);

    let cleared = run(&mut app, &["clear", "--yes"]).await.expect("clear");
    assert_eq!(cleared, "removed 1 record(s)\n");
    assert!(store.get_all().await.expect("records").is_empty());
}

#[tokio::test]
async fn test_alarm_reports_rendered_text() {
    let mut app = app_with(Arc::new(MemoryRecordStore::new()), 0);
    let output = run(&mut app, &["test", "--name", "Losartan", "--quantity", "1 tablet"])
        .await
        .expect("test");
    assert_eq!(output, "test alarm fired (Time to take 1 tablet of Losartan)\n");
}

#[tokio::test]
async fn file_store_keeps_records_between_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("records.json");
    let config = StoreConfig::default();

    let store = open_store(&config, Some(&path)).expect("open");
    let mut app = app_with(Arc::new(store), 0);
    run(
        &mut app,
        &["add", "--name", "Losartan", "--quantity", "1", "--interval", "60"],
    )
    .await
    .expect("add");

    let reopened = open_store(&config, Some(&path)).expect("reopen");
    let records = reopened.get_all().await.expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "Losartan");
}

#[tokio::test]
async fn foreground_loop_handles_stdin_commands() {
    let store = Arc::new(MemoryRecordStore::with_records([losartan()]));
    let app = app_with(store.clone(), 0);
    let input: &[u8] = b"list\nsnooze abc 15\ndance\ntake abc\nquit\n";
    let mut out = Vec::new();

    app.run_foreground(input, &mut out).await.expect("run");

    let output = String::from_utf8(out).expect("utf8");
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines[0], "dosealarm running; type `help` for commands");
    assert!(lines[1].starts_with("abc123    "));
    assert!(lines[2].starts_with("snoozed Losartan until "));
    assert_eq!(lines[3], "error: unknown command `dance`; type `help`");
    assert!(lines[4].starts_with("dose of Losartan recorded"));
    assert_eq!(lines.last().copied(), Some("dosealarm stopped"));

    let record = store
        .get(&RecordId::new("abc123"))
        .await
        .expect("get")
        .expect("record");
    assert_eq!(record.history, vec![at(0)]);
}
