//! Subcommand execution.

use crate::cli::{AddArgs, Cli, Command, EditArgs};
use crate::input::{InteractiveCommand, parse_interactive, parse_start, resolve_id};
use crate::notify::Notifiers;
use anyhow::{Context, bail};
use chrono::{DateTime, Duration, Local, Utc};
use dosealarm_config::{DoseAlarmConfig, StoreConfig};
use dosealarm_core::{AlarmHandle, AlarmService, Clock, EventBus, SchedulerPolicy, SystemClock, UpcomingDose};
use dosealarm_protocol::MedicationSummary;
use dosealarm_store::{FileRecordStore, FileStoreOptions, MedicationRecord, RecordStore};
use log::{debug, info, warn};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

const EVENT_BUFFER: usize = 64;
const SHORT_ID_LEN: usize = 8;

const INTERACTIVE_HELP: &str = "commands:
  take <id>               record a dose now
  snooze <id> [minutes]   postpone the current alarm
  list                    show upcoming doses
  quit                    stop the alarm loop";

/// Parse arguments already done; load config, open the store and run.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let store = open_store(&config.store, cli.store.as_deref())?;
    let app = App::new(config, Arc::new(store), Arc::new(SystemClock));
    let mut stdout = std::io::stdout();
    match cli.command {
        Command::Run => {
            app.run_foreground(BufReader::new(tokio::io::stdin()), &mut stdout)
                .await
        }
        command => {
            let mut app = app;
            app.run_command(command, &mut stdout).await
        }
    }
}

/// Load the config file given on the command line, or the layered stack.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<DoseAlarmConfig> {
    match path {
        Some(path) => DoseAlarmConfig::load_from_path(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => {
            let cwd = std::env::current_dir().context("failed to resolve current directory")?;
            let layered = DoseAlarmConfig::load_layered(&cwd).context("failed to load config")?;
            for layer in &layered.layers {
                debug!(
                    "config layer applied (source={:?}, path={})",
                    layer.source,
                    layer.path.display()
                );
            }
            Ok(layered.config)
        }
    }
}

/// Open the record document, importing a legacy document when configured.
pub fn open_store(
    config: &StoreConfig,
    override_path: Option<&Path>,
) -> anyhow::Result<FileRecordStore> {
    let path = match override_path {
        Some(path) => path.to_path_buf(),
        None => config
            .resolve_path()
            .context("no home directory found; pass --store or set store.path")?,
    };
    let mut options = FileStoreOptions::new(&path);
    if let Some(legacy) = &config.legacy_path {
        options = options.with_legacy_path(legacy);
    }
    if let Some(limit) = config.history_limit {
        options = options.with_history_limit(limit);
    }
    let (store, report) = FileRecordStore::open_with_options(options)
        .with_context(|| format!("failed to open record store {}", path.display()))?;
    if report.skipped > 0 {
        warn!(
            "records skipped on load (path={}, skipped={})",
            path.display(),
            report.skipped
        );
    }
    Ok(store)
}

/// Alarm service plus the config and event bus the CLI needs around it.
pub struct App {
    config: DoseAlarmConfig,
    service: AlarmService,
    bus: Arc<EventBus>,
}

impl App {
    pub fn new(config: DoseAlarmConfig, store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        let bus = Arc::new(EventBus::new(EVENT_BUFFER));
        let policy = SchedulerPolicy::from_config(&config.scheduler);
        let service = AlarmService::new(store, bus.clone(), clock, policy);
        Self {
            config,
            service,
            bus,
        }
    }

    fn user_name(&self) -> Option<String> {
        self.config.display_name().map(str::to_string)
    }

    /// Execute a one-shot subcommand. `run` is handled by [`App::run_foreground`].
    pub async fn run_command<W: Write>(&mut self, command: Command, out: &mut W) -> anyhow::Result<()> {
        match command {
            Command::Add(args) => self.add(args, out).await,
            Command::Edit(args) => self.edit(args, out).await,
            Command::List { json } => self.list(json, out).await,
            Command::History { id } => {
                let record = self.find(&id).await?;
                if record.history.is_empty() {
                    writeln!(out, "no doses recorded for {}", record.name)?;
                }
                for taken in record.history.iter().rev() {
                    writeln!(out, "{}  {}", local(*taken), record.name)?;
                }
                Ok(())
            }
            Command::Remove { id } => {
                let record = self.find(&id).await?;
                self.service.delete(&record.id).await?;
                writeln!(out, "removed {} ({})", record.name, record.id)?;
                Ok(())
            }
            Command::Clear { yes } => {
                if !yes {
                    bail!("refusing to delete every record without --yes");
                }
                let removed = self.service.clear_all().await?;
                writeln!(out, "removed {removed} record(s)")?;
                Ok(())
            }
            Command::Take { id } => {
                let record = self.find(&id).await?;
                self.service
                    .acknowledge(&record.id)
                    .await
                    .with_context(|| format!("failed to record dose of {}", record.name))?;
                let upcoming = self.service.upcoming().await?;
                writeln!(out, "{}", describe_taken(&record, &upcoming))?;
                Ok(())
            }
            Command::Test { name, quantity } => {
                let mut events = self.bus.subscribe();
                self.service.test_alarm(MedicationSummary {
                    name,
                    quantity,
                    image: None,
                });
                let event = events.recv().await.context("test alarm was not delivered")?;
                Notifiers::from_config(&self.config.notifications, self.user_name())
                    .present(&event)
                    .await;
                writeln!(out, "test alarm fired ({})", event.message(self.config.display_name()))?;
                Ok(())
            }
            Command::Run => bail!("`run` needs the foreground loop"),
        }
    }

    async fn add<W: Write>(&mut self, args: AddArgs, out: &mut W) -> anyhow::Result<()> {
        let now = self.service.now();
        let start = match args.start.as_deref() {
            Some(text) => parse_start(text, now.with_timezone(&Local))?,
            None => now + Duration::minutes(1),
        };
        let mut record = MedicationRecord::new(args.name, args.quantity, start, args.interval)
            .with_pre_reminders(args.remind);
        if let Some(image) = args.image {
            record = record.with_image(image);
        }
        let id = record.id.clone();
        let name = record.name.clone();
        self.service
            .register(record)
            .await
            .with_context(|| format!("failed to add {name}"))?;
        writeln!(out, "added {name} ({id}); first dose {}", local(start))?;
        Ok(())
    }

    async fn edit<W: Write>(&mut self, args: EditArgs, out: &mut W) -> anyhow::Result<()> {
        let mut record = self.find(&args.id).await?;
        if let Some(name) = args.name {
            record.name = name;
        }
        if let Some(quantity) = args.quantity {
            record.quantity = quantity;
        }
        if let Some(text) = args.start.as_deref() {
            record.start_time = parse_start(text, self.service.now().with_timezone(&Local))?;
        }
        if let Some(interval) = args.interval {
            record.interval_minutes = interval;
        }
        if args.no_reminders {
            record.pre_reminder_offsets.clear();
        } else if !args.remind.is_empty() {
            record.pre_reminder_offsets = args.remind.into_iter().collect();
        }
        if let Some(image) = args.image {
            record.image = Some(image).filter(|image| !image.is_empty());
        }
        let id = record.id.clone();
        self.service
            .update(record)
            .await
            .with_context(|| format!("failed to update {id}"))?;
        writeln!(out, "updated {id}")?;
        Ok(())
    }

    async fn list<W: Write>(&self, json: bool, out: &mut W) -> anyhow::Result<()> {
        let upcoming = self.service.upcoming().await?;
        if json {
            let records: Vec<&MedicationRecord> = upcoming.iter().map(|dose| &dose.record).collect();
            writeln!(out, "{}", serde_json::to_string_pretty(&records)?)?;
            return Ok(());
        }
        write_upcoming(&upcoming, out)
    }

    async fn find(&self, query: &str) -> anyhow::Result<MedicationRecord> {
        let records: Vec<MedicationRecord> = self
            .service
            .upcoming()
            .await?
            .into_iter()
            .map(|dose| dose.record)
            .collect();
        let id = resolve_id(&records, query)?;
        records
            .into_iter()
            .find(|record| record.id == id)
            .with_context(|| format!("record {id} disappeared"))
    }

    /// Run the alarm loop until `quit` or Ctrl-C, reading commands from `input`.
    ///
    /// End of input does not stop the loop; it keeps firing alarms until
    /// interrupted.
    pub async fn run_foreground<R, W>(self, input: R, out: &mut W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let user_name = self.user_name();
        let App {
            config,
            service,
            bus,
        } = self;
        let notifier = Notifiers::from_config(&config.notifications, user_name).spawn(bus.subscribe());
        let default_postpone = config.scheduler.default_postpone_minutes;
        let (handle, task) = dosealarm_core::spawn(service);
        writeln!(out, "dosealarm running; type `help` for commands")?;

        let mut lines = input.lines();
        let mut input_open = true;
        loop {
            let line = tokio::select! {
                line = lines.next_line(), if input_open => line.context("failed to read input")?,
                _ = tokio::signal::ctrl_c() => break,
            };
            let Some(line) = line else {
                info!("input closed; alarms keep running until interrupted");
                input_open = false;
                continue;
            };
            match parse_interactive(&line) {
                Ok(InteractiveCommand::Quit) => break,
                Ok(command) => {
                    if let Err(err) = interactive(&handle, command, default_postpone, out).await {
                        writeln!(out, "error: {err:#}")?;
                    }
                }
                Err(err) => writeln!(out, "error: {err:#}")?,
            }
        }

        if let Err(err) = handle.shutdown().await {
            warn!("alarm runtime already stopped (err={})", err);
        }
        let service = task.await.context("alarm runtime task failed")?;
        drop(service);
        drop(bus);
        notifier.await.context("notifier task failed")?;
        writeln!(out, "dosealarm stopped")?;
        Ok(())
    }
}

async fn interactive<W: Write>(
    handle: &AlarmHandle,
    command: InteractiveCommand,
    default_postpone: u32,
    out: &mut W,
) -> anyhow::Result<()> {
    match command {
        InteractiveCommand::Take(query) => {
            let upcoming = handle.upcoming().await?;
            let record = pick(&upcoming, &query)?;
            handle.acknowledge(record.id.clone()).await?;
            let upcoming = handle.upcoming().await?;
            writeln!(out, "{}", describe_taken(record, &upcoming))?;
        }
        InteractiveCommand::Snooze(query, minutes) => {
            let upcoming = handle.upcoming().await?;
            let record = pick(&upcoming, &query)?;
            let postponement = handle
                .postpone(record.id.clone(), minutes.unwrap_or(default_postpone))
                .await?;
            writeln!(out, "snoozed {} until {}", record.name, local(postponement.until))?;
        }
        InteractiveCommand::List => write_upcoming(&handle.upcoming().await?, out)?,
        InteractiveCommand::Help => writeln!(out, "{INTERACTIVE_HELP}")?,
        InteractiveCommand::Quit => {}
    }
    Ok(())
}

fn pick<'a>(upcoming: &'a [UpcomingDose], query: &str) -> anyhow::Result<&'a MedicationRecord> {
    let records: Vec<MedicationRecord> = upcoming.iter().map(|dose| dose.record.clone()).collect();
    let id = resolve_id(&records, query)?;
    upcoming
        .iter()
        .map(|dose| &dose.record)
        .find(|record| record.id == id)
        .with_context(|| format!("record {id} disappeared"))
}

fn write_upcoming<W: Write>(upcoming: &[UpcomingDose], out: &mut W) -> anyhow::Result<()> {
    if upcoming.is_empty() {
        writeln!(out, "no medications registered")?;
        return Ok(());
    }
    for dose in upcoming {
        writeln!(out, "{}", describe_dose(dose))?;
    }
    Ok(())
}

/// One listing line: short id, next due, name, quantity and cadence.
pub fn describe_dose(dose: &UpcomingDose) -> String {
    let record = &dose.record;
    let mut line = format!(
        "{:<width$}  {}  {} ({}), {}",
        short_id(record),
        local(dose.due),
        record.name,
        record.quantity,
        describe_interval(record.interval_minutes),
        width = SHORT_ID_LEN
    );
    if !record.pre_reminder_offsets.is_empty() {
        let offsets: Vec<String> = record
            .pre_reminder_offsets
            .iter()
            .map(|offset| offset.to_string())
            .collect();
        line.push_str(&format!(", reminders {} min before", offsets.join("/")));
    }
    if dose.settled {
        line.push_str(" [taken]");
    }
    line
}

fn describe_taken(record: &MedicationRecord, upcoming: &[UpcomingDose]) -> String {
    let next = upcoming
        .iter()
        .find(|dose| dose.record.id == record.id)
        .filter(|dose| !dose.settled);
    match next {
        Some(dose) => format!("dose of {} recorded; next {}", record.name, local(dose.due)),
        None => format!("dose of {} recorded", record.name),
    }
}

/// Human cadence for an interval in minutes.
pub fn describe_interval(minutes: u32) -> String {
    match minutes {
        0 => "once".to_string(),
        m if m % 60 == 0 => format!("every {}h", m / 60),
        m => format!("every {m} min"),
    }
}

fn short_id(record: &MedicationRecord) -> &str {
    let id = record.id.as_str();
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

fn local(instant: DateTime<Utc>) -> String {
    instant.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}
