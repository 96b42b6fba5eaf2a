//! Alarm presentation: console overlay, terminal bell and external commands.
//!
//! [`Notifiers`] consumes events from the core event bus on its own task, so
//! slow speech or notification commands never hold up the scheduler. Commands
//! run on tasks of their own and are killed after [`COMMAND_TIMEOUT`].

use chrono::Local;
use dosealarm_config::NotificationsConfig;
use dosealarm_protocol::{AlarmEvent, AlarmKind};
use log::{debug, warn};
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::{JoinHandle, JoinSet};

/// Longest a speech or notification command may run.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// External program invoked with the alarm text as its last argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandNotifier {
    label: &'static str,
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandNotifier {
    /// Build from an argv array; `None` when the array is empty.
    pub fn from_argv(label: &'static str, argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            label,
            program: program.clone(),
            args: args.to_vec(),
            timeout: COMMAND_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the command to completion. Returns its exit code.
    ///
    /// A command still running after the timeout is killed and reported as
    /// [`std::io::ErrorKind::TimedOut`].
    pub async fn run(&self, text: &str) -> std::io::Result<Option<i32>> {
        debug!(
            "running notifier command (notifier={}, args_len={})",
            self.label,
            self.args.len() + 1
        );
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        match tokio::time::timeout(self.timeout, status).await {
            Ok(status) => Ok(status?.code()),
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no exit after {}ms", self.timeout.as_millis()),
            )),
        }
    }

    async fn notify(&self, text: &str) {
        match self.run(text).await {
            Ok(Some(0)) => {}
            Ok(code) => warn!(
                "notifier command failed (notifier={}, status={:?})",
                self.label, code
            ),
            Err(err) => warn!(
                "notifier command did not complete (notifier={}, program={}, err={})",
                self.label, self.program, err
            ),
        }
    }
}

/// Render the terminal overlay for an event.
pub fn render_overlay(event: &AlarmEvent, user_name: Option<&str>) -> String {
    let due = event.due.with_timezone(&Local).format("%H:%M");
    let mut lines = vec![
        format!("=== {} ===", event.kind.title()),
        event.message(user_name),
    ];
    match &event.medication.image {
        Some(image) => lines.push(format!("due {due} | photo: {image}")),
        None => lines.push(format!("due {due}")),
    }
    match event.kind {
        AlarmKind::Primary | AlarmKind::Repeat => lines.push(format!(
            "reply: take {id} | snooze {id} [minutes]",
            id = event.record_id
        )),
        AlarmKind::Reminder { .. } | AlarmKind::Test => {}
    }
    lines.join("\n")
}

/// Every configured way of presenting alarms.
#[derive(Debug, Clone)]
pub struct Notifiers {
    user_name: Option<String>,
    console: bool,
    bell: bool,
    speech: Option<CommandNotifier>,
    desktop: Option<CommandNotifier>,
}

impl Notifiers {
    pub fn from_config(config: &NotificationsConfig, user_name: Option<String>) -> Self {
        Self {
            user_name,
            console: config.console,
            bell: config.bell,
            speech: config
                .speech_command
                .as_deref()
                .and_then(|argv| CommandNotifier::from_argv("speech", argv)),
            desktop: config
                .notify_command
                .as_deref()
                .and_then(|argv| CommandNotifier::from_argv("notify", argv)),
        }
    }

    /// Present one event on every enabled channel, waiting for its commands.
    pub async fn present(&self, event: &AlarmEvent) {
        self.show(event);
        let mut runs = JoinSet::new();
        self.launch(event, &mut runs);
        while runs.join_next().await.is_some() {}
    }

    /// Present events from the bus until every sender is gone.
    ///
    /// Commands of one event may still be running when the next event
    /// arrives; they are awaited before the task ends.
    pub fn spawn(self, mut events: broadcast::Receiver<AlarmEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut runs = JoinSet::new();
            loop {
                match events.recv().await {
                    Ok(event) => {
                        self.show(&event);
                        self.launch(&event, &mut runs);
                        while runs.try_join_next().is_some() {}
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("notifiers lagged behind (skipped={})", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            while runs.join_next().await.is_some() {}
            debug!("notifier task finished");
        })
    }

    fn show(&self, event: &AlarmEvent) {
        if self.console {
            let mut stdout = std::io::stdout().lock();
            let bell = if self.bell { "\x07" } else { "" };
            let overlay = render_overlay(event, self.user_name.as_deref());
            if let Err(err) = writeln!(stdout, "{bell}\n{overlay}\n") {
                warn!("console notifier failed (err={})", err);
            }
            let _ = stdout.flush();
        } else if self.bell {
            let mut stdout = std::io::stdout().lock();
            let _ = write!(stdout, "\x07");
            let _ = stdout.flush();
        }
    }

    fn launch(&self, event: &AlarmEvent, runs: &mut JoinSet<()>) {
        let text = event.message(self.user_name.as_deref());
        if let Some(desktop) = self.desktop.clone() {
            let text = text.clone();
            runs.spawn(async move { desktop.notify(&text).await });
        }
        // Reminders are quiet; only full alarms are spoken.
        if event.kind.is_alarm()
            && let Some(speech) = self.speech.clone()
        {
            runs.spawn(async move { speech.notify(&text).await });
        }
    }
}
