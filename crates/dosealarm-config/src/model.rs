//! Configuration schema for dosealarm.

use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Directory under the home directory holding user config and records.
pub const DEFAULT_DATA_DIR: &str = ".dosealarm";
/// Record document file name inside [`DEFAULT_DATA_DIR`].
pub const DEFAULT_STORE_FILE: &str = "records.json";

/// Root config for dosealarm.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DoseAlarmConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    /// Name appended to alarm messages.
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

impl DoseAlarmConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> DoseAlarmConfigBuilder {
        DoseAlarmConfigBuilder::new()
    }

    /// User name with surrounding whitespace removed, if any remains.
    pub fn display_name(&self) -> Option<&str> {
        self.user_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Builder for assembling a `DoseAlarmConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct DoseAlarmConfigBuilder {
    config: DoseAlarmConfig,
}

impl DoseAlarmConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name used in alarm messages.
    pub fn user_name(mut self, name: impl Into<String>) -> Self {
        self.config.user_name = Some(name.into());
        self
    }

    /// Replace the scheduler cadence and tolerances.
    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.config.scheduler = scheduler;
        self
    }

    /// Replace the record store configuration.
    pub fn store(mut self, store: StoreConfig) -> Self {
        self.config.store = store;
        self
    }

    /// Replace the notification outputs.
    pub fn notifications(mut self, notifications: NotificationsConfig) -> Self {
        self.config.notifications = notifications;
        self
    }

    /// Finalize and return the built `DoseAlarmConfig`.
    pub fn build(self) -> DoseAlarmConfig {
        self.config
    }
}

/// Scheduler cadence and tolerance windows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Seconds between scheduler passes.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Seconds between re-assertions of an unacknowledged alarm.
    #[serde(default = "default_repeat_interval_secs")]
    pub repeat_interval_secs: u64,
    /// How late a primary alarm may still fire, also the next-due grace.
    #[serde(default = "default_grace_minutes")]
    pub grace_minutes: u64,
    /// How early an alarm may fire.
    #[serde(default)]
    pub future_tolerance_secs: u64,
    /// How late a pre-reminder may still fire.
    #[serde(default = "default_reminder_tolerance_secs")]
    pub reminder_tolerance_secs: u64,
    /// Snooze length used when none is given.
    #[serde(default = "default_postpone_minutes")]
    pub default_postpone_minutes: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            repeat_interval_secs: default_repeat_interval_secs(),
            grace_minutes: default_grace_minutes(),
            future_tolerance_secs: 0,
            reminder_tolerance_secs: default_reminder_tolerance_secs(),
            default_postpone_minutes: default_postpone_minutes(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_repeat_interval_secs() -> u64 {
    10
}

fn default_grace_minutes() -> u64 {
    10
}

fn default_reminder_tolerance_secs() -> u64 {
    60
}

fn default_postpone_minutes() -> u32 {
    30
}

/// Record store location and retention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Record document path; defaults to `~/.dosealarm/records.json`.
    #[serde(default)]
    pub path: Option<String>,
    /// Older array-style document imported on first start.
    #[serde(default)]
    pub legacy_path: Option<String>,
    /// Acknowledgements kept per record; `null` keeps everything.
    #[serde(default = "default_history_limit")]
    pub history_limit: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            legacy_path: None,
            history_limit: default_history_limit(),
        }
    }
}

fn default_history_limit() -> Option<usize> {
    Some(100)
}

impl StoreConfig {
    /// Configured record path, or the default under the home directory.
    pub fn resolve_path(&self) -> Option<PathBuf> {
        match &self.path {
            Some(path) => Some(PathBuf::from(path)),
            None => UserDirs::new().map(|dirs| {
                dirs.home_dir()
                    .join(DEFAULT_DATA_DIR)
                    .join(DEFAULT_STORE_FILE)
            }),
        }
    }
}

/// Where alarm events are delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationsConfig {
    /// Print alarms on the terminal.
    #[serde(default = "default_true")]
    pub console: bool,
    /// Ring the terminal bell with each alarm.
    #[serde(default = "default_true")]
    pub bell: bool,
    /// Text-to-speech command; the message is appended as the last argument.
    #[serde(default)]
    pub speech_command: Option<Vec<String>>,
    /// Desktop notification command, e.g. `["notify-send", "Medication"]`.
    #[serde(default)]
    pub notify_command: Option<Vec<String>>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            console: true,
            bell: true,
            speech_command: None,
            notify_command: None,
        }
    }
}

fn default_true() -> bool {
    true
}
