//! Layered configuration loader.
//!
//! Discovers configuration layers (system/user/cwd/runtime), validates each
//! against the schema, merges them, and produces a final `DoseAlarmConfig`.

mod layer_io;
mod merge;
mod schema;
mod utils;


use crate::{ConfigError, DoseAlarmConfig};
use log::{debug, info};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Config filename in every layer location.
const DEFAULT_CONFIG_FILE: &str = "dosealarm.json5";

#[cfg(unix)]
const SYSTEM_CONFIG_PATH: &str = "/etc/dosealarm/dosealarm.json5";
#[cfg(windows)]
const SYSTEM_CONFIG_PATH: &str = "C:\\ProgramData\\dosealarm\\dosealarm.json5";

/// Effective config plus metadata about which layers were loaded.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    /// The merged, validated config.
    pub config: DoseAlarmConfig,
    /// Metadata for each layer that contributed.
    pub layers: Vec<ConfigLayer>,
}

/// Origin for a single config layer in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayerSource {
    /// System-wide configuration.
    System,
    /// User-specific configuration.
    User,
    /// Current working directory configuration.
    Cwd,
    /// Explicit override files (highest precedence).
    Runtime,
}

/// Metadata about a loaded config layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLayer {
    pub source: ConfigLayerSource,
    pub path: PathBuf,
}

/// Options controlling layered config discovery and overrides.
#[derive(Debug, Clone)]
pub struct LayeredConfigOptions {
    /// Directory searched for `dosealarm.json5`.
    pub cwd: PathBuf,
    /// System config path (defaults to `/etc/dosealarm/dosealarm.json5`).
    pub system_config_path: Option<PathBuf>,
    /// User config path (defaults to `~/.dosealarm/dosealarm.json5`).
    pub user_config_path: Option<PathBuf>,
    /// Override files applied last; each must exist.
    pub runtime_paths: Vec<PathBuf>,
}

impl LayeredConfigOptions {
    /// Create options with default layer locations for the provided cwd.
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            system_config_path: layer_io::default_system_config_path(),
            user_config_path: layer_io::default_user_config_path(),
            runtime_paths: Vec::new(),
        }
    }

    /// Add an override config path that is applied last.
    pub fn with_runtime_path(mut self, path: impl AsRef<Path>) -> Self {
        self.runtime_paths.push(path.as_ref().to_path_buf());
        self
    }
}

impl DoseAlarmConfig {
    /// Load a single config from a path (no layering).
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        info!("loading config from path: {}", path.as_ref().display());
        let contents = fs::read_to_string(path)?;
        Self::load_from_str(&contents)
    }

    /// Load a single config from JSON5 contents (no layering).
    pub fn load_from_str(contents: &str) -> Result<Self, ConfigError> {
        debug!("loading config from raw contents (len={})", contents.len());
        let value: Value = json5::from_str(contents)?;
        config_from_value(value, "config")
    }

    /// Load a layered config stack using the default layer locations.
    pub fn load_layered(cwd: impl AsRef<Path>) -> Result<LayeredConfig, ConfigError> {
        Self::load_layered_with_options(LayeredConfigOptions::new(cwd))
    }

    /// Load a layered config stack using explicit layer locations.
    ///
    /// Layer precedence (low -> high): system, user, cwd, runtime overrides.
    /// Missing system, user, and cwd files are skipped.
    pub fn load_layered_with_options(
        options: LayeredConfigOptions,
    ) -> Result<LayeredConfig, ConfigError> {
        let cwd = utils::normalize_path(&options.cwd)?;
        let candidates = [
            (ConfigLayerSource::System, options.system_config_path.clone()),
            (ConfigLayerSource::User, options.user_config_path.clone()),
            (
                ConfigLayerSource::Cwd,
                Some(cwd.join(DEFAULT_CONFIG_FILE)),
            ),
        ];

        let mut loaded = Vec::new();
        let mut seen_paths = HashSet::new();
        for (source, path) in candidates {
            let Some(path) = path else {
                continue;
            };
            if !seen_paths.insert(utils::unique_path(&path)) {
                debug!(
                    "skipping duplicate layer (source={:?}, path={})",
                    source,
                    path.display()
                );
                continue;
            }
            if let Some(layer) = layer_io::load_optional_layer(source, &path)? {
                loaded.push(layer);
            }
        }
        for path in &options.runtime_paths {
            loaded.push(layer_io::load_required_layer(
                ConfigLayerSource::Runtime,
                path,
            )?);
        }

        let mut merged = Value::Object(serde_json::Map::new());
        for layer in &loaded {
            merge::merge_json_values(&mut merged, &layer.value);
        }
        let config = config_from_value(merged, "effective")?;
        let layers: Vec<ConfigLayer> = loaded.into_iter().map(|layer| layer.meta).collect();
        info!("layered config loaded (layers={})", layers.len());
        Ok(LayeredConfig { config, layers })
    }

    /// Validate configuration invariants that cannot be expressed in serde.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scheduler = &self.scheduler;
        for (name, value) in [
            ("scheduler.poll_interval_secs", scheduler.poll_interval_secs),
            ("scheduler.repeat_interval_secs", scheduler.repeat_interval_secs),
            ("scheduler.grace_minutes", scheduler.grace_minutes),
            (
                "scheduler.reminder_tolerance_secs",
                scheduler.reminder_tolerance_secs,
            ),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if scheduler.default_postpone_minutes == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.default_postpone_minutes must be positive".to_string(),
            ));
        }
        if self.store.history_limit == Some(0) {
            return Err(ConfigError::Invalid(
                "store.history_limit must be positive or null".to_string(),
            ));
        }
        for (name, command) in [
            (
                "notifications.speech_command",
                &self.notifications.speech_command,
            ),
            (
                "notifications.notify_command",
                &self.notifications.notify_command,
            ),
        ] {
            if command
                .as_ref()
                .is_some_and(|argv| argv.first().is_none_or(|program| program.trim().is_empty()))
            {
                return Err(ConfigError::Invalid(format!(
                    "{name} requires a program name"
                )));
            }
        }
        Ok(())
    }
}

/// Internal representation of a loaded config layer.
#[derive(Debug, Clone)]
struct LoadedLayer {
    meta: ConfigLayer,
    value: Value,
}

fn config_from_value(value: Value, label: &str) -> Result<DoseAlarmConfig, ConfigError> {
    schema::validate_layer_schema(&value, label)?;
    let config: DoseAlarmConfig = serde_json::from_value(value)?;
    config.validate()?;
    Ok(config)
}
