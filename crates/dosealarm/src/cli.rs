//! Command-line arguments.

use clap::{Args, Parser, Subcommand};
use dosealarm_store::ALLOWED_PRE_REMINDER_OFFSETS;
use std::path::PathBuf;

/// Command-line options for the dosealarm binary.
#[derive(Debug, Parser)]
#[command(name = "dosealarm", version, about = "Medication reminders with recurring alarms")]
pub struct Cli {
    /// Path to a dosealarm.json5 config file, replacing the layered lookup
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Path to the record document, overriding store.path
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register a medication
    Add(AddArgs),
    /// Change fields of a medication
    Edit(EditArgs),
    /// List medications by next due time
    List {
        /// Print the stored records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show when doses were taken
    History { id: String },
    /// Delete a medication
    Remove { id: String },
    /// Delete every medication
    Clear {
        /// Confirm deleting everything
        #[arg(long)]
        yes: bool,
    },
    /// Record a dose taken now
    Take { id: String },
    /// Fire a test alarm through the configured notifiers
    Test {
        #[arg(long, default_value = "Test")]
        name: String,
        #[arg(long, default_value = "1 dose")]
        quantity: String,
    },
    /// Run the alarm loop in the foreground, reading commands from stdin
    Run,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub quantity: String,
    /// First dose: RFC 3339, `YYYY-MM-DD HH:MM`, or `HH:MM` today; defaults to one minute from now
    #[arg(long)]
    pub start: Option<String>,
    /// Minutes between doses; 0 fires once
    #[arg(long)]
    pub interval: u32,
    /// Pre-reminder minutes before each dose (1, 3 or 5); repeatable
    #[arg(long = "remind", value_parser = parse_offset)]
    pub remind: Vec<u32>,
    /// Photo path or URL shown with the alarm
    #[arg(long)]
    pub image: Option<String>,
}

#[derive(Debug, Args)]
pub struct EditArgs {
    /// Record id or unique prefix
    pub id: String,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub quantity: Option<String>,
    #[arg(long)]
    pub start: Option<String>,
    #[arg(long)]
    pub interval: Option<u32>,
    /// Replace the pre-reminders; repeatable
    #[arg(long = "remind", value_parser = parse_offset, conflicts_with = "no_reminders")]
    pub remind: Vec<u32>,
    /// Remove every pre-reminder
    #[arg(long)]
    pub no_reminders: bool,
    #[arg(long)]
    pub image: Option<String>,
}

/// Accept only the supported pre-reminder offsets.
fn parse_offset(value: &str) -> Result<u32, String> {
    let offset: u32 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a number of minutes"))?;
    if ALLOWED_PRE_REMINDER_OFFSETS.contains(&offset) {
        Ok(offset)
    } else {
        Err(format!(
            "pre-reminder must be one of {ALLOWED_PRE_REMINDER_OFFSETS:?} minutes"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[test]
    fn add_accepts_repeated_reminders() {
        let cli = Cli::try_parse_from([
            "dosealarm", "add", "--name", "Losartan", "--quantity", "1 tablet", "--interval",
            "480", "--remind", "5", "--remind", "1",
        ])
        .expect("parse");
        let Command::Add(args) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(args.remind, vec![5, 1]);
        assert_eq!(args.interval, 480);
        assert_eq!(args.start, None);
    }

    #[test]
    fn unsupported_reminder_offset_is_rejected() {
        let err = Cli::try_parse_from([
            "dosealarm", "add", "--name", "A", "--quantity", "1", "--interval", "60",
            "--remind", "2",
        ])
        .unwrap_err();
        assert!(err.to_string().contains("pre-reminder must be one of"));
    }

    #[test]
    fn global_store_flag_works_after_subcommand() {
        let cli = Cli::try_parse_from(["dosealarm", "list", "--store", "/tmp/records.json"])
            .expect("parse");
        assert_eq!(
            cli.store.as_deref(),
            Some(std::path::Path::new("/tmp/records.json"))
        );
    }
}
