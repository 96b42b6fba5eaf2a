//! Command-line front end for dosealarm.
//!
//! This crate re-exports the building blocks and wires them into the
//! `dosealarm` binary: argument parsing, record management commands, the
//! foreground alarm loop and the console/command notifiers.

pub mod cli;
pub mod commands;
pub mod input;
pub mod notify;

/// Re-export for convenience.
pub use dosealarm_config as config;
pub use dosealarm_core as core;
/// Re-export for convenience.
pub use dosealarm_protocol as protocol;
pub use dosealarm_store as store;

/// Initialize `env_logger` with millisecond timestamps and `RUST_LOG` filters.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::builder()
        .format_timestamp_millis()
        .parse_default_env()
        .try_init();
}
