//! `dosealarm` binary entry point.

use clap::Parser;
use dosealarm::cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dosealarm::init_logging();
    let cli = Cli::parse();
    info!(
        "starting dosealarm (config_set={}, store_set={})",
        cli.config.is_some(),
        cli.store.is_some()
    );
    dosealarm::commands::execute(cli).await
}
