//! Caredex command-line entry point

mod bootstrap;
mod cli;
mod commands;
mod signal;

use crate::cli::{Args, Command};
use caredex_common::{LogFormat, init_logging, initialize_environment};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    initialize_environment();
    let args = Args::parse();

    let config = bootstrap::load_config(args.config_file.as_deref())?;

    let level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.telemetry.log_level);
    let format = if args.json_logs || config.telemetry.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_logging(level, format)?;
    tracing::debug!(command = ?args.command, "Configuration loaded");

    match args.command {
        Command::Embed(embed) => commands::embed(&config, embed).await,
        Command::Index(index) => commands::index(&config, index).await,
        Command::Search(search) => commands::search(&config, search).await,
        Command::Budget => commands::budget(&config).await,
        Command::Config => commands::show_config(&config),
    }
}
