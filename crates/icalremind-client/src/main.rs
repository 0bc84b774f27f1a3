//! icalremind CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use icalremind_client::cli::{Cli, Command, ConfigAction};
use icalremind_client::commands;
use icalremind_client::config::ClientConfig;
use icalremind_client::error::ClientResult;
use icalremind_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_cancelled() => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    init_tracing(TracingConfig::for_verbosity(cli.debug))?;
    let config = ClientConfig::load_all(&cli.config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => commands::run::run(&config).await,
        Command::Agenda { days } => commands::agenda::agenda(&config, days).await,
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(),
        },
    }
}
