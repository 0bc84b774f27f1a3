//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// icalremind - Reminders for iCalendar events
#[derive(Debug, Parser)]
#[command(name = "icalremind")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a configuration file (can be repeated; later files override
    /// earlier settings and add calendars)
    #[arg(long, short, env = "ICALREMIND_CONFIG", action = clap::ArgAction::Append)]
    pub config: Vec<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Watch the calendars and deliver reminders (default)
    Run,

    /// Print upcoming events and their reminders
    Agenda {
        /// Number of days to show, starting today
        #[arg(long, default_value = "1")]
        days: u32,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_run() {
        let cli = Cli::try_parse_from(["icalremind"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_empty());
        assert!(!cli.debug);
    }

    #[test]
    fn repeated_config_flags() {
        let cli = Cli::try_parse_from([
            "icalremind",
            "-c",
            "base.toml",
            "--config",
            "secrets.toml",
            "-v",
        ])
        .unwrap();
        assert_eq!(
            cli.config,
            vec![PathBuf::from("base.toml"), PathBuf::from("secrets.toml")]
        );
        assert!(cli.debug);
    }

    #[test]
    fn agenda_days() {
        let cli = Cli::try_parse_from(["icalremind", "agenda", "--days", "3"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Agenda { days: 3 })));

        let cli = Cli::try_parse_from(["icalremind", "agenda"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Agenda { days: 1 })));
    }

    #[test]
    fn config_subcommands() {
        let cli = Cli::try_parse_from(["icalremind", "config", "validate"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config {
                action: ConfigAction::Validate
            })
        ));
    }
}
