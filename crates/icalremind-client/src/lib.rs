//! CLI, configuration, reminder extraction and delivery
//!
//! This crate provides the `icalremind` command-line interface.

pub mod cli;
pub mod commands;
pub mod config;
pub mod delivery;
pub mod error;
pub mod reminders;
pub mod secret;

pub use cli::Cli;
pub use error::{ClientError, ClientResult};
