//! Subcommand implementations.

pub mod agenda;
pub mod config;
pub mod run;

use std::sync::Arc;

use icalremind_providers::LiveCalendar;

use crate::config::ClientConfig;
use crate::delivery::Target;
use crate::error::ClientResult;

/// Builds one live calendar and delivery target per configured calendar.
pub(crate) fn build_targets(config: &ClientConfig) -> ClientResult<Vec<Target>> {
    config
        .calendars
        .iter()
        .map(|settings| {
            let source = icalremind_providers::source_for(settings.source_config()?)?;
            Target::from_settings(settings, Arc::new(LiveCalendar::new(source)))
        })
        .collect()
}
