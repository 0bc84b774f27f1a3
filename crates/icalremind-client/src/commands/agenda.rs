//! The `agenda` command: print upcoming events and their reminders.

use chrono::DateTime;
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;

use icalremind_core::{DAY, Event, day_start};
use icalremind_providers::Calendar;
use icalremind_server::now_in;

use crate::commands::build_targets;
use crate::config::ClientConfig;
use crate::delivery::human_duration;
use crate::error::ClientResult;

/// Fetches each calendar once and prints the next `days` days of events.
pub async fn agenda(config: &ClientConfig, days: u32) -> ClientResult<()> {
    config.validate()?;

    let zone = config.zone()?;
    let start = day_start(&now_in(&zone));
    let end = start + DAY * i32::try_from(days.max(1)).unwrap_or(i32::MAX);
    let opts = config.events_options();
    let cancel = CancellationToken::new();

    for target in build_targets(config)? {
        target.calendar.refresh(&cancel).await?;
        let events = target.calendar.events_between(&start, &end, &opts);
        print!("{}", render(&target.name, &events, &zone));
    }

    Ok(())
}

/// Formats one calendar's events, one line per event followed by its
/// reminders.
pub fn render(name: &str, events: &[Event], zone: &Tz) -> String {
    let mut out = format!("{}\n", name);
    if events.is_empty() {
        out.push_str("  (no events)\n");
        return out;
    }

    for event in events {
        out.push_str(&format!("  {}  {}", format_time(&event.starts_at, zone), event.summary));
        if !event.location.is_empty() {
            out.push_str(&format!(" ({})", event.location));
        }
        if event.status.is_cancelled() {
            out.push_str(" [cancelled]");
        }
        out.push('\n');

        for reminder in &event.reminders {
            let lead = reminder.lead_time(&event.starts_at);
            out.push_str(&format!(
                "      remind {} ({} before, {})\n",
                reminder.remind_at.with_timezone(zone).format("%H:%M"),
                human_duration(lead),
                reminder.action
            ));
        }
    }
    out
}

fn format_time(t: &DateTime<Tz>, zone: &Tz) -> String {
    t.with_timezone(zone).format("%a %Y-%m-%d %H:%M").to_string()
}
