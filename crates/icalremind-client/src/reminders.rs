//! Reminders written into event descriptions.
//!
//! An event can ask for extra reminders in plain text, for example
//! "Remind on Discord 15 minutes before the event." or
//! "Remind 1 hour before the event.". Each phrase becomes a reminder tagged
//! [`WEBHOOK_ACTION`].

use std::sync::LazyLock;

use chrono::Duration;
use regex::Regex;
use tracing::warn;

use icalremind_core::{Event, Reminder};

/// Action tag for reminders requested in a description.
pub const WEBHOOK_ACTION: &str = "WEBHOOK";

static REMINDER_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Remind(?: on \w+)? (.+?) before the event\.")
        .expect("REMINDER_PHRASE should compile - this is a bug")
});

static NUMBER_UNIT_GAP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d)\s+([a-zA-Z])")
        .expect("NUMBER_UNIT_GAP should compile - this is a bug")
});

/// Extracts the reminders requested in `event`'s description.
///
/// Phrases whose duration cannot be understood are logged and skipped.
pub fn description_reminders(event: &Event) -> Vec<Reminder> {
    REMINDER_PHRASE
        .captures_iter(&event.description)
        .filter_map(|caps| {
            let phrase = caps.get(1)?.as_str();
            match parse_lead_time(phrase) {
                Some(lead) => Some(Reminder::new(WEBHOOK_ACTION, event.starts_at - lead)),
                None => {
                    warn!(
                        event = %event.summary,
                        duration = %phrase,
                        "Failed to parse reminder duration"
                    );
                    None
                }
            }
        })
        .collect()
}

/// Removes reminder phrases from a description.
pub fn strip_reminder_phrases(description: &str) -> String {
    REMINDER_PHRASE.replace_all(description, "").trim().to_string()
}

/// Parses a lead time such as "15 minutes", "an hour" or "1 hour and 30 minutes".
pub fn parse_lead_time(phrase: &str) -> Option<Duration> {
    let normalized = phrase
        .trim()
        .to_ascii_lowercase()
        .replace(',', " ")
        .replace(" and ", " ");
    let normalized = match normalized.split_once(' ') {
        Some(("a" | "an" | "one", rest)) => format!("1 {}", rest),
        _ => normalized,
    };
    let normalized = NUMBER_UNIT_GAP.replace_all(&normalized, "$1$2");

    let parsed = humantime::parse_duration(&normalized).ok()?;
    Duration::from_std(parsed).ok()
}
