//! Event types for calendar queries.
//!
//! This module provides the in-memory event model:
//! - [`Event`]: one concrete occurrence of a calendar event
//! - [`Reminder`]: a point in time at which an event should be announced
//! - [`EventStatus`] and [`ReminderAction`]: iCalendar status and action tags
//!
//! Events are built fresh for every query and are never shared between
//! queries.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use serde::Serialize;

use crate::time::TimeWindow;

/// The status of an event, as defined by the iCalendar `STATUS` property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// The event is tentative.
    Tentative,
    /// The event is confirmed.
    Confirmed,
    /// The event was cancelled.
    Cancelled,
    /// No status, or a status we don't recognize.
    #[default]
    Unknown,
}

impl EventStatus {
    /// Parses an iCalendar status value. Unrecognized values map to `Unknown`.
    pub fn from_ical(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "TENTATIVE" => Self::Tentative,
            "CONFIRMED" => Self::Confirmed,
            "CANCELLED" => Self::Cancelled,
            _ => Self::Unknown,
        }
    }

    /// Returns the iCalendar representation, or an empty string for `Unknown`.
    pub fn as_ical(&self) -> &'static str {
        match self {
            Self::Tentative => "TENTATIVE",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "",
        }
    }

    /// Returns true if the event was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A reminder action tag.
///
/// iCalendar defines `AUDIO`, `DISPLAY` and `EMAIL`; anything else is a
/// custom action understood by the delivery side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ReminderAction(String);

impl ReminderAction {
    /// Play a sound.
    pub const AUDIO: &'static str = "AUDIO";
    /// Display a message.
    pub const DISPLAY: &'static str = "DISPLAY";
    /// Send an email.
    pub const EMAIL: &'static str = "EMAIL";

    /// Creates an action tag.
    pub fn new(action: impl Into<String>) -> Self {
        Self(action.into())
    }

    /// The `DISPLAY` action, used when nothing else is configured.
    pub fn display() -> Self {
        Self::new(Self::DISPLAY)
    }

    /// Returns the tag as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ReminderAction {
    fn default() -> Self {
        Self::display()
    }
}

impl fmt::Display for ReminderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReminderAction {
    fn from(action: &str) -> Self {
        Self::new(action)
    }
}

/// A calendar event reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reminder {
    /// What kind of reminder this is.
    pub action: ReminderAction,
    /// When the reminder should fire. May be before or after the event start.
    pub remind_at: DateTime<Tz>,
}

impl Reminder {
    /// Creates a reminder.
    pub fn new(action: impl Into<ReminderAction>, remind_at: DateTime<Tz>) -> Self {
        Self {
            action: action.into(),
            remind_at,
        }
    }

    /// Returns how long before `starts_at` this reminder fires. Negative if
    /// the reminder fires after the start.
    pub fn lead_time(&self, starts_at: &DateTime<Tz>) -> Duration {
        *starts_at - self.remind_at
    }
}

/// One concrete occurrence of a calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// When the occurrence starts.
    pub starts_at: DateTime<Tz>,
    /// When the occurrence ends.
    pub ends_at: DateTime<Tz>,
    /// Event title.
    pub summary: String,
    /// Event location.
    pub location: String,
    /// Event description.
    pub description: String,
    /// Event status.
    pub status: EventStatus,
    /// Reminders materialized for this occurrence.
    pub reminders: Vec<Reminder>,
}

impl Event {
    /// Creates an event with the given bounds and no other data.
    pub fn new(starts_at: DateTime<Tz>, ends_at: DateTime<Tz>) -> Self {
        Self {
            starts_at,
            ends_at,
            summary: String::new(),
            location: String::new(),
            description: String::new(),
            status: EventStatus::Unknown,
            reminders: Vec::new(),
        }
    }

    /// Builder: set summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Builder: set location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Builder: set description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder: set status.
    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    /// Builder: set reminders.
    pub fn with_reminders(mut self, reminders: Vec<Reminder>) -> Self {
        self.reminders = reminders;
        self
    }

    /// Returns the duration of the occurrence.
    pub fn duration(&self) -> Duration {
        self.ends_at - self.starts_at
    }

    /// Returns true if the event starts strictly inside `(start, end)`.
    ///
    /// If `include_reminders` is set, the event also matches when any of its
    /// reminders fires strictly inside the same interval.
    pub fn within(&self, start: &DateTime<Tz>, end: &DateTime<Tz>, include_reminders: bool) -> bool {
        let window = TimeWindow {
            start: *start,
            end: *end,
        };

        if window.contains_open(&self.starts_at) {
            return true;
        }

        include_reminders
            && self
                .reminders
                .iter()
                .any(|r| window.contains_open(&r.remind_at))
    }
}

/// Compares two events by start instant.
pub fn compare_events(a: &Event, b: &Event) -> Ordering {
    a.starts_at.cmp(&b.starts_at)
}

/// Returns the trigger times of the given reminders.
pub fn reminder_times(reminders: &[Reminder]) -> Vec<DateTime<Tz>> {
    reminders.iter().map(|r| r.remind_at).collect()
}

/// Calculates reminder times for an event starting at `starts_at`. Every
/// duration is subtracted from the start.
pub fn calculate_reminder_times(starts_at: &DateTime<Tz>, durations: &[Duration]) -> Vec<DateTime<Tz>> {
    durations.iter().map(|d| *starts_at - *d).collect()
}

/// Creates one reminder per lead-time duration, all tagged with `action`.
pub fn reminders_from_durations(
    starts_at: &DateTime<Tz>,
    durations: &[Duration],
    action: &ReminderAction,
) -> Vec<Reminder> {
    calculate_reminder_times(starts_at, durations)
        .into_iter()
        .map(|remind_at| Reminder::new(action.clone(), remind_at))
        .collect()
}

/// Returns the reminder with the most lead time (the smallest `remind_at`).
///
/// Returns `None` for an empty list. Callers that widen a query by the
/// furthest lead time must not widen at all in that case.
pub fn furthest_reminder(reminders: &[Reminder]) -> Option<&Reminder> {
    reminders.iter().min_by_key(|r| r.remind_at)
}
