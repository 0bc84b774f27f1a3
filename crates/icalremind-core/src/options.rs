//! Options controlling how calendars answer event queries.

use std::fmt;
use std::sync::Arc;

use chrono::Duration;

use crate::event::{Event, Reminder, ReminderAction, reminders_from_durations};

/// Extracts reminders from an event.
///
/// iCalendar has no single standard way to express reminders that every
/// producer follows, so extraction is pluggable. The function is called once
/// per materialized occurrence.
pub type ReminderParser = Arc<dyn Fn(&Event) -> Vec<Reminder> + Send + Sync>;

/// Options for calendar event queries.
#[derive(Clone, Default)]
pub struct EventsOptions {
    /// Lead times for reminders added to every event. Each duration is
    /// subtracted from the event's start.
    pub default_reminders: Vec<Duration>,
    /// Action tag for default reminders. `DISPLAY` when unset.
    pub default_reminder_action: Option<ReminderAction>,
    /// Custom reminder extraction, applied after the defaults.
    pub reminder_parser: Option<ReminderParser>,
    /// Also match events whose reminders fall inside the queried range.
    pub include_reminders: bool,
    /// Skip events whose own status is cancelled.
    pub exclude_cancelled: bool,
}

impl fmt::Debug for EventsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventsOptions")
            .field("default_reminders", &self.default_reminders)
            .field("default_reminder_action", &self.default_reminder_action)
            .field("reminder_parser", &self.reminder_parser.is_some())
            .field("include_reminders", &self.include_reminders)
            .field("exclude_cancelled", &self.exclude_cancelled)
            .finish()
    }
}

impl EventsOptions {
    /// Creates options with nothing enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set default reminder lead times.
    pub fn with_default_reminders(mut self, durations: Vec<Duration>) -> Self {
        self.default_reminders = durations;
        self
    }

    /// Builder: set the action tag for default reminders.
    pub fn with_default_reminder_action(mut self, action: impl Into<ReminderAction>) -> Self {
        self.default_reminder_action = Some(action.into());
        self
    }

    /// Builder: set a custom reminder extraction function.
    pub fn with_reminder_parser<F>(mut self, parser: F) -> Self
    where
        F: Fn(&Event) -> Vec<Reminder> + Send + Sync + 'static,
    {
        self.reminder_parser = Some(Arc::new(parser));
        self
    }

    /// Builder: match events by their reminders too.
    pub fn with_include_reminders(mut self, include: bool) -> Self {
        self.include_reminders = include;
        self
    }

    /// Builder: skip cancelled events.
    pub fn with_exclude_cancelled(mut self, exclude: bool) -> Self {
        self.exclude_cancelled = exclude;
        self
    }

    /// Returns the action used for default reminders.
    pub fn reminder_action(&self) -> ReminderAction {
        self.default_reminder_action.clone().unwrap_or_default()
    }

    /// Materializes the reminders for `event`.
    ///
    /// Default reminders come first in configured order, followed by whatever
    /// the custom parser returns. Duplicates are kept.
    pub fn event_reminders(&self, event: &Event) -> Vec<Reminder> {
        let mut reminders = reminders_from_durations(
            &event.starts_at,
            &self.default_reminders,
            &self.reminder_action(),
        );

        if let Some(ref parser) = self.reminder_parser {
            reminders.extend(parser(event));
        }

        reminders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use chrono_tz::{Tz, UTC};

    fn at(h: u32, m: u32) -> DateTime<Tz> {
        UTC.with_ymd_and_hms(2025, 2, 5, h, m, 0).unwrap()
    }

    #[test]
    fn defaults_use_display_action() {
        let opts = EventsOptions::new().with_default_reminders(vec![Duration::minutes(10)]);
        let reminders = opts.event_reminders(&Event::new(at(10, 0), at(11, 0)));

        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].action.as_str(), ReminderAction::DISPLAY);
        assert_eq!(reminders[0].remind_at, at(9, 50));
    }

    #[test]
    fn defaults_come_before_parsed_reminders() {
        let opts = EventsOptions::new()
            .with_default_reminders(vec![Duration::minutes(5), Duration::zero()])
            .with_default_reminder_action("WEBHOOK")
            .with_reminder_parser(|e: &Event| {
                vec![Reminder::new(ReminderAction::EMAIL, e.starts_at - Duration::days(1))]
            });

        let reminders = opts.event_reminders(&Event::new(at(10, 0), at(11, 0)));
        let actions: Vec<_> = reminders.iter().map(|r| r.action.as_str()).collect();

        assert_eq!(actions, vec!["WEBHOOK", "WEBHOOK", "EMAIL"]);
        assert_eq!(reminders[0].remind_at, at(9, 55));
        assert_eq!(reminders[1].remind_at, at(10, 0));
        assert_eq!(reminders[2].remind_at, at(10, 0) - Duration::days(1));
    }

    #[test]
    fn duplicates_are_kept() {
        let opts = EventsOptions::new()
            .with_default_reminders(vec![Duration::zero()])
            .with_reminder_parser(|e: &Event| vec![Reminder::new(ReminderAction::DISPLAY, e.starts_at)]);

        let reminders = opts.event_reminders(&Event::new(at(10, 0), at(11, 0)));
        assert_eq!(reminders.len(), 2);
        assert_eq!(reminders[0], reminders[1]);
    }

    #[test]
    fn no_reminders_by_default() {
        let opts = EventsOptions::default();
        assert!(opts.event_reminders(&Event::new(at(10, 0), at(11, 0))).is_empty());
        assert!(!opts.include_reminders);
        assert!(!opts.exclude_cancelled);
    }

    #[test]
    fn debug_hides_parser() {
        let opts = EventsOptions::new().with_reminder_parser(|_: &Event| Vec::new());
        let debug = format!("{:?}", opts);
        assert!(debug.contains("reminder_parser: true"));
    }
}
