//! Core types: events, reminders, query options, time helpers, tracing

pub mod event;
pub mod options;
pub mod time;
pub mod tracing;

pub use event::{
    Event, EventStatus, Reminder, ReminderAction, calculate_reminder_times, compare_events,
    furthest_reminder, reminder_times, reminders_from_durations,
};
pub use options::{EventsOptions, ReminderParser};
pub use time::{DAY, TimeWindow, assert_same_zone, day_start, midnight, next_day_start, resolve_local};
pub use self::tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
