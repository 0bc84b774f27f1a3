//! The calendar capability.
//!
//! A [`Calendar`] answers windowed event queries. Calendars are tracked by
//! identity rather than content, which is what [`CalendarRef`] provides.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Duration};
use chrono_tz::Tz;

use icalremind_core::{Event, EventsOptions, TimeWindow};

/// Something that can list its events between two instants.
pub trait Calendar: Send + Sync + fmt::Debug {
    /// Returns the events between `start` and `end`, sorted by start time.
    ///
    /// A non-recurring event matches when it starts strictly inside
    /// `(start, end)`, or when `opts.include_reminders` is set and one of its
    /// reminders fires strictly inside that interval. Recurring events yield
    /// every occurrence enumerated for the window.
    ///
    /// # Panics
    ///
    /// Panics if `start` and `end` are in different zones.
    fn events_between(
        &self,
        start: &DateTime<Tz>,
        end: &DateTime<Tz>,
        opts: &EventsOptions,
    ) -> Vec<Event>;

    /// Same as [`Calendar::events_between`] over the window from `t` to
    /// `t + duration`, with the same open-interval matching.
    fn events_within(&self, t: &DateTime<Tz>, duration: Duration, opts: &EventsOptions) -> Vec<Event> {
        let window = TimeWindow::from_duration(*t, duration);
        self.events_between(&window.start, &window.end, opts)
    }
}

/// A shared calendar compared by identity.
///
/// Two refs are equal only if they point to the same instance, even when the
/// calendars behind them hold identical data.
#[derive(Clone)]
pub struct CalendarRef(Arc<dyn Calendar>);

impl CalendarRef {
    /// Wraps a shared calendar.
    pub fn new(calendar: Arc<dyn Calendar>) -> Self {
        Self(calendar)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast::<()>()
    }
}

impl<C: Calendar + 'static> From<Arc<C>> for CalendarRef {
    fn from(calendar: Arc<C>) -> Self {
        Self(calendar)
    }
}

impl Deref for CalendarRef {
    type Target = dyn Calendar;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl PartialEq for CalendarRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.addr(), other.addr())
    }
}

impl Eq for CalendarRef {}

impl Hash for CalendarRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for CalendarRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
