//! Time helpers for calendar queries.
//!
//! All timestamps in this workspace are [`DateTime<Tz>`] values carrying an
//! IANA zone from `chrono-tz`. This module provides:
//! - [`day_start`] / [`next_day_start`]: wall-clock day boundaries
//! - [`resolve_local`]: local date-time resolution that survives DST gaps
//! - [`TimeWindow`]: a query range whose bounds share one zone

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;

/// One day, as an absolute duration.
pub const DAY: Duration = Duration::days(1);

/// Longest DST gap we are willing to skip over when resolving local times.
const MAX_GAP_MINUTES: i64 = 180;

/// Resolves a naive local date-time in `zone` to an instant.
///
/// Ambiguous times (DST fold) resolve to the earlier instant. Times that do
/// not exist (DST gap) resolve to the first valid instant after them.
pub fn resolve_local(zone: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    if let Some(dt) = zone.from_local_datetime(&naive).earliest() {
        return Some(dt);
    }

    (1..=MAX_GAP_MINUTES)
        .map(|m| naive + Duration::minutes(m))
        .find_map(|shifted| zone.from_local_datetime(&shifted).earliest())
}

/// Returns midnight of `date` in `zone`.
pub fn midnight(zone: &Tz, date: NaiveDate) -> DateTime<Tz> {
    let naive = date.and_time(NaiveTime::default());
    resolve_local(zone, naive)
        // Every zone in the tz database has a valid instant within a few
        // hours of midnight.
        .unwrap_or_else(|| zone.from_utc_datetime(&naive))
}

/// Returns the start of the calendar day containing `t`, in `t`'s own zone.
///
/// The boundary is wall-clock based: a DST shift during the day does not
/// move it.
pub fn day_start(t: &DateTime<Tz>) -> DateTime<Tz> {
    midnight(&t.timezone(), t.date_naive())
}

/// Returns the start of the calendar day following the one containing `t`.
pub fn next_day_start(t: &DateTime<Tz>) -> DateTime<Tz> {
    let date = t.date_naive();
    let next = date.succ_opt().unwrap_or(date);
    midnight(&t.timezone(), next)
}

/// A time window for querying calendar events.
///
/// Both bounds share one zone. Whether the bounds are inclusive depends on
/// the query; see [`TimeWindow::contains_open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    /// Start of the window.
    pub start: DateTime<Tz>,
    /// End of the window.
    pub end: DateTime<Tz>,
}

impl TimeWindow {
    /// Creates a new time window.
    ///
    /// # Panics
    ///
    /// Panics if `start` and `end` are in different zones.
    pub fn new(start: DateTime<Tz>, end: DateTime<Tz>) -> Self {
        assert_same_zone(&start, &end);
        Self { start, end }
    }

    /// Creates a time window from a start time and duration.
    pub fn from_duration(start: DateTime<Tz>, duration: Duration) -> Self {
        let end = start + duration;
        Self { start, end }
    }

    /// Creates the window covering the day that contains `now`:
    /// `[day_start(now), day_start(now) + DAY)`.
    pub fn day_of(now: &DateTime<Tz>) -> Self {
        Self::from_duration(day_start(now), DAY)
    }

    /// Returns the zone shared by both bounds.
    pub fn zone(&self) -> Tz {
        self.start.timezone()
    }

    /// Returns the duration of this time window.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Checks if `t` falls strictly inside the window: `(start, end)`.
    pub fn contains_open(&self, t: &DateTime<Tz>) -> bool {
        *t > self.start && *t < self.end
    }
}

/// Asserts that two query bounds share one zone.
///
/// # Panics
///
/// Panics on mismatch; this is a programming error, not a runtime condition.
pub fn assert_same_zone(start: &DateTime<Tz>, end: &DateTime<Tz>) {
    assert!(
        start.timezone() == end.timezone(),
        "start and end must be in the same zone ({} != {})",
        start.timezone(),
        end.timezone()
    );
}
