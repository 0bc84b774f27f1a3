//! Wall-clock helpers for the notifier loop.
//!
//! Tokio timers run on a monotonic clock, while reminders are wall-clock
//! instants. Every deadline here is recomputed from the wall clock when it
//! is armed.

use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::time::{Instant, Sleep};
use tracing::trace;

use icalremind_core::next_day_start;

/// Returns the current time in `zone`.
pub fn now_in(zone: &Tz) -> DateTime<Tz> {
    Utc::now().with_timezone(zone)
}

/// Returns how long to wait until `deadline`, or zero if it has passed.
pub fn until(deadline: &DateTime<Tz>) -> Duration {
    deadline.signed_duration_since(Utc::now()).to_std().unwrap_or_default()
}

/// Converts a wall-clock deadline into a tokio instant.
pub fn instant_for(deadline: &DateTime<Tz>) -> Instant {
    Instant::now() + until(deadline)
}

/// Returns the zone named by the `TZ` environment variable, or UTC.
pub fn default_zone() -> Tz {
    std::env::var("TZ")
        .ok()
        .and_then(|name| name.trim_start_matches(':').parse().ok())
        .unwrap_or(Tz::UTC)
}

/// Ticks at every local midnight in a zone.
///
/// The pending sleep lives inside the ticker, so dropping a `tick()` future
/// inside `select!` does not lose the deadline.
#[derive(Debug)]
pub struct MidnightTicker {
    zone: Tz,
    deadline: DateTime<Tz>,
    sleep: Pin<Box<Sleep>>,
}

impl MidnightTicker {
    /// Creates a ticker armed for the next midnight in `zone`.
    pub fn new(zone: Tz) -> Self {
        let deadline = next_day_start(&now_in(&zone));
        let sleep = Box::pin(tokio::time::sleep_until(instant_for(&deadline)));
        Self {
            zone,
            deadline,
            sleep,
        }
    }

    /// Returns the zone this ticker follows.
    pub fn zone(&self) -> Tz {
        self.zone
    }

    /// Returns the midnight the ticker is currently armed for.
    pub fn deadline(&self) -> DateTime<Tz> {
        self.deadline
    }

    /// Waits for the armed midnight, re-arms for the following one and
    /// returns the current time in the ticker's zone.
    pub async fn tick(&mut self) -> DateTime<Tz> {
        self.sleep.as_mut().await;

        let now = now_in(&self.zone);
        self.deadline = next_day_start(&now);
        self.sleep.as_mut().reset(instant_for(&self.deadline));
        trace!(next = %self.deadline, "Midnight ticker re-armed");
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Timelike};

    #[test]
    fn until_past_is_zero() {
        let past = now_in(&Tz::UTC) - ChronoDuration::minutes(5);
        assert_eq!(until(&past), Duration::ZERO);
    }

    #[test]
    fn until_future_is_positive() {
        let future = now_in(&Tz::UTC) + ChronoDuration::minutes(5);
        let wait = until(&future);
        assert!(wait > Duration::from_secs(290));
        assert!(wait <= Duration::from_secs(300));
    }

    #[tokio::test]
    async fn ticker_arms_for_local_midnight() {
        let zone: Tz = "Asia/Tokyo".parse().unwrap();
        let ticker = MidnightTicker::new(zone);
        let deadline = ticker.deadline();

        assert_eq!(ticker.zone(), zone);
        assert_eq!(deadline.timezone(), zone);
        assert_eq!((deadline.hour(), deadline.minute(), deadline.second()), (0, 0, 0));
        assert!(deadline > now_in(&zone));
        assert!(deadline - now_in(&zone) <= ChronoDuration::days(1));
    }

    #[test]
    fn next_midnight_follows_dst() {
        let zone: Tz = "America/Los_Angeles".parse().unwrap();
        // The night before spring forward.
        let evening = zone.with_ymd_and_hms(2025, 3, 8, 22, 0, 0).unwrap();
        let midnight = next_day_start(&evening);
        assert_eq!(midnight, zone.with_ymd_and_hms(2025, 3, 9, 0, 0, 0).unwrap());
        assert_eq!(midnight - evening, ChronoDuration::hours(2));
    }
}
