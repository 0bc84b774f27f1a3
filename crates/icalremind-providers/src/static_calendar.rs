//! Event queries over one immutable iCalendar document.

use std::sync::Arc;

use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use tracing::{debug, trace};

use icalremind_core::{Event, EventsOptions, assert_same_zone, compare_events, furthest_reminder};

use crate::calendar::Calendar;
use crate::document::{CalendarDocument, SourceEvent};
use crate::error::ProviderResult;
use crate::expander::{OccurrenceExpander, RRuleExpander};

/// A calendar backed by a single parsed document.
///
/// The document is never modified, so a `StaticCalendar` can be shared freely
/// between threads and published as a snapshot.
#[derive(Debug, Clone)]
pub struct StaticCalendar {
    document: Arc<CalendarDocument>,
    expander: Arc<dyn OccurrenceExpander>,
}

impl StaticCalendar {
    /// Creates a calendar over `document` using the default expander.
    pub fn new(document: CalendarDocument) -> Self {
        Self {
            document: Arc::new(document),
            expander: Arc::new(RRuleExpander::default()),
        }
    }

    /// Parses `raw` iCalendar text into a calendar.
    ///
    /// # Errors
    ///
    /// Returns a `Malformed` error if `raw` is not iCalendar.
    pub fn parse(raw: &str) -> ProviderResult<Self> {
        CalendarDocument::parse(raw).map(Self::new)
    }

    /// Replaces the occurrence expander.
    pub fn with_expander(mut self, expander: Arc<dyn OccurrenceExpander>) -> Self {
        self.expander = expander;
        self
    }

    /// Returns the underlying document.
    pub fn document(&self) -> &CalendarDocument {
        &self.document
    }

    /// Returns true if both calendars serialize to the same canonical text.
    ///
    /// This is a syntactic comparison: reordered but equivalent documents
    /// count as different.
    pub fn same_content(&self, other: &StaticCalendar) -> bool {
        Arc::ptr_eq(&self.document, &other.document)
            || self.document.serialize() == other.document.serialize()
    }

    fn build_event(
        source: &SourceEvent<'_>,
        starts_at: DateTime<Tz>,
        ends_at: DateTime<Tz>,
        opts: &EventsOptions,
    ) -> Event {
        let mut event = Event::new(starts_at, ends_at)
            .with_summary(source.summary())
            .with_location(source.location())
            .with_description(source.description())
            .with_status(source.status());
        event.reminders = opts.event_reminders(&event);
        event
    }

    /// Upper bound of the recurrence search for `first`.
    ///
    /// With reminders included, an occurrence starting after `end` may still
    /// have a reminder before it, so the search reaches as far past `end` as
    /// the furthest reminder leads the first occurrence. Never shrinks.
    fn search_end(first: &Event, end: &DateTime<Tz>, opts: &EventsOptions) -> DateTime<Tz> {
        if !opts.include_reminders {
            return *end;
        }
        match furthest_reminder(&first.reminders) {
            Some(reminder) => {
                let lead = reminder.lead_time(&first.starts_at);
                *end + lead.max(Duration::zero())
            }
            None => *end,
        }
    }
}

impl Calendar for StaticCalendar {
    fn events_between(
        &self,
        start: &DateTime<Tz>,
        end: &DateTime<Tz>,
        opts: &EventsOptions,
    ) -> Vec<Event> {
        assert_same_zone(start, end);
        let zone = start.timezone();

        debug!(start = %start, end = %end, "Searching events");

        let mut chosen = Vec::with_capacity(8);

        for source in self.document.events() {
            if opts.exclude_cancelled && source.status().is_cancelled() {
                continue;
            }

            let (starts_at, ends_at) = match (source.start(&zone), source.end(&zone)) {
                (Ok(starts_at), Ok(ends_at)) => (starts_at, ends_at),
                (Err(e), _) | (_, Err(e)) => {
                    debug!(uid = ?source.uid(), error = %e, "Skipping malformed event");
                    continue;
                }
            };

            let first = Self::build_event(&source, starts_at, ends_at, opts);

            if !source.is_recurring() {
                if first.within(start, end, opts.include_reminders) {
                    chosen.push(first);
                }
                continue;
            }

            let duration = first.duration();
            let search_end = Self::search_end(&first, end, opts);

            match self.expander.expand(&source, &zone, start, &search_end) {
                Ok(starts) => {
                    trace!(uid = ?source.uid(), count = starts.len(), "Adding occurrences");
                    chosen.extend(
                        starts
                            .into_iter()
                            .map(|s| Self::build_event(&source, s, s + duration, opts)),
                    );
                }
                Err(e) => {
                    debug!(uid = ?source.uid(), error = %e, "Skipping event with malformed recurrence");
                }
            }
        }

        chosen.sort_by(compare_events);
        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::Los_Angeles;
    use chrono_tz::Etc::GMTPlus8;
    use chrono_tz::UTC;
    use icalremind_core::{Reminder, ReminderAction, TimeWindow};

    /// Weekly Tuesday lab, first held 2022-08-30.
    const WEEKLY_ICS: &str = "BEGIN:VCALENDAR\r\n\
        VERSION:2.0\r\n\
        PRODID:-//Test//Test//EN\r\n\
        BEGIN:VEVENT\r\n\
        UID:geol-101l\r\n\
        DTSTART;TZID=America/Los_Angeles:20220830T170000\r\n\
        DTEND;TZID=America/Los_Angeles:20220830T195000\r\n\
        RRULE:FREQ=WEEKLY;BYDAY=TU\r\n\
        SUMMARY:GEOL 101L\r\n\
        LOCATION:MH 203\r\n\
        STATUS:CONFIRMED\r\n\
        END:VEVENT\r\n\
        END:VCALENDAR\r\n";

    fn weekly() -> StaticCalendar {
        StaticCalendar::parse(WEEKLY_ICS).unwrap()
    }

    fn without_rrule() -> StaticCalendar {
        StaticCalendar::parse(&WEEKLY_ICS.replace("RRULE:FREQ=WEEKLY;BYDAY=TU\r\n", "")).unwrap()
    }

    /// 2022-11-01 03:03:29 at UTC-8, close to the DST change.
    fn november_now() -> DateTime<Tz> {
        GMTPlus8.with_ymd_and_hms(2022, 11, 1, 3, 3, 29).unwrap()
    }

    fn first_day() -> DateTime<Tz> {
        GMTPlus8.with_ymd_and_hms(2022, 8, 30, 0, 0, 0).unwrap()
    }

    fn single(event: &str) -> StaticCalendar {
        StaticCalendar::parse(&format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\n{}END:VEVENT\r\nEND:VCALENDAR\r\n",
            event
        ))
        .unwrap()
    }

    fn utc(h: u32, m: u32) -> DateTime<Tz> {
        UTC.with_ymd_and_hms(2025, 2, 5, h, m, 0).unwrap()
    }

    #[test]
    fn recurring_event_today() {
        let cal = weekly();
        let now = november_now();

        let events = cal.events_between(&now, &(now + Duration::hours(24)), &EventsOptions::default());

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.starts_at, Los_Angeles.with_ymd_and_hms(2022, 11, 1, 17, 0, 0).unwrap());
        assert_eq!(event.ends_at, Los_Angeles.with_ymd_and_hms(2022, 11, 1, 19, 50, 0).unwrap());
        assert_eq!(event.summary, "GEOL 101L");
        assert_eq!(event.location, "MH 203");
        assert_eq!(event.description, "");
        assert!(event.reminders.is_empty());
        assert_eq!(event.starts_at.timezone(), GMTPlus8);
    }

    #[test]
    fn events_within_matches_events_between() {
        let cal = weekly();
        let now = november_now();
        let opts = EventsOptions::default();

        assert_eq!(
            cal.events_between(&now, &(now + Duration::hours(24)), &opts),
            cal.events_within(&now, Duration::hours(24), &opts)
        );
    }

    #[test]
    fn recurrence_this_week_and_next() {
        let cal = weekly();
        let now = first_day();
        let opts = EventsOptions::default();

        let today = cal.events_between(&now, &(now + Duration::days(1)), &opts);
        assert_eq!(today.len(), 1);

        let this_week = cal.events_between(&now, &(now + Duration::days(7)), &opts);
        assert_eq!(this_week, today);

        let next_week = cal.events_between(&(now + Duration::days(7)), &(now + Duration::days(14)), &opts);
        assert_eq!(next_week.len(), 1);
        assert_eq!(next_week[0].starts_at, today[0].starts_at + Duration::days(7));
        assert_eq!(next_week[0].ends_at, today[0].ends_at + Duration::days(7));
    }

    #[test]
    fn recurrence_keeps_wall_clock_across_dst() {
        let cal = weekly();
        let now = november_now().with_timezone(&Los_Angeles);
        let opts = EventsOptions::default();

        let before = cal.events_between(&now, &(now + Duration::days(1)), &opts);
        assert_eq!(before[0].starts_at.to_rfc3339(), "2022-11-01T17:00:00-07:00");

        let after = cal.events_between(&(now + Duration::days(7)), &(now + Duration::days(8)), &opts);
        assert_eq!(after[0].starts_at.to_rfc3339(), "2022-11-08T17:00:00-08:00");
    }

    #[test]
    fn non_recurring_only_in_its_week() {
        let cal = without_rrule();
        let now = first_day();
        let opts = EventsOptions::default();

        assert_eq!(cal.events_between(&now, &(now + Duration::days(7)), &opts).len(), 1);
        assert!(cal.events_between(&(now + Duration::days(7)), &(now + Duration::days(14)), &opts).is_empty());
    }

    #[test]
    fn recurring_reminders_widen_search() {
        let cal = weekly();
        let now = november_now();
        let opts = EventsOptions::new()
            .with_include_reminders(true)
            .with_reminder_parser(|e: &Event| {
                vec![
                    Reminder::new(ReminderAction::DISPLAY, e.starts_at - Duration::minutes(10)),
                    Reminder::new(ReminderAction::EMAIL, e.starts_at - Duration::days(1)),
                ]
            });

        let today = cal.events_between(&now, &(now + Duration::days(1)), &opts);
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].reminders.len(), 2);

        // Yesterday's window only holds the one-day reminder of today's lab.
        let yesterday = cal.events_between(&(now - Duration::days(1)), &now, &opts);
        assert_eq!(yesterday.len(), 1);
        assert_eq!(yesterday[0].reminders.len(), 2);
        assert_eq!(yesterday[0].starts_at, today[0].starts_at);
    }

    #[test]
    fn widened_recurrence_keeps_occurrences_outside_window() {
        let cal = single(
            "UID:d\r\nDTSTART:20250205T110000Z\r\nDTEND:20250205T113000Z\r\nRRULE:FREQ=DAILY\r\n",
        );
        let opts = EventsOptions::new()
            .with_include_reminders(true)
            .with_default_reminders(vec![Duration::zero(), Duration::days(1)]);
        let (start, end) = (utc(0, 0), utc(6, 0));

        // The one-day reminder stretches the search to 06:00 tomorrow, which
        // enumerates today's 11:00 occurrence. Neither its start nor any of its
        // reminders lands in the window, yet it is returned.
        let events = cal.events_between(&start, &end, &opts);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.starts_at, utc(11, 0));
        assert!(!event.within(&start, &end, true));
        assert!(
            event
                .reminders
                .iter()
                .all(|r| r.remind_at < start || r.remind_at >= end)
        );
    }

    #[test]
    fn default_reminder_in_window() {
        let cal = single("UID:a\r\nDTSTART:20250205T110000Z\r\nDTEND:20250205T120000Z\r\n");
        let opts = EventsOptions::new()
            .with_include_reminders(true)
            .with_default_reminders(vec![Duration::zero()]);

        let events = cal.events_between(&utc(10, 0), &utc(12, 0), &opts);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reminders.len(), 1);
        assert_eq!(events[0].reminders[0].remind_at, utc(11, 0));
        assert_eq!(events[0].reminders[0].action.as_str(), ReminderAction::DISPLAY);
    }

    #[test]
    fn non_recurring_matched_by_reminder_only_when_included() {
        let cal = single("UID:a\r\nDTSTART:20250205T140000Z\r\n");
        let reminders = EventsOptions::new().with_default_reminders(vec![Duration::hours(3)]);

        assert!(cal.events_between(&utc(10, 0), &utc(12, 0), &reminders).is_empty());

        let included = reminders.with_include_reminders(true);
        assert_eq!(cal.events_between(&utc(10, 0), &utc(12, 0), &included).len(), 1);
    }

    #[test]
    fn window_is_open() {
        let cal = single("UID:a\r\nDTSTART:20250205T100000Z\r\n");
        let opts = EventsOptions::default();

        assert!(cal.events_between(&utc(10, 0), &utc(12, 0), &opts).is_empty());
        assert!(cal.events_between(&utc(8, 0), &utc(10, 0), &opts).is_empty());
        assert_eq!(cal.events_between(&utc(9, 59), &utc(10, 1), &opts).len(), 1);
    }

    #[test]
    fn cancelled_events_can_be_excluded() {
        let cal = single("UID:a\r\nDTSTART:20250205T110000Z\r\nSTATUS:CANCELLED\r\n");
        let window = TimeWindow::day_of(&utc(0, 0));

        let all = cal.events_between(&window.start, &window.end, &EventsOptions::default());
        assert_eq!(all.len(), 1);
        assert!(all[0].status.is_cancelled());

        let opts = EventsOptions::new().with_exclude_cancelled(true);
        assert!(cal.events_between(&window.start, &window.end, &opts).is_empty());
    }

    #[test]
    fn malformed_events_are_skipped() {
        let cal = StaticCalendar::parse(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\n\
             BEGIN:VEVENT\r\nUID:broken\r\nSUMMARY:No start\r\nEND:VEVENT\r\n\
             BEGIN:VEVENT\r\nUID:bad-rule\r\nDTSTART:20250205T090000Z\r\nRRULE:FREQ=SOMETIMES\r\nEND:VEVENT\r\n\
             BEGIN:VEVENT\r\nUID:ok\r\nSUMMARY:Fine\r\nDTSTART:20250205T110000Z\r\nEND:VEVENT\r\n\
             END:VCALENDAR\r\n",
        )
        .unwrap();

        let events = cal.events_between(&utc(0, 0), &utc(23, 0), &EventsOptions::default());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].summary, "Fine");
    }

    #[test]
    fn results_are_sorted_and_repeatable() {
        let cal = StaticCalendar::parse(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\n\
             BEGIN:VEVENT\r\nUID:late\r\nDTSTART:20250205T150000Z\r\nEND:VEVENT\r\n\
             BEGIN:VEVENT\r\nUID:daily\r\nDTSTART:20250201T120000Z\r\nRRULE:FREQ=DAILY\r\nEND:VEVENT\r\n\
             BEGIN:VEVENT\r\nUID:early\r\nDTSTART:20250205T090000Z\r\nEND:VEVENT\r\n\
             END:VCALENDAR\r\n",
        )
        .unwrap();
        let opts = EventsOptions::default();

        let first = cal.events_between(&utc(0, 0), &utc(23, 0), &opts);
        let starts: Vec<_> = first.iter().map(|e| e.starts_at).collect();
        assert_eq!(starts, vec![utc(9, 0), utc(12, 0), utc(15, 0)]);

        assert_eq!(cal.events_between(&utc(0, 0), &utc(23, 0), &opts), first);
    }

    #[test]
    #[should_panic(expected = "same zone")]
    fn mismatched_zones_panic() {
        let start = november_now();
        let end = (start + Duration::days(1)).with_timezone(&UTC);
        weekly().events_between(&start, &end, &EventsOptions::default());
    }

    #[test]
    fn same_content() {
        let a = weekly();
        let b = weekly();
        let c = without_rrule();

        assert!(a.same_content(&a.clone()));
        assert!(a.same_content(&b));
        assert!(!a.same_content(&c));
    }
}
