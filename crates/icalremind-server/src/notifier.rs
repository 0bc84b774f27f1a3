//! The reminder scheduling loop.
//!
//! A [`Notifier`] tracks a set of calendars and delivers one
//! [`Notification`] per reminder that falls on the current local day, in
//! remind-at order. The queue is rebuilt from scratch at every local
//! midnight and whenever the notifier is invalidated.
//!
//! Only one loop drives the queue. Any number of tasks may call
//! [`Notifier::update`] or [`Notifier::invalidate`] while it runs.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::DateTime;
use chrono_tz::Tz;
use tokio::sync::{Notify, mpsc};
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use icalremind_core::{DAY, Event, EventsOptions, compare_events, day_start};
use icalremind_providers::CalendarRef;

use crate::clock::{self, MidnightTicker};
use crate::error::{ServerError, ServerResult};

/// A reminder that is due.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The calendar the event came from.
    pub calendar: CalendarRef,
    /// The occurrence being announced.
    pub event: Event,
    /// When the reminder was scheduled to fire.
    pub remind_at: DateTime<Tz>,
}

impl Notification {
    /// Returns how long before the event start this reminder fires.
    pub fn lead_time(&self) -> chrono::Duration {
        self.event.starts_at - self.remind_at
    }

    fn key(&self) -> DeliveryKey {
        (
            self.calendar.clone(),
            self.event.starts_at,
            self.event.summary.clone(),
            self.remind_at,
        )
    }
}

type DeliveryKey = (CalendarRef, DateTime<Tz>, String, DateTime<Tz>);

/// Notifications already handed out on the current local day.
///
/// Rebuilds re-derive the whole day, so anything recorded here is filtered
/// out again. The set empties when the day changes.
#[derive(Debug, Default)]
struct DeliveredToday {
    day: Option<DateTime<Tz>>,
    keys: HashSet<DeliveryKey>,
}

impl DeliveredToday {
    fn roll_over(&mut self, day: DateTime<Tz>) {
        if self.day != Some(day) {
            self.day = Some(day);
            self.keys.clear();
        }
    }

    fn record(&mut self, notification: &Notification) {
        self.keys.insert(notification.key());
    }

    fn contains(&self, notification: &Notification) -> bool {
        self.keys.contains(&notification.key())
    }
}

/// The calendars a [`Notifier`] watches.
#[derive(Debug, Default)]
pub struct NotifierState {
    calendars: HashSet<CalendarRef>,
}

impl NotifierState {
    /// Starts tracking `calendar`. Adding the same instance twice is a no-op.
    pub fn add_calendar(&mut self, calendar: impl Into<CalendarRef>) {
        self.calendars.insert(calendar.into());
    }

    /// Stops tracking `calendar`.
    pub fn remove_calendar(&mut self, calendar: &CalendarRef) {
        self.calendars.remove(calendar);
    }

    /// Returns true if `calendar` is tracked.
    pub fn contains(&self, calendar: &CalendarRef) -> bool {
        self.calendars.contains(calendar)
    }

    /// Returns the number of tracked calendars.
    pub fn len(&self) -> usize {
        self.calendars.len()
    }

    /// Returns true if no calendar is tracked.
    pub fn is_empty(&self) -> bool {
        self.calendars.is_empty()
    }

    /// Iterates over the tracked calendars in no particular order.
    pub fn calendars(&self) -> impl Iterator<Item = &CalendarRef> {
        self.calendars.iter()
    }
}

/// Notifier configuration.
#[derive(Debug, Clone)]
pub struct NotifierOptions {
    /// Options for the daily calendar queries.
    pub events: EventsOptions,
    /// Zone whose midnight starts a new day.
    pub zone: Tz,
    /// Drop reminders whose own time has passed, instead of delivering them
    /// late while their event has not started yet.
    pub skip_past_notifications: bool,
}

impl Default for NotifierOptions {
    fn default() -> Self {
        Self {
            events: EventsOptions::default(),
            zone: clock::default_zone(),
            skip_past_notifications: false,
        }
    }
}

impl NotifierOptions {
    /// Creates options with the given event query options.
    pub fn new(events: EventsOptions) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    /// Builder: set the zone.
    pub fn with_zone(mut self, zone: Tz) -> Self {
        self.zone = zone;
        self
    }

    /// Builder: skip reminders that are already past.
    pub fn with_skip_past_notifications(mut self, skip: bool) -> Self {
        self.skip_past_notifications = skip;
        self
    }
}

/// Schedules and delivers reminders for a set of calendars.
#[derive(Debug)]
pub struct Notifier {
    opts: NotifierOptions,
    state: Mutex<NotifierState>,
    invalidated: Notify,
    started: AtomicBool,
}

impl Notifier {
    /// Creates a notifier tracking no calendars.
    ///
    /// Reminders are always included in the daily queries, whatever
    /// `opts.events` says.
    pub fn new(mut opts: NotifierOptions) -> Self {
        opts.events.include_reminders = true;
        Self {
            opts,
            state: Mutex::new(NotifierState::default()),
            invalidated: Notify::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Returns the options in effect.
    pub fn options(&self) -> &NotifierOptions {
        &self.opts
    }

    /// Applies `mutator` to the tracked calendars, then invalidates.
    pub fn update<F>(&self, mutator: F)
    where
        F: FnOnce(&mut NotifierState),
    {
        mutator(&mut self.lock_state());
        self.invalidate();
    }

    /// Asks the loop to rebuild its queue.
    ///
    /// At most one request is pending at a time; calls made before the loop
    /// picks it up collapse into one.
    pub fn invalidate(&self) {
        self.invalidated.notify_one();
    }

    /// Runs the scheduling loop until `cancel` fires.
    ///
    /// Notifications are handed to `sink` one at a time. A slow receiver
    /// delays later notifications but never causes them to be dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Cancelled`] when `cancel` fires, and
    /// [`ServerError::SinkClosed`] if the receiver is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called more than once on the same notifier.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        sink: mpsc::Sender<Notification>,
    ) -> ServerResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            panic!("notifier cannot be reused");
        }

        let mut ticker = MidnightTicker::new(self.opts.zone);
        let mut queue = VecDeque::new();
        let mut delivered = DeliveredToday::default();
        let timer = tokio::time::sleep(std::time::Duration::ZERO);
        tokio::pin!(timer);
        let mut armed = false;

        info!(zone = %self.opts.zone, "Notifier started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Notifier cancelled");
                    return Err(ServerError::Cancelled);
                }
                now = ticker.tick() => {
                    debug!("Day boundary reached, rebuilding notifications");
                    queue = self.rebuild(&now, &mut delivered);
                    armed = self.arm(&mut queue, &now, timer.as_mut());
                }
                _ = self.invalidated.notified() => {
                    debug!("Calendars changed, rebuilding notifications");
                    let now = clock::now_in(&self.opts.zone);
                    queue = self.rebuild(&now, &mut delivered);
                    armed = self.arm(&mut queue, &now, timer.as_mut());
                }
                _ = &mut timer, if armed => {
                    armed = false;
                    let Some(next) = queue.pop_front() else {
                        continue;
                    };

                    let permit = tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("Notifier cancelled during delivery");
                            return Err(ServerError::Cancelled);
                        }
                        permit = sink.reserve() => permit.map_err(|_| ServerError::SinkClosed)?,
                    };

                    debug!(
                        event = %next.event.summary,
                        starts_at = %next.event.starts_at,
                        remind_at = %next.remind_at,
                        "Delivering notification"
                    );
                    delivered.record(&next);
                    permit.send(next);

                    let now = clock::now_in(&self.opts.zone);
                    armed = self.arm(&mut queue, &now, timer.as_mut());
                }
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, NotifierState> {
        // The state is a plain set; a panicking mutator cannot leave it torn.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Builds the queue for the day containing `now`, minus what was already
    /// delivered that day.
    fn rebuild(&self, now: &DateTime<Tz>, delivered: &mut DeliveredToday) -> VecDeque<Notification> {
        delivered.roll_over(day_start(now));
        let mut queue = self.notifications_for_day(now);
        queue.retain(|notification| {
            let sent = delivered.contains(notification);
            if sent {
                debug!(
                    event = %notification.event.summary,
                    remind_at = %notification.remind_at,
                    "Skipping delivered notification"
                );
            }
            !sent
        });
        queue
    }

    /// Builds the sorted queue for the local day containing `now`.
    fn notifications_for_day(&self, now: &DateTime<Tz>) -> VecDeque<Notification> {
        let start = day_start(now);
        let end = start + DAY;
        debug!(day_start = %start, day_end = %end, "Rebuilding notifications");

        let calendars: Vec<CalendarRef> = self.lock_state().calendars().cloned().collect();

        let mut events: Vec<(CalendarRef, Event)> = Vec::new();
        for calendar in calendars {
            debug!(calendar = ?calendar, "Searching calendar");
            for event in calendar.events_between(&start, &end, &self.opts.events) {
                if event.reminders.is_empty() {
                    continue;
                }
                debug!(event = %event.summary, "Event found");
                events.push((calendar.clone(), event));
            }
        }
        events.sort_by(|(_, a), (_, b)| compare_events(a, b));

        let mut notifications: Vec<Notification> = events
            .into_iter()
            .flat_map(|(calendar, event)| {
                event
                    .reminders
                    .iter()
                    .map(|reminder| Notification {
                        calendar: calendar.clone(),
                        event: event.clone(),
                        remind_at: reminder.remind_at,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        notifications.sort_by(|a, b| a.remind_at.cmp(&b.remind_at));

        for notification in &notifications {
            debug!(
                event = %notification.event.summary,
                remind_at = %notification.remind_at,
                "Notification queued"
            );
        }

        notifications.into()
    }

    /// Returns true if `notification` should be dropped at `now`.
    fn is_stale(&self, notification: &Notification, now: &DateTime<Tz>) -> bool {
        let relevant = if self.opts.skip_past_notifications {
            notification.remind_at
        } else {
            notification.event.starts_at
        };
        relevant <= *now
    }

    /// Drops stale entries from the head of `queue` and arms `timer` for the
    /// next one. Returns false if nothing is left to arm for.
    fn arm(
        &self,
        queue: &mut VecDeque<Notification>,
        now: &DateTime<Tz>,
        timer: std::pin::Pin<&mut Sleep>,
    ) -> bool {
        while let Some(head) = queue.front() {
            if !self.is_stale(head, now) {
                break;
            }
            debug!(
                event = %head.event.summary,
                remind_at = %head.remind_at,
                "Dropping past notification"
            );
            queue.pop_front();
        }

        let Some(next) = queue.front() else {
            debug!("No notifications queued, waiting for next day");
            return false;
        };

        debug!(
            next_reminder = %next.remind_at,
            next_event = %next.event.summary,
            "Next notification armed"
        );
        timer.reset(clock::instant_for(&next.remind_at));
        true
    }
}
