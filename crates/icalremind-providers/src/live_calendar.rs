//! Calendars that follow a remote document.
//!
//! A [`LiveCalendar`] serves queries from the last published
//! [`StaticCalendar`] snapshot and replaces it when [`LiveCalendar::refresh`]
//! fetches a document with different content. Readers never wait for a
//! refresh; they see either the old snapshot or the new one.

use std::fmt;
use std::sync::Arc;

use chrono::DateTime;
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use icalremind_core::{Event, EventsOptions, assert_same_zone};

use crate::calendar::Calendar;
use crate::error::{ProviderError, ProviderResult};
use crate::expander::{OccurrenceExpander, RRuleExpander};
use crate::source::DocumentSource;
use crate::static_calendar::StaticCalendar;

/// The published snapshot, `None` until the first successful refresh.
pub type Snapshot = Option<Arc<StaticCalendar>>;

/// A calendar refreshed from a [`DocumentSource`].
pub struct LiveCalendar {
    source: Arc<dyn DocumentSource>,
    expander: Arc<dyn OccurrenceExpander>,
    snapshot: watch::Sender<Snapshot>,
}

impl LiveCalendar {
    /// Creates a calendar with no snapshot yet.
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        let (snapshot, _) = watch::channel(None);
        Self {
            source,
            expander: Arc::new(RRuleExpander::default()),
            snapshot,
        }
    }

    /// Replaces the occurrence expander used by future snapshots.
    pub fn with_expander(mut self, expander: Arc<dyn OccurrenceExpander>) -> Self {
        self.expander = expander;
        self
    }

    /// Returns the name of the underlying source, usually its URL.
    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Returns the currently published snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Returns a receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    /// Fetches the document and publishes it if its content changed.
    ///
    /// Returns `Ok(true)` only if this call's snapshot was the one published.
    /// When another refresh published a snapshot while this one was fetching,
    /// this call reports `Ok(false)` and publishes nothing.
    ///
    /// # Errors
    ///
    /// Returns the fetch or parse error, or a `Cancelled` error if `cancel`
    /// fires first. The published snapshot is left untouched on error.
    pub async fn refresh(&self, cancel: &CancellationToken) -> ProviderResult<bool> {
        let raw = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ProviderError::cancelled("refresh cancelled")
                    .with_calendar(self.source_name()));
            }
            fetched = self.source.fetch() => fetched?,
        };

        let fresh = StaticCalendar::parse(&raw)
            .map_err(|e| e.with_calendar(self.source_name()))?
            .with_expander(self.expander.clone());

        let previous = self.snapshot();
        if previous.as_ref().is_some_and(|p| p.same_content(&fresh)) {
            debug!(calendar = %self.source_name(), "Calendar unchanged");
            return Ok(false);
        }

        let fresh = Arc::new(fresh);
        let published = self.snapshot.send_if_modified(|current| {
            let untouched = match (current.as_ref(), previous.as_ref()) {
                (None, None) => true,
                (Some(current), Some(previous)) => Arc::ptr_eq(current, previous),
                _ => false,
            };
            if untouched {
                *current = Some(fresh.clone());
            }
            untouched
        });

        if published {
            info!(calendar = %self.source_name(), "Calendar updated");
        } else {
            debug!(calendar = %self.source_name(), "Lost refresh race, snapshot already replaced");
        }

        Ok(published)
    }
}

impl Calendar for LiveCalendar {
    fn events_between(
        &self,
        start: &DateTime<Tz>,
        end: &DateTime<Tz>,
        opts: &EventsOptions,
    ) -> Vec<Event> {
        assert_same_zone(start, end);
        match self.snapshot() {
            Some(snapshot) => snapshot.events_between(start, end, opts),
            None => Vec::new(),
        }
    }
}

impl fmt::Debug for LiveCalendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveCalendar")
            .field("source", &self.source_name())
            .field("published", &self.snapshot.borrow().is_some())
            .finish()
    }
}
