//! Calendars: iCalendar documents, recurrence expansion, static and live
//! calendars.
//!
//! - [`Calendar`] - The query capability every calendar implements
//! - [`StaticCalendar`] - Queries over one immutable parsed document
//! - [`LiveCalendar`] - A calendar refreshed from a [`DocumentSource`]
//! - [`OccurrenceExpander`] - Turns recurrence rules into occurrences
//! - [`ProviderError`] - Error types for fetch and parse failures
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐
//! │   HttpSource    │    │   FileSource    │
//! └────────┬────────┘    └────────┬────────┘
//!          │    DocumentSource    │
//!          └──────────┬───────────┘
//!                     ▼ refresh()
//!              ┌──────────────┐
//!              │ LiveCalendar │──── publishes ───┐
//!              └──────────────┘                  ▼
//!                                       ┌────────────────┐
//!                                       │ StaticCalendar │
//!                                       └───────┬────────┘
//!                                               ▼ events_between()
//!                                      ┌──────────────────┐
//!                                      │ RRuleExpander    │
//!                                      └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use icalremind_providers::{Calendar, LiveCalendar, SourceConfig, source_for};
//!
//! let source = source_for(SourceConfig::new("https://example.com/basic.ics")?)?;
//! let calendar = LiveCalendar::new(source);
//! calendar.refresh(&cancel).await?;
//! let events = calendar.events_within(&now, DAY, &EventsOptions::default());
//! ```

pub mod calendar;
pub mod document;
pub mod error;
pub mod expander;
pub mod live_calendar;
pub mod source;
pub mod static_calendar;

// Re-export main types at crate root
pub use calendar::{Calendar, CalendarRef};
pub use document::{CalendarDocument, IcalTime, SourceEvent};
pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use expander::{OccurrenceExpander, RRuleExpander};
pub use live_calendar::{LiveCalendar, Snapshot};
#[cfg(feature = "http")]
pub use source::HttpSource;
pub use source::{BoxFuture, DocumentSource, FileSource, SourceConfig, source_for};
pub use static_calendar::StaticCalendar;
