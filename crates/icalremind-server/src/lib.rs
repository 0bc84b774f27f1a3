//! Reminder scheduling: the notifier loop and the calendar refresher.
//!
//! This crate drives reminders at runtime:
//! - [`Notifier`] rebuilds the day's reminder queue and delivers each
//!   [`Notification`] when it is due
//! - [`MidnightTicker`] wakes the notifier at every local midnight
//! - [`Refresher`] re-fetches live calendars and invalidates the notifier
//!   when their data changes
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use icalremind_server::{Notifier, NotifierOptions, RefreshConfig, Refresher};
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(calendars: Vec<Arc<icalremind_providers::LiveCalendar>>) {
//! let notifier = Arc::new(Notifier::new(NotifierOptions::default()));
//! notifier.update(|state| {
//!     for calendar in &calendars {
//!         state.add_calendar(calendar.clone());
//!     }
//! });
//!
//! let cancel = CancellationToken::new();
//! let (tx, mut rx) = mpsc::channel(1);
//! let refresher = Refresher::new(RefreshConfig::default(), calendars, notifier.clone());
//! tokio::spawn(refresher.run(cancel.clone()));
//! tokio::spawn({
//!     let notifier = notifier.clone();
//!     let cancel = cancel.clone();
//!     async move { notifier.run(cancel, tx).await }
//! });
//!
//! while let Some(notification) = rx.recv().await {
//!     println!("{} at {}", notification.event.summary, notification.remind_at);
//! }
//! # }
//! ```

mod clock;
mod error;
mod notifier;
mod refresher;

pub use clock::{MidnightTicker, default_zone, now_in};
pub use error::{ServerError, ServerResult};
pub use notifier::{Notification, Notifier, NotifierOptions, NotifierState};
pub use refresher::{
    Backoff, RefreshConfig, RefreshHandle, RefreshState, Refresher, SharedRefreshState,
};
