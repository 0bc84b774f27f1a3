//! Notification delivery.
//!
//! Each tracked calendar has a [`Target`]. Calendars with a webhook get a
//! JSON post with a rendered message and an embed describing the event;
//! the others get a desktop notification through `notify-rust`.

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono_tz::Tz;
use notify_rust::Notification as DesktopNotification;
use serde_json::{Value, json};
use tracing::{debug, info};
use url::Url;

use icalremind_providers::{CalendarRef, LiveCalendar};
use icalremind_server::Notification;

use crate::config::CalendarSettings;
use crate::error::{ClientError, ClientResult};
use crate::reminders::strip_reminder_phrases;

/// Message used when a calendar has no template.
pub const DEFAULT_TEMPLATE: &str = "**{summary}** starts in {starts_in}.";

/// Delivery timeout when a reminder fires at or after the event start.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Embed accent color.
const EMBED_COLOR: u32 = 0x2c91c6;

const APP_NAME: &str = "icalremind";

/// Where reminders for one calendar go.
#[derive(Debug)]
pub struct Target {
    /// Display name.
    pub name: String,
    /// The live calendar, as registered with the notifier.
    pub calendar: Arc<LiveCalendar>,
    /// Webhook receiving reminders; `None` means desktop notifications.
    pub webhook: Option<Url>,
    /// Message template for webhook posts.
    pub template: String,
}

impl Target {
    /// Builds a target from its settings, resolving the webhook reference.
    pub fn from_settings(settings: &CalendarSettings, calendar: Arc<LiveCalendar>) -> ClientResult<Self> {
        Ok(Self {
            name: settings.display_name(),
            calendar,
            webhook: settings.resolve_webhook()?,
            template: settings
                .message_template
                .clone()
                .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
        })
    }

    fn calendar_ref(&self) -> CalendarRef {
        CalendarRef::from(self.calendar.clone())
    }
}

/// Routes notifications to their calendar's target.
#[derive(Debug)]
pub struct Dispatcher {
    client: reqwest::Client,
    targets: Vec<Target>,
    zone: Tz,
}

impl Dispatcher {
    /// Creates a dispatcher rendering times in `zone`.
    pub fn new(targets: Vec<Target>, zone: Tz) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Delivery(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            targets,
            zone,
        })
    }

    /// Returns the targets.
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Returns the target for `calendar`, matched by identity.
    pub fn target_for(&self, calendar: &CalendarRef) -> Option<&Target> {
        self.targets.iter().find(|t| t.calendar_ref() == *calendar)
    }

    /// Delivers one notification.
    ///
    /// # Errors
    ///
    /// Returns a delivery error if the calendar is unknown or the webhook or
    /// desktop notification fails.
    pub async fn deliver(&self, notification: &Notification) -> ClientResult<()> {
        let Some(target) = self.target_for(&notification.calendar) else {
            return Err(ClientError::Delivery(format!(
                "no target for calendar {:?}",
                notification.calendar
            )));
        };

        match target.webhook {
            Some(ref url) => self.post_webhook(target, url, notification).await,
            None => self.show_desktop(target, notification).await,
        }
    }

    async fn post_webhook(&self, target: &Target, url: &Url, notification: &Notification) -> ClientResult<()> {
        let payload = webhook_payload(&target.template, notification, &self.zone);
        let timeout = delivery_timeout(notification);
        debug!(
            calendar = %target.name,
            event = %notification.event.summary,
            timeout_secs = timeout.as_secs(),
            "Posting webhook"
        );

        let response = self
            .client
            .post(url.clone())
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ClientError::Delivery(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Delivery(format!(
                "webhook rejected notification ({}): {}",
                status, body
            )));
        }

        info!(
            calendar = %target.name,
            event = %notification.event.summary,
            "Webhook notification sent"
        );
        Ok(())
    }

    async fn show_desktop(&self, target: &Target, notification: &Notification) -> ClientResult<()> {
        let summary = desktop_summary(notification);
        let body = desktop_body(notification, &self.zone);
        let timeout = delivery_timeout(notification);
        debug!(
            calendar = %target.name,
            event = %notification.event.summary,
            "Showing desktop notification"
        );

        // Showing talks to the session bus synchronously.
        tokio::task::spawn_blocking(move || {
            let mut desktop = DesktopNotification::new();
            desktop
                .appname(APP_NAME)
                .summary(&summary)
                .body(&body)
                .timeout(timeout);
            desktop.show().map(|_| ())
        })
        .await
        .map_err(|e| ClientError::Delivery(format!("notification task failed: {}", e)))?
        .map_err(|e| ClientError::Delivery(format!("desktop notification failed: {}", e)))?;

        info!(
            calendar = %target.name,
            event = %notification.event.summary,
            "Desktop notification sent"
        );
        Ok(())
    }
}

/// Returns how long a delivery may take: until the event starts, or
/// [`DEFAULT_TIMEOUT`] if it already has.
pub fn delivery_timeout(notification: &Notification) -> Duration {
    notification
        .lead_time()
        .to_std()
        .ok()
        .filter(|lead| !lead.is_zero())
        .unwrap_or(DEFAULT_TIMEOUT)
}

/// Renders a message template.
///
/// Recognized placeholders: `{summary}`, `{location}`, `{starts_at}`,
/// `{remind_at}` and `{starts_in}`. Anything else is left as written.
pub fn render_template(template: &str, notification: &Notification, zone: &Tz) -> String {
    let event = &notification.event;
    template
        .replace("{summary}", &event.summary)
        .replace("{location}", &event.location)
        .replace("{starts_at}", &format_time(&event.starts_at, zone))
        .replace("{remind_at}", &format_time(&notification.remind_at, zone))
        .replace("{starts_in}", &human_duration(notification.lead_time()))
}

/// Builds the webhook JSON body.
pub fn webhook_payload(template: &str, notification: &Notification, zone: &Tz) -> Value {
    let event = &notification.event;

    let mut fields = vec![
        json!({
            "name": "Start Time",
            "value": format!("<t:{}:R>", event.starts_at.timestamp()),
            "inline": true,
        }),
        json!({
            "name": "Duration",
            "value": human_duration(event.ends_at - event.starts_at),
            "inline": true,
        }),
    ];
    if !event.location.is_empty() {
        fields.push(json!({
            "name": "Location",
            "value": event.location,
            "inline": true,
        }));
    }

    json!({
        "content": render_template(template, notification, zone),
        "embeds": [{
            "title": event.summary,
            "description": strip_reminder_phrases(&event.description),
            "color": EMBED_COLOR,
            "timestamp": event.starts_at.to_rfc3339(),
            "fields": fields,
        }],
    })
}

/// Formats a duration as "1 hour 30 minutes", rounded to the minute.
/// Durations under a minute read "now"; negative ones are treated as
/// their magnitude.
pub fn human_duration(d: chrono::Duration) -> String {
    let minutes = (d.num_seconds().abs() + 30) / 60;
    let (days, hours, minutes) = (minutes / 1440, (minutes % 1440) / 60, minutes % 60);

    let parts: Vec<String> = [(days, "day"), (hours, "hour"), (minutes, "minute")]
        .into_iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| {
            if n == 1 {
                format!("1 {}", unit)
            } else {
                format!("{} {}s", n, unit)
            }
        })
        .collect();

    if parts.is_empty() {
        "now".to_string()
    } else {
        parts.join(" ")
    }
}

fn format_time(t: &DateTime<Tz>, zone: &Tz) -> String {
    t.with_timezone(zone).format("%a %b %-d, %H:%M %Z").to_string()
}

fn desktop_summary(notification: &Notification) -> String {
    let lead = notification.lead_time();
    let summary = &notification.event.summary;
    if lead <= chrono::Duration::zero() {
        format!("Starting now: {}", summary)
    } else {
        format!("In {}: {}", human_duration(lead), summary)
    }
}

fn desktop_body(notification: &Notification, zone: &Tz) -> String {
    let event = &notification.event;
    let mut body = format!("Starts {}", format_time(&event.starts_at, zone));
    if !event.location.is_empty() {
        body.push_str(&format!("\n{}", event.location));
    }
    body
}
