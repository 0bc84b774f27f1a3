//! Client configuration.
//!
//! Settings live in TOML files, `~/.config/icalremind/config.toml` by
//! default. Several files can be layered: later files override scalar
//! settings and append to the calendar list, so secrets can live in a
//! separate file from the rest.
//!
//! ```toml
//! timezone = "America/Los_Angeles"
//! refresh_frequency = "15m"
//! event_notifications = ["1h", "10m"]
//!
//! [[calendars]]
//! name = "Team"
//! ical_url = "https://example.com/team.ics"
//! webhook_url = "env::TEAM_WEBHOOK"
//! message_template = "{summary} starts in {starts_in}"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;
use url::Url;

use icalremind_core::EventsOptions;
use icalremind_providers::SourceConfig;
use icalremind_server::{NotifierOptions, RefreshConfig, default_zone};

use crate::error::{ClientError, ClientResult};
use crate::reminders;
use crate::secret::Secret;

/// A duration written the human way (`"15m"`, `"1h 30m"`). A leading `-`
/// makes it negative, for reminders after an event has started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDuration(pub chrono::Duration);

impl HumanDuration {
    /// Returns the duration as a standard duration, or `None` if negative.
    pub fn to_std(self) -> Option<Duration> {
        self.0.to_std().ok()
    }
}

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, magnitude) = match s.strip_prefix('-') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, s),
        };
        let parsed = humantime::parse_duration(magnitude)
            .map_err(|e| format!("invalid duration {:?}: {}", s, e))?;
        let parsed = chrono::Duration::from_std(parsed)
            .map_err(|_| format!("duration {:?} is out of range", s))?;
        Ok(Self(if negative { -parsed } else { parsed }))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.0.abs().to_std().unwrap_or_default();
        if self.0 < chrono::Duration::zero() {
            f.write_str("-")?;
        }
        write!(f, "{}", humantime::format_duration(magnitude))
    }
}

impl Serialize for HumanDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Configuration for the icalremind client, after all files are merged.
#[derive(Debug, Clone, Serialize)]
pub struct ClientConfig {
    /// IANA zone whose midnight starts a new reminder day. Defaults to `$TZ`,
    /// then UTC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    /// How often calendars are re-fetched. Zero fetches once at startup.
    pub refresh_frequency: HumanDuration,

    /// Reminder lead times applied to every event.
    pub event_notifications: Vec<HumanDuration>,

    /// Drop reminders missed while the client was down.
    pub skip_past_notifications: bool,

    /// Ignore events whose status is cancelled.
    pub exclude_cancelled: bool,

    /// Tracked calendars.
    pub calendars: Vec<CalendarSettings>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timezone: None,
            refresh_frequency: HumanDuration(chrono::Duration::minutes(5)),
            event_notifications: Vec::new(),
            skip_past_notifications: false,
            exclude_cancelled: true,
            calendars: Vec::new(),
        }
    }
}

/// One configuration file, as written. Unset fields keep earlier values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub timezone: Option<String>,
    pub refresh_frequency: Option<HumanDuration>,
    /// Replaces, rather than extends, earlier lead times.
    pub event_notifications: Option<Vec<HumanDuration>>,
    pub skip_past_notifications: Option<bool>,
    pub exclude_cancelled: Option<bool>,
    /// Appended to earlier calendars.
    pub calendars: Vec<CalendarSettings>,
}

/// A tracked calendar.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalendarSettings {
    /// Display name. Defaults to the calendar URL's host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Calendar location (`https://`, `webcal://` or `file://`).
    pub ical_url: String,

    /// Webhook receiving reminders. Supports `env::` and `pass::`
    /// references. Without one, reminders become desktop notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    /// Message template for webhook posts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_template: Option<String>,
}

impl CalendarSettings {
    /// Returns the display name.
    pub fn display_name(&self) -> String {
        if let Some(ref name) = self.name {
            return name.clone();
        }
        Url::parse(&self.ical_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| self.ical_url.clone())
    }

    /// Builds the source configuration for this calendar.
    pub fn source_config(&self) -> ClientResult<SourceConfig> {
        SourceConfig::new(&self.ical_url).map_err(|e| {
            ClientError::Config(format!("invalid ical_url {:?}: {}", self.ical_url, e))
        })
    }

    /// Resolves and parses the webhook URL, if any.
    pub fn resolve_webhook(&self) -> ClientResult<Option<Url>> {
        let Some(ref raw) = self.webhook_url else {
            return Ok(None);
        };
        let resolved = Secret::parse(raw).resolve().map_err(|e| {
            ClientError::Config(format!("failed to resolve webhook_url: {}", e))
        })?;
        parse_webhook(&resolved).map(Some)
    }
}

fn parse_webhook(raw: &str) -> ClientResult<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ClientError::Config(format!("invalid webhook_url: {}", e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ClientError::Config(format!(
            "webhook_url must be http or https, got {:?}",
            scheme
        ))),
    }
}

impl ClientConfig {
    /// Loads and merges `paths` in order. With no paths, loads the default
    /// file if it exists.
    pub fn load_all(paths: &[PathBuf]) -> ClientResult<Self> {
        let mut config = Self::default();

        if paths.is_empty() {
            let path = Self::default_path();
            if path.exists() {
                config.merge(Self::load_file(&path)?);
            } else {
                debug!(path = %path.display(), "No configuration file found");
            }
            return Ok(config);
        }

        for path in paths {
            config.merge(Self::load_file(path)?);
        }
        Ok(config)
    }

    /// Parses one configuration file.
    pub fn load_file(path: &Path) -> ClientResult<ConfigFile> {
        debug!(path = %path.display(), "Loading configuration file");
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            ClientError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Applies `file` on top of this configuration.
    pub fn merge(&mut self, file: ConfigFile) {
        if let Some(timezone) = file.timezone {
            self.timezone = Some(timezone);
        }
        if let Some(refresh) = file.refresh_frequency {
            self.refresh_frequency = refresh;
        }
        if let Some(notifications) = file.event_notifications {
            self.event_notifications = notifications;
        }
        if let Some(skip) = file.skip_past_notifications {
            self.skip_past_notifications = skip;
        }
        if let Some(exclude) = file.exclude_cancelled {
            self.exclude_cancelled = exclude;
        }
        self.calendars.extend(file.calendars);
    }

    /// Checks the configuration without touching the network.
    ///
    /// Webhook references (`env::`, `pass::`) are checked when the client
    /// starts, not here.
    pub fn validate(&self) -> ClientResult<()> {
        if self.calendars.is_empty() {
            return Err(ClientError::Config("no calendars configured".to_string()));
        }
        self.zone()?;
        if self.refresh_frequency.to_std().is_none() {
            return Err(ClientError::Config(
                "refresh_frequency must not be negative".to_string(),
            ));
        }
        for calendar in &self.calendars {
            calendar.source_config()?;
            if let Some(ref raw) = calendar.webhook_url
                && !Secret::parse(raw).is_reference()
            {
                parse_webhook(raw)?;
            }
        }
        Ok(())
    }

    /// Returns the configured zone.
    pub fn zone(&self) -> ClientResult<Tz> {
        match self.timezone {
            Some(ref name) => name
                .parse()
                .map_err(|_| ClientError::Config(format!("unknown timezone {:?}", name))),
            None => Ok(default_zone()),
        }
    }

    /// Returns the event query options.
    pub fn events_options(&self) -> EventsOptions {
        EventsOptions::new()
            .with_default_reminders(self.event_notifications.iter().map(|d| d.0).collect())
            .with_exclude_cancelled(self.exclude_cancelled)
            .with_reminder_parser(reminders::description_reminders)
    }

    /// Returns the notifier options.
    pub fn notifier_options(&self) -> ClientResult<NotifierOptions> {
        Ok(NotifierOptions::new(self.events_options())
            .with_zone(self.zone()?)
            .with_skip_past_notifications(self.skip_past_notifications))
    }

    /// Returns the refresh schedule, or `None` to fetch only once.
    pub fn refresh_config(&self) -> Option<RefreshConfig> {
        self.refresh_frequency
            .to_std()
            .filter(|interval| !interval.is_zero())
            .map(RefreshConfig::new)
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("icalremind")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn human_duration_parses() {
        let d: HumanDuration = "1h 30m".parse().unwrap();
        assert_eq!(d.0, chrono::Duration::minutes(90));

        let d: HumanDuration = "-5m".parse().unwrap();
        assert_eq!(d.0, chrono::Duration::minutes(-5));
        assert!(d.to_std().is_none());

        assert!("soon".parse::<HumanDuration>().is_err());
    }

    #[test]
    fn human_duration_display() {
        assert_eq!(HumanDuration(chrono::Duration::minutes(15)).to_string(), "15m");
        assert_eq!(HumanDuration(chrono::Duration::minutes(-15)).to_string(), "-15m");
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert!(config.exclude_cancelled);
        assert!(!config.skip_past_notifications);
        assert_eq!(
            config.refresh_config().unwrap().interval,
            Duration::from_secs(300)
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "config.toml",
            r#"
timezone = "America/Los_Angeles"
refresh_frequency = "15m"
event_notifications = ["1h", "10m"]
skip_past_notifications = true
exclude_cancelled = false

[[calendars]]
name = "Team"
ical_url = "webcal://example.com/team.ics"
webhook_url = "https://example.com/hooks/1"
message_template = "{summary} in {starts_in}"
"#,
        );

        let config = ClientConfig::load_all(&[path]).unwrap();
        config.validate().unwrap();

        assert_eq!(config.zone().unwrap(), chrono_tz::America::Los_Angeles);
        assert_eq!(
            config.refresh_config().unwrap().interval,
            Duration::from_secs(900)
        );
        assert!(config.skip_past_notifications);
        assert!(!config.exclude_cancelled);
        assert_eq!(config.calendars.len(), 1);
        assert_eq!(config.calendars[0].display_name(), "Team");

        let opts = config.events_options();
        assert_eq!(
            opts.default_reminders,
            vec![chrono::Duration::hours(1), chrono::Duration::minutes(10)]
        );
        assert!(opts.reminder_parser.is_some());
        assert!(!opts.exclude_cancelled);
    }

    #[test]
    fn later_files_override_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_config(
            &dir,
            "base.toml",
            r#"
timezone = "UTC"
event_notifications = ["10m"]

[[calendars]]
ical_url = "https://example.com/a.ics"
"#,
        );
        let extra = write_config(
            &dir,
            "extra.toml",
            r#"
timezone = "Europe/Paris"

[[calendars]]
ical_url = "https://example.com/b.ics"
webhook_url = "env::B_WEBHOOK"
"#,
        );

        let config = ClientConfig::load_all(&[base, extra]).unwrap();
        assert_eq!(config.timezone.as_deref(), Some("Europe/Paris"));
        assert_eq!(config.event_notifications.len(), 1);
        assert_eq!(config.calendars.len(), 2);
        assert_eq!(config.calendars[0].display_name(), "example.com");
        // References are not resolved during validation.
        config.validate().unwrap();
    }

    #[test]
    fn zero_refresh_fetches_once() {
        let mut config = ClientConfig::default();
        config.merge(ConfigFile {
            refresh_frequency: Some("0s".parse().unwrap()),
            ..Default::default()
        });
        assert!(config.refresh_config().is_none());
    }

    #[test]
    fn rejects_unknown_timezone() {
        let config = ClientConfig {
            timezone: Some("Mars/Olympus_Mons".to_string()),
            calendars: vec![CalendarSettings {
                ical_url: "https://example.com/a.ics".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown timezone"));
    }

    #[test]
    fn rejects_bad_urls() {
        let mut config = ClientConfig {
            calendars: vec![CalendarSettings {
                ical_url: "not a url".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.calendars[0].ical_url = "https://example.com/a.ics".to_string();
        config.calendars[0].webhook_url = Some("ftp://example.com/hook".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "config.toml", "refresh = \"5m\"\n");
        assert!(ClientConfig::load_all(&[path]).is_err());
    }

    #[test]
    fn missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientConfig::load_all(&[dir.path().join("missing.toml")]).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn dump_round_trips_durations() {
        let mut config = ClientConfig::default();
        config.event_notifications = vec!["10m".parse().unwrap()];
        let dumped = toml::to_string_pretty(&config).unwrap();
        assert!(dumped.contains("refresh_frequency = \"5m\""));
        assert!(dumped.contains("\"10m\""));
    }

    #[test]
    fn default_path_is_under_config_dir() {
        let path = ClientConfig::default_path();
        assert!(path.ends_with("icalremind/config.toml"));
    }
}
