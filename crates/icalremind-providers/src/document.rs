//! iCalendar documents.
//!
//! [`CalendarDocument`] is an owned copy of a parsed RFC 5545 calendar. It is
//! produced with the `icalendar` crate's parser and never mutated afterwards.
//! Its [`Display`](fmt::Display) output is a canonical form (CRLF lines, no
//! folding) used to compare two fetches of the same calendar.
//!
//! [`SourceEvent`] is a read-only view over one `VEVENT`, resolving its
//! date-times into whatever zone a query asks for.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use icalendar::parser::{self, read_calendar, unfold};
use tracing::debug;

use icalremind_core::EventStatus;
use icalremind_core::time::{midnight, resolve_local};

use crate::error::{ProviderError, ProviderResult};

const DATE_FORMAT: &str = "%Y%m%d";
const DATE_TIME_FORMAT: &str = "%Y%m%dT%H%M%S";

/// A property parameter such as `TZID=Europe/Paris`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub key: String,
    pub value: Option<String>,
}

/// A content line: name, parameters and raw value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub params: Vec<Parameter>,
    pub value: String,
}

impl Property {
    fn from_parsed(prop: &parser::Property<'_>) -> Self {
        Self {
            name: prop.name.to_string(),
            params: prop
                .params
                .iter()
                .map(|p| Parameter {
                    key: p.key.to_string(),
                    value: p.val.as_ref().map(|v| v.to_string()),
                })
                .collect(),
            value: prop.val.to_string(),
        }
    }

    /// Returns the value of parameter `key`, compared case-insensitively.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.key.eq_ignore_ascii_case(key))
            .and_then(|p| p.value.as_deref())
    }

    /// Returns true if the property is declared `VALUE=DATE`.
    pub fn is_date_valued(&self) -> bool {
        self.param("VALUE")
            .is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for param in &self.params {
            match param.value {
                Some(ref value) => write!(f, ";{}={}", param.key, value)?,
                None => write!(f, ";{}", param.key)?,
            }
        }
        write!(f, ":{}", self.value)
    }
}

/// A component (`VEVENT`, `VALARM`, `VTIMEZONE`, ...) with its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub properties: Vec<Property>,
    pub components: Vec<Component>,
}

impl Component {
    fn from_parsed(component: &parser::Component<'_>) -> Self {
        Self {
            name: component.name.to_string(),
            properties: component
                .properties
                .iter()
                .map(Property::from_parsed)
                .collect(),
            components: component
                .components
                .iter()
                .map(Component::from_parsed)
                .collect(),
        }
    }

    /// Returns the first property called `name`.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BEGIN:{}\r\n", self.name)?;
        for property in &self.properties {
            write!(f, "{}\r\n", property)?;
        }
        for component in &self.components {
            write!(f, "{}", component)?;
        }
        write!(f, "END:{}\r\n", self.name)
    }
}

/// A parsed iCalendar document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarDocument {
    root: Component,
}

impl CalendarDocument {
    /// Parses a `VCALENDAR` document.
    ///
    /// # Errors
    ///
    /// Returns a `Malformed` error if the text is not iCalendar.
    pub fn parse(raw: &str) -> ProviderResult<Self> {
        let trimmed = raw.trim_start_matches('\u{feff}').trim_start();
        if !trimmed
            .get(..15)
            .is_some_and(|head| head.eq_ignore_ascii_case("BEGIN:VCALENDAR"))
        {
            return Err(ProviderError::malformed(
                "document does not start with BEGIN:VCALENDAR",
            ));
        }

        let unfolded = unfold(trimmed);
        let calendar = read_calendar(&unfolded).map_err(|e| {
            ProviderError::malformed(format!("failed to parse calendar: {}", e))
        })?;

        let root = Component {
            name: "VCALENDAR".to_string(),
            properties: calendar
                .properties
                .iter()
                .map(Property::from_parsed)
                .collect(),
            components: calendar
                .components
                .iter()
                .map(Component::from_parsed)
                .collect(),
        };

        debug!(
            components = root.components.len(),
            "Parsed calendar document"
        );

        Ok(Self { root })
    }

    /// Returns the canonical text form of the document.
    pub fn serialize(&self) -> String {
        self.root.to_string()
    }

    /// Returns the top-level `VCALENDAR` component.
    pub fn root(&self) -> &Component {
        &self.root
    }

    /// Iterates over the document's `VEVENT` components.
    pub fn events(&self) -> impl Iterator<Item = SourceEvent<'_>> {
        self.root
            .components
            .iter()
            .filter(|c| c.name.eq_ignore_ascii_case("VEVENT"))
            .map(SourceEvent::new)
    }
}

impl fmt::Display for CalendarDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.fmt(f)
    }
}

/// An iCalendar date or date-time value, before zone resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcalTime {
    /// `VALUE=DATE`, an all-day value.
    Date(NaiveDate),
    /// A date-time with a `Z` suffix.
    Utc(NaiveDateTime),
    /// A date-time with neither `Z` nor a known `TZID`.
    Floating(NaiveDateTime),
    /// A date-time with a `TZID` known to the tz database.
    Zoned(NaiveDateTime, Tz),
}

impl IcalTime {
    /// Parses the first value of a date or date-time property.
    pub fn from_property(prop: &Property) -> ProviderResult<Self> {
        let value = prop.value.split(',').next().unwrap_or_default();
        Self::parse_value(value, prop).ok_or_else(|| {
            ProviderError::invalid_event(format!("invalid {} value {:?}", prop.name, prop.value))
        })
    }

    /// Parses every comma-separated value of a property such as `EXDATE`.
    /// Values that fail to parse are skipped.
    pub fn all_from_property(prop: &Property) -> Vec<Self> {
        prop.value
            .split(',')
            .filter(|v| !v.trim().is_empty())
            .filter_map(|v| Self::parse_value(v, prop))
            .collect()
    }

    fn parse_value(value: &str, prop: &Property) -> Option<Self> {
        if prop.is_date_valued() {
            return NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
                .ok()
                .map(Self::Date);
        }
        Self::parse(value, prop.param("TZID"))
    }

    /// Parses a bare date or date-time value. Eight digits are read as a
    /// date; a `Z` suffix wins over `tzid`.
    pub fn parse(value: &str, tzid: Option<&str>) -> Option<Self> {
        let value = value.trim();

        if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) {
            return NaiveDate::parse_from_str(value, DATE_FORMAT)
                .ok()
                .map(Self::Date);
        }

        if let Some(utc) = value.strip_suffix('Z') {
            return NaiveDateTime::parse_from_str(utc, DATE_TIME_FORMAT)
                .ok()
                .map(Self::Utc);
        }

        let naive = NaiveDateTime::parse_from_str(value, DATE_TIME_FORMAT).ok()?;
        match tzid {
            Some(tzid) => match parse_tzid(tzid) {
                Some(tz) => Some(Self::Zoned(naive, tz)),
                None => {
                    debug!(tzid = %tzid, "Unknown TZID, treating value as floating");
                    Some(Self::Floating(naive))
                }
            },
            None => Some(Self::Floating(naive)),
        }
    }

    /// Returns true for all-day values.
    pub fn is_date(&self) -> bool {
        matches!(self, Self::Date(_))
    }

    /// Returns the zone this value is anchored to, or `fallback` for dates
    /// and floating times.
    pub fn zone(&self, fallback: &Tz) -> Tz {
        match self {
            Self::Utc(_) => Tz::UTC,
            Self::Zoned(_, tz) => *tz,
            Self::Date(_) | Self::Floating(_) => *fallback,
        }
    }

    /// Returns the wall-clock value. Dates become local midnight.
    pub fn naive_local(&self) -> NaiveDateTime {
        match self {
            Self::Date(date) => date.and_time(chrono::NaiveTime::default()),
            Self::Utc(naive) | Self::Floating(naive) | Self::Zoned(naive, _) => *naive,
        }
    }

    /// Resolves the value to an instant expressed in `zone`.
    ///
    /// Dates and floating times are read as wall-clock time in `zone`.
    /// Returns `None` only when a local time cannot be resolved at all.
    pub fn resolve(&self, zone: &Tz) -> Option<DateTime<Tz>> {
        match self {
            Self::Date(date) => Some(midnight(zone, *date)),
            Self::Utc(naive) => Some(zone.from_utc_datetime(naive)),
            Self::Floating(naive) => resolve_local(zone, *naive),
            Self::Zoned(naive, tz) => resolve_local(tz, *naive).map(|dt| dt.with_timezone(zone)),
        }
    }
}

fn parse_tzid(tzid: &str) -> Option<Tz> {
    // Some producers quote the value or prefix it with a slash.
    let tzid = tzid.trim_matches('"').trim_start_matches('/');
    tzid.parse::<Tz>().ok()
}

/// Parses an RFC 5545 `DURATION` value such as `PT1H30M` or `-P1D`.
pub fn parse_duration(value: &str) -> ProviderResult<Duration> {
    let value = value.trim();
    let (negative, unsigned) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };

    let parsed = iso8601::duration(unsigned).map_err(|e| {
        ProviderError::invalid_event(format!("invalid DURATION {:?}: {}", value, e))
    })?;
    let std_duration: std::time::Duration = parsed.into();
    let duration = Duration::from_std(std_duration)
        .map_err(|_| ProviderError::invalid_event(format!("DURATION {:?} out of range", value)))?;

    Ok(if negative { -duration } else { duration })
}

/// Undoes RFC 5545 TEXT escaping (`\n`, `\,`, `\;`, `\\`).
pub fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// A read-only view over one `VEVENT` component.
#[derive(Debug, Clone, Copy)]
pub struct SourceEvent<'a> {
    component: &'a Component,
}

impl<'a> SourceEvent<'a> {
    /// Wraps a `VEVENT` component.
    pub fn new(component: &'a Component) -> Self {
        Self { component }
    }

    /// Returns the underlying component.
    pub fn component(&self) -> &'a Component {
        self.component
    }

    /// Returns the event UID, if any.
    pub fn uid(&self) -> Option<&'a str> {
        self.component.property("UID").map(|p| p.value.as_str())
    }

    /// Returns the unescaped value of a TEXT property, or an empty string.
    pub fn text(&self, name: &str) -> String {
        self.component
            .property(name)
            .map(|p| unescape_text(&p.value))
            .unwrap_or_default()
    }

    pub fn summary(&self) -> String {
        self.text("SUMMARY")
    }

    pub fn location(&self) -> String {
        self.text("LOCATION")
    }

    pub fn description(&self) -> String {
        self.text("DESCRIPTION")
    }

    /// Returns the event's own status.
    pub fn status(&self) -> EventStatus {
        self.component
            .property("STATUS")
            .map(|p| EventStatus::from_ical(&p.value))
            .unwrap_or_default()
    }

    /// Returns the unresolved `DTSTART` value.
    pub fn start_time(&self) -> ProviderResult<IcalTime> {
        let prop = self
            .component
            .property("DTSTART")
            .ok_or_else(|| ProviderError::invalid_event("missing DTSTART"))?;
        IcalTime::from_property(prop)
    }

    /// Returns the first start, expressed in `zone`.
    pub fn start(&self, zone: &Tz) -> ProviderResult<DateTime<Tz>> {
        let start = self.start_time()?;
        start
            .resolve(zone)
            .ok_or_else(|| ProviderError::invalid_event("DTSTART does not exist locally"))
    }

    /// Returns the first end, expressed in `zone`.
    ///
    /// Falls back to `DTSTART + DURATION`, then to the next day for all-day
    /// events, then to the start itself.
    pub fn end(&self, zone: &Tz) -> ProviderResult<DateTime<Tz>> {
        if let Some(prop) = self.component.property("DTEND") {
            return IcalTime::from_property(prop)?
                .resolve(zone)
                .ok_or_else(|| ProviderError::invalid_event("DTEND does not exist locally"));
        }

        let start = self.start(zone)?;

        if let Some(prop) = self.component.property("DURATION") {
            return Ok(start + parse_duration(&prop.value)?);
        }

        match self.start_time()? {
            IcalTime::Date(date) => {
                let next = date.succ_opt().unwrap_or(date);
                Ok(midnight(zone, next))
            }
            _ => Ok(start),
        }
    }

    /// Returns true if the event has `RRULE` or `RDATE` properties.
    pub fn is_recurring(&self) -> bool {
        self.component.property("RRULE").is_some() || self.component.property("RDATE").is_some()
    }

    /// Returns the `RRULE`, `RDATE` and `EXDATE` properties.
    pub fn recurrence_properties(&self) -> impl Iterator<Item = &'a Property> {
        self.component.properties.iter().filter(|p| {
            ["RRULE", "RDATE", "EXDATE"]
                .iter()
                .any(|name| p.name.eq_ignore_ascii_case(name))
        })
    }

    /// Returns the recurrence properties as content lines.
    pub fn recurrence_lines(&self) -> Vec<String> {
        self.recurrence_properties().map(|p| p.to_string()).collect()
    }
}
