//! Recurrence expansion.
//!
//! An [`OccurrenceExpander`] turns a recurring `VEVENT` into the concrete
//! start times that fall inside a window. [`RRuleExpander`] is the default,
//! built on the `rrule` crate.

use std::fmt;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;
use tracing::{debug, warn};

use crate::document::{IcalTime, SourceEvent};
use crate::error::{ProviderError, ProviderResult};

const RULE_TIME_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Enumerates occurrences of recurring events.
pub trait OccurrenceExpander: Send + Sync + fmt::Debug {
    /// Returns the start of every occurrence of `event` in `[start, end]`,
    /// both bounds inclusive, ascending and expressed in `zone`.
    ///
    /// Dates and floating times in the event are read in `zone`.
    fn expand(
        &self,
        event: &SourceEvent<'_>,
        zone: &Tz,
        start: &DateTime<Tz>,
        end: &DateTime<Tz>,
    ) -> ProviderResult<Vec<DateTime<Tz>>>;
}

/// Expands `RRULE`, `RDATE` and `EXDATE` with the `rrule` crate.
///
/// The rule is anchored at `DTSTART` in the event's own zone, so a weekly
/// 17:00 meeting stays at 17:00 local time across DST changes.
#[derive(Debug, Clone)]
pub struct RRuleExpander {
    max_occurrences: u16,
}

impl Default for RRuleExpander {
    fn default() -> Self {
        Self {
            max_occurrences: Self::DEFAULT_MAX_OCCURRENCES,
        }
    }
}

impl RRuleExpander {
    /// Upper bound on occurrences returned for one event and window.
    pub const DEFAULT_MAX_OCCURRENCES: u16 = 1000;

    /// Creates an expander with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of occurrences returned per call.
    pub fn with_max_occurrences(mut self, max: u16) -> Self {
        self.max_occurrences = max;
        self
    }

    /// Builds the text form of the rule set understood by `rrule`.
    fn rule_set_text(event: &SourceEvent<'_>, zone: &Tz) -> ProviderResult<String> {
        let dtstart = event.start_time()?;
        let anchor = dtstart.zone(zone);

        let mut lines = vec![match dtstart {
            IcalTime::Utc(naive) => format!("DTSTART:{}Z", naive.format(RULE_TIME_FORMAT)),
            other => format!(
                "DTSTART;TZID={}:{}",
                anchor.name(),
                other.naive_local().format(RULE_TIME_FORMAT)
            ),
        }];

        let mut has_rule = false;
        for prop in event.recurrence_properties() {
            let name = prop.name.to_ascii_uppercase();
            if name == "RRULE" {
                has_rule = true;
                lines.push(format!("RRULE:{}", normalize_until(&prop.value, &anchor)));
                continue;
            }

            // RDATE and EXDATE are passed on as UTC instants.
            let instants: Vec<String> = IcalTime::all_from_property(prop)
                .iter()
                .filter_map(|t| t.resolve(&anchor))
                .map(|dt| utc_text(&dt))
                .collect();
            if !instants.is_empty() {
                lines.push(format!("{}:{}", name, instants.join(",")));
            }
        }

        // Without a rule, DTSTART is only part of the set when listed.
        if !has_rule {
            let first = dtstart
                .resolve(&anchor)
                .ok_or_else(|| ProviderError::invalid_event("DTSTART does not exist locally"))?;
            lines.push(format!("RDATE:{}", utc_text(&first)));
        }

        Ok(lines.join("\n"))
    }
}

impl OccurrenceExpander for RRuleExpander {
    fn expand(
        &self,
        event: &SourceEvent<'_>,
        zone: &Tz,
        start: &DateTime<Tz>,
        end: &DateTime<Tz>,
    ) -> ProviderResult<Vec<DateTime<Tz>>> {
        let text = Self::rule_set_text(event, zone)?;
        let rule_set: RRuleSet = text.parse().map_err(|e| {
            ProviderError::invalid_event(format!(
                "invalid recurrence for event {:?}: {}",
                event.uid().unwrap_or_default(),
                e
            ))
        })?;

        // after/before are exclusive.
        let tz: rrule::Tz = Utc.into();
        let after = (*start - Duration::seconds(1)).with_timezone(&tz);
        let before = (*end + Duration::seconds(1)).with_timezone(&tz);

        let result = rule_set.after(after).before(before).all(self.max_occurrences);
        if result.limited {
            warn!(
                uid = ?event.uid(),
                max = self.max_occurrences,
                "Recurrence expansion hit the occurrence limit"
            );
        }

        let starts: Vec<DateTime<Tz>> = result
            .dates
            .iter()
            .map(|dt| dt.with_timezone(zone))
            .filter(|dt| dt >= start && dt <= end)
            .collect();

        debug!(
            uid = ?event.uid(),
            rules = ?event.recurrence_lines(),
            occurrences = starts.len(),
            "Expanded recurring event"
        );

        Ok(starts)
    }
}

fn utc_text(dt: &DateTime<Tz>) -> String {
    format!("{}Z", dt.with_timezone(&Utc).format(RULE_TIME_FORMAT))
}

/// Rewrites a local or date-only `UNTIL` as UTC, which `rrule` requires when
/// `DTSTART` carries a zone. A date-only `UNTIL` covers that whole day.
fn normalize_until(rule: &str, anchor: &Tz) -> String {
    rule.split(';')
        .map(|part| match part.split_once('=') {
            Some((key, value)) if key.eq_ignore_ascii_case("UNTIL") && !value.ends_with('Z') => {
                let until = match IcalTime::parse(value, None) {
                    Some(IcalTime::Date(date)) => {
                        let last_second = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default();
                        IcalTime::Floating(date.and_time(last_second)).resolve(anchor)
                    }
                    Some(other) => other.resolve(anchor),
                    None => None,
                };
                match until {
                    Some(dt) => format!("UNTIL={}", utc_text(&dt)),
                    None => part.to_string(),
                }
            }
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}
