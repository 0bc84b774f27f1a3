//! Errors raised while loading a calendar feed.
//!
//! A [`ProviderError`] records what went wrong ([`ProviderErrorCode`]), which
//! feed it happened on, and the HTTP status when the feed answered with one.
//! Refresh loops use [`ProviderError::is_retryable`] to tell a flaky feed from
//! a broken one.

use std::fmt;
use thiserror::Error;

/// What kind of failure a [`ProviderError`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    /// The feed could not be reached: DNS, connect, TLS or timeout.
    Unreachable,
    /// The feed needs credentials we do not have (401 or 403), or a local
    /// file is not readable.
    Unauthorized,
    /// The feed or file does not exist.
    NotFound,
    /// The feed asked us to slow down (429).
    Throttled,
    /// The feed's server failed (5xx).
    Upstream,
    /// The feed refused the request for another reason.
    Rejected,
    /// The body is not an iCalendar document.
    Malformed,
    /// One VEVENT carries dates or rules we cannot use.
    InvalidEvent,
    /// The calendar URL cannot be used as configured.
    Misconfigured,
    /// A refresh was abandoned because shutdown was requested.
    Cancelled,
    /// Reading a local feed failed.
    Io,
}

impl ProviderErrorCode {
    /// Returns true when trying again later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable | Self::Throttled | Self::Upstream)
    }

    /// Returns a stable snake_case name, used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::Throttled => "throttled",
            Self::Upstream => "upstream",
            Self::Rejected => "rejected",
            Self::Malformed => "malformed",
            Self::InvalidEvent => "invalid_event",
            Self::Misconfigured => "misconfigured",
            Self::Cancelled => "cancelled",
            Self::Io => "io",
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure to fetch, parse or expand one calendar feed.
#[derive(Debug, Error)]
pub struct ProviderError {
    code: ProviderErrorCode,
    message: String,
    calendar: Option<String>,
    status: Option<u16>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            calendar: None,
            status: None,
            source: None,
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Unreachable, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NotFound, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Malformed, message)
    }

    pub fn invalid_event(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidEvent, message)
    }

    pub fn misconfigured(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Misconfigured, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Cancelled, message)
    }

    /// Classifies a non-success HTTP status.
    ///
    /// 2xx codes other than 200 are treated as a malformed answer, since they
    /// carry no calendar body.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let code = match status {
            401 | 403 => ProviderErrorCode::Unauthorized,
            404 | 410 => ProviderErrorCode::NotFound,
            429 => ProviderErrorCode::Throttled,
            500..=599 => ProviderErrorCode::Upstream,
            400..=499 => ProviderErrorCode::Rejected,
            _ => ProviderErrorCode::Malformed,
        };
        let mut err = Self::new(code, message);
        err.status = Some(status);
        err
    }

    /// Maps a failed local read.
    pub fn from_io(err: std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::NotFound => ProviderErrorCode::NotFound,
            std::io::ErrorKind::PermissionDenied => ProviderErrorCode::Unauthorized,
            _ => ProviderErrorCode::Io,
        };
        Self::new(code, format!("cannot read calendar file: {}", err)).with_source(err)
    }

    /// Tags the error with the feed it happened on.
    pub fn with_calendar(mut self, calendar: impl Into<String>) -> Self {
        self.calendar = Some(calendar.into());
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> ProviderErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn calendar(&self) -> Option<&str> {
        self.calendar.as_deref()
    }

    /// The HTTP status the feed answered with, if any.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ProviderErrorCode::Cancelled
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(calendar) = &self.calendar {
            write!(f, "calendar {}: ", calendar)?;
        }
        f.write_str(&self.message)?;
        match self.status {
            Some(status) => write!(f, " (HTTP {}, {})", status, self.code),
            None => write!(f, " ({})", self.code),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_statuses() {
        let cases = [
            (401, ProviderErrorCode::Unauthorized),
            (403, ProviderErrorCode::Unauthorized),
            (404, ProviderErrorCode::NotFound),
            (410, ProviderErrorCode::NotFound),
            (429, ProviderErrorCode::Throttled),
            (418, ProviderErrorCode::Rejected),
            (502, ProviderErrorCode::Upstream),
            (204, ProviderErrorCode::Malformed),
        ];
        for (status, code) in cases {
            let err = ProviderError::from_status(status, "feed failed");
            assert_eq!(err.code(), code, "status {}", status);
            assert_eq!(err.status(), Some(status));
        }
    }

    #[test]
    fn only_transient_failures_retry() {
        assert!(ProviderError::from_status(503, "down").is_retryable());
        assert!(ProviderError::from_status(429, "slow down").is_retryable());
        assert!(ProviderError::unreachable("timeout").is_retryable());
        assert!(!ProviderError::from_status(404, "gone").is_retryable());
        assert!(!ProviderError::malformed("not ical").is_retryable());
        assert!(!ProviderError::cancelled("stop").is_retryable());
    }

    #[test]
    fn io_errors() {
        use std::error::Error;
        use std::io::{Error as IoError, ErrorKind};

        let err = ProviderError::from_io(IoError::from(ErrorKind::NotFound));
        assert_eq!(err.code(), ProviderErrorCode::NotFound);
        assert!(err.source().is_some());

        let err = ProviderError::from_io(IoError::from(ErrorKind::PermissionDenied));
        assert_eq!(err.code(), ProviderErrorCode::Unauthorized);

        let err = ProviderError::from_io(IoError::other("disk on fire"));
        assert_eq!(err.code(), ProviderErrorCode::Io);
    }

    #[test]
    fn display() {
        let err = ProviderError::from_status(404, "calendar not found")
            .with_calendar("https://example.com/cal.ics");
        assert_eq!(
            err.to_string(),
            "calendar https://example.com/cal.ics: calendar not found (HTTP 404, not_found)"
        );

        let err = ProviderError::invalid_event("missing DTSTART");
        assert_eq!(err.to_string(), "missing DTSTART (invalid_event)");
        assert!(err.calendar().is_none());
    }
}
