//! Client error types.

use std::fmt;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug)]
pub enum ClientError {
    /// Configuration error.
    Config(String),
    /// Calendar fetch or parse error.
    Provider(icalremind_providers::ProviderError),
    /// Notifier or refresher error.
    Server(icalremind_server::ServerError),
    /// Logging setup failed.
    Tracing(icalremind_core::TracingError),
    /// A notification could not be delivered.
    Delivery(String),
    /// A background task panicked or was aborted.
    Task(String),
}

impl ClientError {
    /// Returns true if this error is the normal result of shutting down.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Server(err) => err.is_cancelled(),
            Self::Provider(err) => err.is_cancelled(),
            _ => false,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Provider(err) => write!(f, "calendar error: {}", err),
            Self::Server(err) => write!(f, "server error: {}", err),
            Self::Tracing(err) => write!(f, "logging error: {}", err),
            Self::Delivery(msg) => write!(f, "delivery failed: {}", msg),
            Self::Task(msg) => write!(f, "task failed: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Provider(err) => Some(err),
            Self::Server(err) => Some(err),
            Self::Tracing(err) => Some(err),
            _ => None,
        }
    }
}

impl From<icalremind_providers::ProviderError> for ClientError {
    fn from(err: icalremind_providers::ProviderError) -> Self {
        Self::Provider(err)
    }
}

impl From<icalremind_server::ServerError> for ClientError {
    fn from(err: icalremind_server::ServerError) -> Self {
        Self::Server(err)
    }
}

impl From<icalremind_core::TracingError> for ClientError {
    fn from(err: icalremind_core::TracingError) -> Self {
        Self::Tracing(err)
    }
}
