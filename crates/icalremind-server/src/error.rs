//! Server error types.

use icalremind_providers::ProviderError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The loop was cancelled through its token.
    #[error("Server loop cancelled")]
    Cancelled,

    /// The notification receiver was dropped.
    #[error("Notification sink closed")]
    SinkClosed,

    /// A calendar could not be fetched or parsed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if this is the normal result of cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Provider(e) => e.is_cancelled(),
            _ => false,
        }
    }
}
