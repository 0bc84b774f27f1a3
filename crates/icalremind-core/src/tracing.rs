//! Tracing setup for icalremind.
//!
//! All binaries log to stderr through one subscriber built here. The
//! `RUST_LOG` environment variable overrides the configured level unless an
//! explicit filter is set.
//!
//! ```ignore
//! use icalremind_core::tracing::{init_tracing, TracingConfig};
//!
//! init_tracing(TracingConfig::for_verbosity(cli.debug))?;
//! ```

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Crates whose events are governed by the configured level. Everything
/// else (HTTP stack, runtime) stays at `warn`.
const WORKSPACE_TARGETS: &[&str] = &[
    "icalremind",
    "icalremind_core",
    "icalremind_providers",
    "icalremind_server",
    "icalremind_client",
];

/// Errors that can occur during tracing initialization
#[derive(Debug, Error)]
pub enum TracingError {
    /// Failed to set global subscriber
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    /// Failed to parse env filter directive
    #[error("failed to parse env filter: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::ParseError),
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingOutputFormat {
    /// Single-line human-readable output (default)
    #[default]
    Compact,
    /// Multi-line human-readable output
    Pretty,
    /// One JSON object per line
    Json,
}

/// Configuration for tracing initialization
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level for workspace crates when `RUST_LOG` is not set
    pub level: Level,
    /// Output format
    pub output_format: TracingOutputFormat,
    /// Whether to include the module path of each event
    pub include_target: bool,
    /// Explicit filter directive; takes precedence over `RUST_LOG`
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            output_format: TracingOutputFormat::Compact,
            include_target: false,
            env_filter: None,
        }
    }
}

impl TracingConfig {
    /// Warnings only, or everything down to debug with module paths when
    /// `debug` is set.
    #[must_use]
    pub fn for_verbosity(debug: bool) -> Self {
        if debug {
            Self {
                level: Level::DEBUG,
                include_target: true,
                ..Self::default()
            }
        } else {
            Self::default()
        }
    }

    /// Set the level for workspace crates
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the output format
    #[must_use]
    pub fn with_format(mut self, format: TracingOutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Set an explicit filter directive
    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Returns the filter directive used when neither an explicit filter nor
    /// `RUST_LOG` is set.
    pub fn default_directive(&self) -> String {
        let level = self.level.to_string().to_lowercase();
        let mut directives = vec!["warn".to_string()];
        directives.extend(
            WORKSPACE_TARGETS
                .iter()
                .map(|target| format!("{}={}", target, level)),
        );
        directives.join(",")
    }

    fn filter(&self) -> Result<EnvFilter, TracingError> {
        if let Some(ref filter) = self.env_filter {
            return Ok(EnvFilter::try_new(filter)?);
        }
        if self.level > Level::WARN {
            // Explicit verbosity wins over the environment.
            return Ok(EnvFilter::try_new(self.default_directive())?);
        }
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => Ok(EnvFilter::try_new(self.default_directive())?),
        }
    }
}

/// Initialize the global subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already set or if the filter
/// directive is invalid.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let filter = config.filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.output_format {
        TracingOutputFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(config.include_target);
            tracing::subscriber::set_global_default(registry.with(layer))?;
        }
        TracingOutputFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_target(config.include_target);
            tracing::subscriber::set_global_default(registry.with(layer))?;
        }
        TracingOutputFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(config.include_target);
            tracing::subscriber::set_global_default(registry.with(layer))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_quiet() {
        let config = TracingConfig::default();
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.output_format, TracingOutputFormat::Compact);
        assert!(!config.include_target);
        assert!(config.env_filter.is_none());
    }

    #[test]
    fn verbosity() {
        let quiet = TracingConfig::for_verbosity(false);
        assert_eq!(quiet.level, Level::WARN);

        let loud = TracingConfig::for_verbosity(true);
        assert_eq!(loud.level, Level::DEBUG);
        assert!(loud.include_target);
    }

    #[test]
    fn default_directive_covers_workspace_crates() {
        let directive = TracingConfig::default()
            .with_level(Level::DEBUG)
            .default_directive();

        assert!(directive.starts_with("warn,"));
        assert!(directive.contains("icalremind_server=debug"));
        assert!(directive.contains("icalremind_providers=debug"));
        assert!(EnvFilter::try_new(directive).is_ok());
    }

    #[test]
    fn explicit_filter_is_used() {
        let config = TracingConfig::default()
            .with_format(TracingOutputFormat::Json)
            .with_env_filter("icalremind_server=trace");

        assert_eq!(config.output_format, TracingOutputFormat::Json);
        assert!(config.filter().is_ok());
    }

    #[test]
    fn invalid_filter_is_rejected() {
        let config = TracingConfig::default().with_env_filter("icalremind=notalevel[");
        assert!(matches!(config.filter(), Err(TracingError::EnvFilter(_))));
    }
}
