//! Where calendar documents come from.
//!
//! A [`DocumentSource`] fetches the raw text of one calendar. Live calendars
//! refresh through this trait, which keeps them testable without a network.
//!
//! - [`HttpSource`]: `http://`, `https://` and `webcal://` URLs
//! - [`FileSource`]: `file://` URLs, read from local disk

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "http")]
use reqwest::{Client, Response, StatusCode};
use tracing::trace;
#[cfg(feature = "http")]
use tracing::{debug, warn};
use url::Url;

use crate::error::{ProviderError, ProviderResult};

/// A boxed future, so that [`DocumentSource`] stays object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Fetches the raw text of a calendar.
pub trait DocumentSource: Send + Sync + fmt::Debug {
    /// Returns a name for logs and errors, usually the URL.
    fn name(&self) -> &str;

    /// Fetches the current document.
    ///
    /// Dropping the future abandons the fetch.
    fn fetch(&self) -> BoxFuture<'_, ProviderResult<String>>;
}

/// Configuration shared by the built-in sources.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Location of the calendar.
    pub url: Url,
    /// Request timeout.
    pub timeout: Duration,
    /// User agent string.
    pub user_agent: String,
}

impl SourceConfig {
    /// Default timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Creates a configuration for `url`. `webcal://` is read as `https://`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn new(url: impl AsRef<str>) -> Result<Self, url::ParseError> {
        let url = url.as_ref().trim();
        let parsed = match url.strip_prefix("webcal://") {
            Some(rest) => Url::parse(&format!("https://{}", rest))?,
            None => Url::parse(url)?,
        };
        Ok(Self {
            url: parsed,
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            user_agent: format!("icalremind/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Returns the URL as a string.
    pub fn url_str(&self) -> &str {
        self.url.as_str()
    }
}

/// Builds the source matching the URL scheme of `config`.
///
/// # Errors
///
/// Returns a configuration error for unsupported schemes.
pub fn source_for(config: SourceConfig) -> ProviderResult<Arc<dyn DocumentSource>> {
    match config.url.scheme() {
        #[cfg(feature = "http")]
        "http" | "https" => Ok(Arc::new(HttpSource::new(config)?)),
        "file" => Ok(Arc::new(FileSource::new(config)?)),
        scheme => Err(ProviderError::misconfigured(format!(
            "unsupported calendar URL scheme {:?}",
            scheme
        ))
        .with_calendar(config.url_str())),
    }
}

/// Fetches calendars over HTTP(S).
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    config: SourceConfig,
}

#[cfg(feature = "http")]
impl HttpSource {
    /// Creates a new HTTP source.
    pub fn new(config: SourceConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ProviderError::misconfigured("cannot build HTTP client").with_source(e))?;

        Ok(Self { client, config })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    async fn get(&self) -> ProviderResult<String> {
        debug!(url = %self.config.url, "Fetching calendar");

        let response = self
            .client
            .get(self.config.url.clone())
            .header("Accept", "text/calendar, */*;q=0.5")
            .send()
            .await
            .map_err(|e| {
                ProviderError::unreachable("request failed")
                    .with_calendar(self.config.url_str())
                    .with_source(e)
            })?;

        self.handle_response(response)
            .await
            .map_err(|e| e.with_calendar(self.config.url_str()))
    }

    async fn handle_response(&self, response: Response) -> ProviderResult<String> {
        let status = response.status();
        trace!(status = %status, "Received response");

        if status == StatusCode::OK {
            return response
                .text()
                .await
                .map_err(|e| ProviderError::unreachable("failed to read response body").with_source(e));
        }

        let body = response.text().await.unwrap_or_default();
        if !status.is_client_error() && !status.is_server_error() {
            warn!(status = %status, body = %body, "Unexpected response status");
        }
        let reason = status.canonical_reason().unwrap_or("unexpected status");
        Err(ProviderError::from_status(status.as_u16(), reason.to_lowercase()))
    }
}

#[cfg(feature = "http")]
impl DocumentSource for HttpSource {
    fn name(&self) -> &str {
        self.config.url_str()
    }

    fn fetch(&self) -> BoxFuture<'_, ProviderResult<String>> {
        Box::pin(self.get())
    }
}

/// Reads calendars from `file://` URLs.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    config: SourceConfig,
}

impl FileSource {
    /// Creates a source reading the file `config.url` points to.
    pub fn new(config: SourceConfig) -> ProviderResult<Self> {
        let path = config.url.to_file_path().map_err(|_| {
            ProviderError::misconfigured("not a local file URL").with_calendar(config.url_str())
        })?;
        Ok(Self { path, config })
    }

    async fn read(&self) -> ProviderResult<String> {
        trace!(path = %self.path.display(), "Reading calendar file");
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ProviderError::from_io(e).with_calendar(self.config.url_str()))
    }
}

impl DocumentSource for FileSource {
    fn name(&self) -> &str {
        self.config.url_str()
    }

    fn fetch(&self) -> BoxFuture<'_, ProviderResult<String>> {
        Box::pin(self.read())
    }
}
