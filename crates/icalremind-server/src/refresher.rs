//! Periodic refresh of live calendars.
//!
//! A [`Refresher`] re-fetches every tracked [`LiveCalendar`] once per
//! interval, spread by a little jitter so that several instances do not hit
//! a feed together. While every feed fails it waits on a growing [`Backoff`]
//! instead. A [`RefreshHandle`] asks for an immediate round.
//!
//! Whenever a round publishes new calendar data, the [`Notifier`] is
//! invalidated so its queue reflects the change.

use std::hash::{BuildHasher, RandomState};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use icalremind_providers::LiveCalendar;

use crate::error::{ServerError, ServerResult};
use crate::notifier::Notifier;

/// Delay schedule after failed rounds: `first`, then multiplied by `factor`
/// per further failure, never above `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub first: Duration,
    pub ceiling: Duration,
    pub factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            first: Duration::from_secs(5),
            ceiling: Duration::from_secs(300),
            factor: 2.0,
        }
    }
}

impl Backoff {
    /// Delay after `failed_rounds` failures in a row. Zero means no backoff.
    pub fn delay(&self, failed_rounds: u32) -> Duration {
        let Some(exponent) = failed_rounds.checked_sub(1) else {
            return Duration::ZERO;
        };
        let scale = self.factor.powi(i32::try_from(exponent).unwrap_or(i32::MAX));
        if !scale.is_finite() || self.first.as_secs_f64() * scale >= self.ceiling.as_secs_f64() {
            return self.ceiling;
        }
        self.first.mul_f64(scale)
    }
}

/// How often a [`Refresher`] runs.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Time between successful rounds.
    pub interval: Duration,
    /// Spread applied to `interval`, as a fraction in `0.0..=1.0`.
    pub jitter: f64,
    pub backoff: Backoff,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(5 * 60))
    }
}

impl RefreshConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            jitter: 0.1,
            backoff: Backoff::default(),
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Rejects a zero interval and a backoff that shrinks.
    pub fn validate(&self) -> ServerResult<()> {
        if self.interval.is_zero() {
            return Err(ServerError::config("refresh interval must be positive"));
        }
        if self.backoff.factor < 1.0 {
            return Err(ServerError::config(format!(
                "backoff factor must be at least 1, got {}",
                self.backoff.factor
            )));
        }
        Ok(())
    }

    /// The interval moved by up to `jitter` of itself in either direction.
    pub fn jittered_interval(&self) -> Duration {
        // Uniform enough in [-1, 1] for spreading requests.
        let unit = RandomState::new().hash_one(Utc::now().timestamp_nanos_opt()) as f64
            / u64::MAX as f64
            * 2.0
            - 1.0;
        self.interval.mul_f64((1.0 + unit * self.jitter).max(0.0))
    }
}

/// Counters kept by a [`Refresher`].
#[derive(Debug, Clone, Default)]
pub struct RefreshState {
    /// Rounds in a row in which every calendar failed.
    pub failed_rounds: u32,
    pub rounds: u64,
    /// Rounds that published new calendar data.
    pub changed_rounds: u64,
    /// When a round last refreshed at least one calendar.
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl RefreshState {
    fn round_succeeded(&mut self, changed: bool) {
        let now = Utc::now();
        self.rounds += 1;
        self.changed_rounds += u64::from(changed);
        self.failed_rounds = 0;
        self.last_success = Some(now);
        self.last_attempt = Some(now);
        self.last_error = None;
    }

    fn round_failed(&mut self, error: String) {
        self.rounds += 1;
        self.failed_rounds = self.failed_rounds.saturating_add(1);
        self.last_attempt = Some(Utc::now());
        self.last_error = Some(error);
    }
}

pub type SharedRefreshState = Arc<RwLock<RefreshState>>;

/// Refreshes live calendars and invalidates a notifier on change.
pub struct Refresher {
    config: RefreshConfig,
    calendars: Vec<Arc<LiveCalendar>>,
    notifier: Arc<Notifier>,
    trigger: Arc<Notify>,
    state: SharedRefreshState,
}

impl Refresher {
    /// Creates a refresher for `calendars`.
    pub fn new(
        config: RefreshConfig,
        calendars: Vec<Arc<LiveCalendar>>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            config,
            calendars,
            notifier,
            trigger: Arc::new(Notify::new()),
            state: SharedRefreshState::default(),
        }
    }

    /// Returns a handle for triggering refreshes and reading state.
    pub fn handle(&self) -> RefreshHandle {
        RefreshHandle {
            trigger: self.trigger.clone(),
            state: self.state.clone(),
        }
    }

    /// Refreshes every calendar now, then on schedule, until `cancel` fires.
    ///
    /// Individual calendar failures are logged and never stop the loop.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Cancelled`] once `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> ServerResult<()> {
        info!(
            calendars = self.calendars.len(),
            interval_secs = self.config.interval.as_secs(),
            "Refresher started"
        );

        loop {
            self.refresh_all(&cancel).await?;

            let delay = self.next_delay().await;
            debug!(delay_secs = delay.as_secs(), "Next refresh scheduled");

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Refresher stopping");
                    return Err(ServerError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {
                    debug!("Refresh interval elapsed");
                }
                _ = self.trigger.notified() => {
                    debug!("Manual refresh requested");
                }
            }
        }
    }

    async fn next_delay(&self) -> Duration {
        let failed_rounds = self.state.read().await.failed_rounds;
        if failed_rounds == 0 {
            return self.config.jittered_interval();
        }

        let delay = self.config.backoff.delay(failed_rounds);
        debug!(failed_rounds, delay_ms = delay.as_millis() as u64, "Backing off");
        delay
    }

    /// Refreshes each calendar in turn. Returns whether any changed.
    async fn refresh_all(&self, cancel: &CancellationToken) -> ServerResult<bool> {
        let mut changed = false;
        let mut failures = 0;
        let mut last_error = None;

        for calendar in &self.calendars {
            match calendar.refresh(cancel).await {
                Ok(true) => {
                    debug!(calendar = %calendar.source_name(), "Calendar changed");
                    changed = true;
                }
                Ok(false) => {}
                Err(e) if e.is_cancelled() => return Err(ServerError::Cancelled),
                Err(e) => {
                    warn!(
                        calendar = %calendar.source_name(),
                        retryable = e.is_retryable(),
                        error = %e,
                        "Failed to refresh calendar"
                    );
                    failures += 1;
                    last_error = Some(e.to_string());
                }
            }
        }

        if changed {
            self.notifier.invalidate();
        }

        let mut state = self.state.write().await;
        match last_error {
            Some(error) if failures == self.calendars.len() => state.round_failed(error),
            _ => state.round_succeeded(changed),
        }

        Ok(changed)
    }
}

/// Handle for a running [`Refresher`].
#[derive(Clone, Debug)]
pub struct RefreshHandle {
    trigger: Arc<Notify>,
    state: SharedRefreshState,
}

impl RefreshHandle {
    /// Requests an immediate refresh. Requests made before the refresher
    /// wakes collapse into one.
    pub fn refresh_now(&self) {
        self.trigger.notify_one();
    }

    /// Returns the current refresh state.
    pub async fn state(&self) -> RefreshState {
        self.state.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::NotifierOptions;
    use icalremind_providers::{BoxFuture, DocumentSource, ProviderError, ProviderResult};
    use std::sync::atomic::{AtomicU32, Ordering};

    const ICS: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:a\r\n\
                       SUMMARY:Standup\r\nDTSTART:20250205T110000Z\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

    /// Counts fetches; fails the first `failures` of them.
    #[derive(Debug, Default)]
    struct CountingSource {
        fetches: AtomicU32,
        failures: u32,
    }

    impl CountingSource {
        fn failing(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicU32::new(0),
                failures,
            })
        }

        fn fetches(&self) -> u32 {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl DocumentSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        fn fetch(&self) -> BoxFuture<'_, ProviderResult<String>> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            let fail = n < self.failures;
            Box::pin(async move {
                if fail {
                    Err(ProviderError::from_status(503, format!("failure {}", n)))
                } else {
                    Ok(ICS.to_string())
                }
            })
        }
    }

    fn refresher(config: RefreshConfig, source: Arc<CountingSource>) -> (Refresher, Arc<LiveCalendar>) {
        let calendar = Arc::new(LiveCalendar::new(source));
        let notifier = Arc::new(Notifier::new(NotifierOptions::default()));
        (
            Refresher::new(config, vec![calendar.clone()], notifier),
            calendar,
        )
    }

    #[test]
    fn rejects_unusable_config() {
        assert!(RefreshConfig::default().validate().is_ok());
        assert!(RefreshConfig::new(Duration::ZERO).validate().is_err());

        let shrinking = Backoff {
            factor: 0.5,
            ..Backoff::default()
        };
        assert!(RefreshConfig::default().with_backoff(shrinking).validate().is_err());
    }

    #[test]
    fn jitter_stays_in_range() {
        let config = RefreshConfig::new(Duration::from_secs(60)).with_jitter(0.1);
        for _ in 0..20 {
            let delay = config.jittered_interval().as_secs_f64();
            assert!((54.0..=66.0).contains(&delay), "delay {}", delay);
        }

        let exact = RefreshConfig::new(Duration::from_secs(60)).with_jitter(0.0);
        assert_eq!(exact.jittered_interval(), Duration::from_secs(60));
    }

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let backoff = Backoff::default();
        let delays: Vec<u64> = (0..=8).map(|n| backoff.delay(n).as_secs()).collect();
        assert_eq!(delays, [0, 5, 10, 20, 40, 80, 160, 300, 300]);
        assert_eq!(backoff.delay(u32::MAX), backoff.ceiling);
    }

    #[test]
    fn state_counts_rounds() {
        let mut state = RefreshState::default();

        state.round_failed("feed down".to_string());
        state.round_failed("feed down".to_string());
        assert_eq!(state.failed_rounds, 2);
        assert!(state.last_success.is_none());
        assert_eq!(state.last_error.as_deref(), Some("feed down"));

        state.round_succeeded(true);
        state.round_succeeded(false);
        assert_eq!(state.rounds, 4);
        assert_eq!(state.failed_rounds, 0);
        assert_eq!(state.changed_rounds, 1);
        assert!(state.last_success.is_some());
        assert!(state.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_immediately_then_on_demand() {
        let source = CountingSource::failing(0);
        let (refresher, calendar) =
            refresher(RefreshConfig::new(Duration::from_secs(3600)), source.clone());
        let handle = refresher.handle();
        let mut snapshots = calendar.subscribe();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(refresher.run(cancel.clone()));

        snapshots.changed().await.unwrap();
        assert!(calendar.snapshot().is_some());
        assert_eq!(source.fetches(), 1);

        handle.refresh_now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.fetches(), 2);

        let state = handle.state().await;
        assert_eq!(state.rounds, 2);
        // The second fetch returned the same document.
        assert_eq!(state.changed_rounds, 1);

        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Err(ServerError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn backs_off_while_failing() {
        let source = CountingSource::failing(3);
        let config = RefreshConfig::new(Duration::from_secs(3600)).with_backoff(Backoff {
            first: Duration::from_millis(10),
            ceiling: Duration::from_millis(100),
            factor: 2.0,
        });
        let (refresher, calendar) = refresher(config, source.clone());
        let handle = refresher.handle();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(refresher.run(cancel.clone()));

        // 10ms + 20ms + 40ms of backoff, then the fourth fetch succeeds.
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(source.fetches(), 4);
        assert!(calendar.snapshot().is_some());
        let state = handle.state().await;
        assert_eq!(state.failed_rounds, 0);
        assert!(state.last_error.is_none());

        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Err(ServerError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_recorded() {
        let source = CountingSource::failing(u32::MAX);
        let (refresher, _calendar) = refresher(RefreshConfig::default(), source);
        let handle = refresher.handle();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(refresher.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(1)).await;

        let state = handle.state().await;
        assert_eq!(state.failed_rounds, 1);
        assert!(state.last_error.unwrap().contains("failure 0"));

        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Err(ServerError::Cancelled)));
    }
}
