//! The `run` command: watch calendars and deliver reminders.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use icalremind_providers::LiveCalendar;
use icalremind_server::{Notification, Notifier, Refresher, ServerResult};

use crate::commands::build_targets;
use crate::config::ClientConfig;
use crate::delivery::Dispatcher;
use crate::error::{ClientError, ClientResult};

/// Runs until Ctrl-C.
pub async fn run(config: &ClientConfig) -> ClientResult<()> {
    config.validate()?;

    let zone = config.zone()?;
    let targets = build_targets(config)?;
    let calendars: Vec<Arc<LiveCalendar>> = targets.iter().map(|t| t.calendar.clone()).collect();
    let dispatcher = Dispatcher::new(targets, zone)?;

    let notifier = Arc::new(Notifier::new(config.notifier_options()?));
    notifier.update(|state| {
        for calendar in &calendars {
            state.add_calendar(calendar.clone());
        }
    });

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupted, shutting down"),
                Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
            }
            cancel.cancel();
        }
    });

    let (tx, mut rx) = mpsc::channel::<Notification>(1);
    let notifier_task: JoinHandle<ServerResult<()>> = tokio::spawn({
        let notifier = notifier.clone();
        let cancel = cancel.clone();
        async move { notifier.run(cancel, tx).await }
    });

    let refresher_task: JoinHandle<ServerResult<()>> = match config.refresh_config() {
        Some(refresh) => {
            refresh.validate()?;
            let refresher = Refresher::new(refresh, calendars, notifier.clone());
            tokio::spawn(refresher.run(cancel.clone()))
        }
        None => tokio::spawn(refresh_once(calendars, notifier.clone(), cancel.clone())),
    };

    info!(calendars = dispatcher.targets().len(), zone = %zone, "Watching calendars");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => {
                let Some(notification) = received else {
                    break;
                };
                debug!(
                    event = %notification.event.summary,
                    starts_at = %notification.event.starts_at,
                    remind_at = %notification.remind_at,
                    "Received notification"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    delivered = dispatcher.deliver(&notification) => {
                        if let Err(e) = delivered {
                            error!(event = %notification.event.summary, error = %e, "Failed to send notification");
                        }
                    }
                }
            }
        }
    }

    cancel.cancel();
    finish("refresher", refresher_task).await?;
    finish("notifier", notifier_task).await
}

/// Fetches every calendar once, for configurations that disable periodic
/// refresh.
async fn refresh_once(
    calendars: Vec<Arc<LiveCalendar>>,
    notifier: Arc<Notifier>,
    cancel: CancellationToken,
) -> ServerResult<()> {
    let mut changed = false;
    for calendar in &calendars {
        match calendar.refresh(&cancel).await {
            Ok(updated) => changed |= updated,
            Err(e) if e.is_cancelled() => return Err(e.into()),
            Err(e) => warn!(calendar = %calendar.source_name(), error = %e, "Failed to refresh calendar"),
        }
    }
    if changed {
        notifier.invalidate();
    }
    Ok(())
}

/// Waits for a background task, treating cancellation as a clean exit.
async fn finish(name: &str, task: JoinHandle<ServerResult<()>>) -> ClientResult<()> {
    match task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) if e.is_cancelled() => {
            debug!(task = name, "Task cancelled");
            Ok(())
        }
        Ok(Err(e)) => Err(ClientError::Server(e)),
        Err(e) => Err(ClientError::Task(format!("{}: {}", name, e))),
    }
}
