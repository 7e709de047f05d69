//! Withdrawal of business applications removed from the configuration

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::ConfigEvent;
use crate::domain::StaticApplicationRegistry;
use crate::scheduler::SchedulerHandle;
use crate::stats::{StatisticsService, StatsError};

/// Take an application out of service
///
/// The application is unregistered so its pending jobs are dropped, its
/// registered groups are cancelled, and its statistics are saved and evicted.
/// Returns the number of statistics buckets saved.
pub async fn withdraw_application(
    registry: &StaticApplicationRegistry,
    scheduler: &SchedulerHandle,
    statistics: Option<&StatisticsService>,
    application: &str,
) -> Result<usize, StatsError> {
    debug!(%application, "withdraw_application: called");
    if registry.unregister(application).is_none() {
        debug!(%application, "withdraw_application: not registered");
    }
    if !scheduler.clear_application(application) {
        warn!(%application, "Scheduler stopped, nothing to clear");
    }

    let Some(statistics) = statistics else {
        return Ok(0);
    };
    let saved = statistics.schedule_save_statistics(vec![application.to_string()]).await?;
    info!(%application, saved, "Application withdrawn");
    Ok(saved)
}

/// Withdraw applications as they disappear from the configuration
///
/// The task ends when the sender side is dropped.
pub fn spawn_application_withdrawal_listener(
    registry: Arc<StaticApplicationRegistry>,
    scheduler: SchedulerHandle,
    statistics: Option<StatisticsService>,
    mut rx: broadcast::Receiver<ConfigEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ConfigEvent::ApplicationRemoved { name }) => {
                    if let Err(e) = withdraw_application(&registry, &scheduler, statistics.as_ref(), &name).await {
                        error!(application = %name, error = %e, "Failed to save statistics of withdrawn application");
                    }
                }
                Ok(ConfigEvent::PropertyChanged { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Withdrawal listener lagged behind configuration events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
