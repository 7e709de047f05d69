//! StatisticsService - actor that owns the statistics aggregator
//!
//! Every mutation and every collation goes through the actor's command
//! channel, so a collation always sees a consistent set of buckets.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use statstore::{DurationType, StatisticValues, StatisticsRecord, StatisticsStore};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::events;
use super::messages::{StatsCommand, StatsError, StatsResponse};
use super::{CollationSummary, StatisticsAggregator};
use crate::domain::{ApplicationRegistry, ExecutionGroup};

/// Settings for the statistics actor
#[derive(Debug, Clone)]
pub struct StatisticsServiceConfig {
    /// Time between background collations; one also runs at startup
    pub collate_interval: Duration,
    pub channel_buffer: usize,
}

impl Default for StatisticsServiceConfig {
    fn default() -> Self {
        Self {
            collate_interval: Duration::from_secs(300),
            channel_buffer: 10_000,
        }
    }
}

/// Handle to send commands to the statistics actor
#[derive(Debug, Clone)]
pub struct StatisticsService {
    tx: mpsc::Sender<StatsCommand>,
}

impl StatisticsService {
    /// Spawn the actor over a statistics store
    pub fn spawn(
        store: Box<dyn StatisticsStore>,
        registry: Arc<dyn ApplicationRegistry>,
        config: StatisticsServiceConfig,
    ) -> Self {
        debug!(?config, "StatisticsService::spawn: called");
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        tokio::spawn(actor_loop(store, registry, rx, config.collate_interval));
        info!("StatisticsService spawned");
        Self { tx }
    }

    /// Add statistic values for an application at `time`
    pub async fn add_statistics(
        &self,
        application: &str,
        time: DateTime<Utc>,
        values: StatisticValues,
    ) -> Result<(), StatsError> {
        self.tx
            .send(StatsCommand::AddStatistics {
                application: application.to_string(),
                time,
                values,
            })
            .await
            .map_err(|_| StatsError::ChannelError)
    }

    /// Record a finished group and return how long it ran since dispatch
    ///
    /// `application_time` and `group_time` are reported by the worker; the
    /// returned duration is measured from the group's execution start.
    pub async fn update_group_statistics(
        &self,
        group: &ExecutionGroup,
        application_time: Duration,
        group_time: Duration,
    ) -> Duration {
        let now = Utc::now();
        let executed = group
            .execution_start_time()
            .and_then(|start| (now - start).to_std().ok())
            .unwrap_or_default();
        let requests = i64::from(group.completed_count()) + i64::from(group.failed_count());
        debug!(group_id = %group.id(), requests, ?executed, "update_group_statistics: called");

        let application_stats = StatisticValues::from([
            (events::APPLICATION_EXECUTED_GROUPS_COUNT.to_string(), 1),
            (events::APPLICATION_EXECUTED_REQUESTS_COUNT.to_string(), requests),
            (
                events::APPLICATION_EXECUTED_FAILED_REQUESTS_COUNT.to_string(),
                i64::from(group.failed_count()),
            ),
            (events::APPLICATION_EXECUTED_TIME.to_string(), millis(application_time)),
            (events::EXECUTED_TIME.to_string(), millis(group_time)),
        ]);
        let executed_stats = StatisticValues::from([
            (events::EXECUTED_GROUPS_COUNT.to_string(), 1),
            (events::EXECUTED_REQUESTS_COUNT.to_string(), requests),
            (events::EXECUTED_TIME.to_string(), millis(executed)),
        ]);

        for values in [application_stats, executed_stats] {
            if let Err(e) = self.add_statistics(group.application_name(), now, values).await {
                warn!(error = %e, group_id = %group.id(), "Failed to record group statistics");
            }
        }
        executed
    }

    /// Run a collation pass now
    pub async fn collate(&self) -> Result<CollationSummary, StatsError> {
        debug!("collate: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StatsCommand::Collate { reply: reply_tx })
            .await
            .map_err(|_| StatsError::ChannelError)?;
        reply_rx.await.map_err(|_| StatsError::ChannelError)?
    }

    /// Persist and evict the buckets of the named applications
    pub async fn schedule_save_statistics(&self, applications: Vec<String>) -> Result<usize, StatsError> {
        debug!(?applications, "schedule_save_statistics: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StatsCommand::Save {
                applications: Some(applications),
                reply: reply_tx,
            })
            .await
            .map_err(|_| StatsError::ChannelError)?;
        reply_rx.await.map_err(|_| StatsError::ChannelError)?
    }

    /// In-memory values of one bucket
    pub async fn get_statistics(
        &self,
        application: &str,
        duration_type: DurationType,
        time: DateTime<Utc>,
    ) -> Result<Option<StatisticValues>, StatsError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StatsCommand::GetStatistics {
                application: application.to_string(),
                duration_type,
                time,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StatsError::ChannelError)?;
        reply_rx.await.map_err(|_| StatsError::ChannelError)
    }

    /// In-memory buckets, optionally for one application
    pub async fn statistics_list(&self, application: Option<String>) -> Result<Vec<StatisticsRecord>, StatsError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StatsCommand::ListStatistics {
                application,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StatsError::ChannelError)?;
        reply_rx.await.map_err(|_| StatsError::ChannelError)
    }

    /// Save every bucket and stop the actor
    pub async fn shutdown(&self) -> Result<usize, StatsError> {
        debug!("shutdown: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StatsCommand::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| StatsError::ChannelError)?;
        reply_rx.await.map_err(|_| StatsError::ChannelError)?
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// The actor loop that owns the aggregator and the store
async fn actor_loop(
    mut store: Box<dyn StatisticsStore>,
    registry: Arc<dyn ApplicationRegistry>,
    mut rx: mpsc::Receiver<StatsCommand>,
    collate_interval: Duration,
) {
    debug!("StatisticsService actor started");
    let mut aggregator = StatisticsAggregator::new();
    let is_known = |application: &str| registry.lookup(application).is_some();

    if let Err(e) = aggregator.collate(store.as_mut(), is_known, Utc::now()) {
        warn!(error = %e, "Startup statistics collation failed");
    }

    let period = collate_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else {
                    debug!("actor_loop: all handles dropped, saving statistics");
                    if let Err(e) = aggregator.save(store.as_mut(), None) {
                        warn!(error = %e, "Failed to save statistics on close");
                    }
                    break;
                };
                match cmd {
                    StatsCommand::AddStatistics { application, time, values } => {
                        aggregator.add_statistics(&application, time, &values);
                    }
                    StatsCommand::Collate { reply } => {
                        debug!("actor_loop: Collate command");
                        let result = aggregator.collate(store.as_mut(), is_known, Utc::now());
                        if let Err(e) = &result {
                            warn!(error = %e, "Statistics collation failed");
                        }
                        let _ = reply.send(result);
                    }
                    StatsCommand::Save { applications, reply } => {
                        debug!(?applications, "actor_loop: Save command");
                        let result: StatsResponse<usize> = aggregator.save(store.as_mut(), applications.as_deref());
                        let _ = reply.send(result);
                    }
                    StatsCommand::GetStatistics { application, duration_type, time, reply } => {
                        let _ = reply.send(aggregator.values(&application, duration_type, time));
                    }
                    StatsCommand::ListStatistics { application, reply } => {
                        let _ = reply.send(aggregator.list(application.as_deref()));
                    }
                    StatsCommand::Shutdown { reply } => {
                        info!("StatisticsService shutting down");
                        let _ = reply.send(aggregator.save(store.as_mut(), None));
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = aggregator.collate(store.as_mut(), is_known, Utc::now()) {
                    warn!(error = %e, "Statistics collation failed, retrying next pass");
                }
            }
        }
    }

    debug!("StatisticsService actor stopped");
}

#[cfg(test)]
mod tests {
    use statstore::SqliteStatisticsStore;
    use tempfile::TempDir;

    use super::*;
    use crate::domain::{BatchJob, BusinessApplication, JobParameters, Module, StaticApplicationRegistry};

    fn registry() -> Arc<StaticApplicationRegistry> {
        let registry = StaticApplicationRegistry::new();
        registry.register(BusinessApplication::new("geo", Arc::new(Module::new("m")), 2, 10));
        Arc::new(registry)
    }

    fn config() -> StatisticsServiceConfig {
        StatisticsServiceConfig {
            collate_interval: Duration::from_secs(3600),
            channel_buffer: 64,
        }
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let store = SqliteStatisticsStore::open_in_memory().unwrap();
        let service = StatisticsService::spawn(Box::new(store), registry(), config());
        let now = Utc::now();
        service
            .add_statistics("geo", now, StatisticValues::from([("x".to_string(), 2)]))
            .await
            .unwrap();

        let day = service.get_statistics("geo", DurationType::Day, now).await.unwrap().unwrap();
        assert_eq!(day["x"], 2);
        assert!(service.get_statistics("other", DurationType::Day, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_group_statistics() {
        let store = SqliteStatisticsStore::open_in_memory().unwrap();
        let registry = registry();
        let service = StatisticsService::spawn(Box::new(store), registry.clone(), config());

        let app = registry.lookup("geo").unwrap();
        let job = BatchJob::new(1, "geo", JobParameters::new(), 10);
        let group = ExecutionGroup::new(&job, app, 1, 10);
        group.mark_execution_started();
        group.set_counts(8, 2);
        service
            .update_group_statistics(&group, Duration::from_millis(40), Duration::from_millis(55))
            .await;

        let hour = service
            .get_statistics("geo", DurationType::Hour, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hour[events::APPLICATION_EXECUTED_GROUPS_COUNT], 1);
        assert_eq!(hour[events::APPLICATION_EXECUTED_REQUESTS_COUNT], 10);
        assert_eq!(hour[events::APPLICATION_EXECUTED_FAILED_REQUESTS_COUNT], 2);
        assert_eq!(hour[events::APPLICATION_EXECUTED_TIME], 40);
        assert_eq!(hour[events::EXECUTED_GROUPS_COUNT], 1);
        assert_eq!(hour[events::EXECUTED_REQUESTS_COUNT], 10);
        assert!(hour[events::EXECUTED_TIME] >= 55);
    }

    #[tokio::test]
    async fn test_executed_time_adds_worker_and_dispatch_durations() {
        let store = SqliteStatisticsStore::open_in_memory().unwrap();
        let registry = registry();
        let service = StatisticsService::spawn(Box::new(store), registry.clone(), config());

        let app = registry.lookup("geo").unwrap();
        let job = BatchJob::new(1, "geo", JobParameters::new(), 4);
        let group = ExecutionGroup::new(&job, app, 1, 4);
        group.mark_execution_started();
        tokio::time::sleep(Duration::from_millis(200)).await;
        group.set_counts(4, 0);

        let executed = service
            .update_group_statistics(&group, Duration::from_millis(150), Duration::from_millis(180))
            .await;
        assert!(executed >= Duration::from_millis(200));

        let hour = service
            .get_statistics("geo", DurationType::Hour, Utc::now())
            .await
            .unwrap()
            .unwrap();
        // Worker-reported group time plus the time since dispatch, each once
        assert_eq!(hour[events::EXECUTED_TIME], 180 + millis(executed));
        assert_eq!(hour[events::APPLICATION_EXECUTED_TIME], 150);
    }

    #[tokio::test]
    async fn test_collate_and_shutdown_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.db");
        let store = SqliteStatisticsStore::open(&path).unwrap();
        let service = StatisticsService::spawn(Box::new(store), registry(), config());

        let now = Utc::now();
        service
            .add_statistics("geo", now, StatisticValues::from([("x".to_string(), 5)]))
            .await
            .unwrap();
        let summary = service.collate().await.unwrap();
        assert_eq!(summary.saved, 4);

        service
            .add_statistics("geo", now, StatisticValues::from([("x".to_string(), 1)]))
            .await
            .unwrap();
        service.shutdown().await.unwrap();
        assert!(matches!(service.collate().await, Err(StatsError::ChannelError)));

        let reopened = SqliteStatisticsStore::open(&path).unwrap();
        let records = reopened.records().unwrap();
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.values["x"] == 6));
    }

    #[tokio::test]
    async fn test_save_evicts_application() {
        let store = SqliteStatisticsStore::open_in_memory().unwrap();
        let service = StatisticsService::spawn(Box::new(store), registry(), config());
        let now = Utc::now();
        service
            .add_statistics("geo", now, StatisticValues::from([("x".to_string(), 1)]))
            .await
            .unwrap();
        assert_eq!(service.statistics_list(None).await.unwrap().len(), 4);

        let saved = service.schedule_save_statistics(vec!["geo".to_string()]).await.unwrap();
        assert_eq!(saved, 4);
        assert!(service.statistics_list(Some("geo".to_string())).await.unwrap().is_empty());
    }
}
