//! Runs one dispatched execution group on the worker pool

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::breaker::ErrorBreaker;
use super::handle::{Counters, SchedulerHandle};
use crate::domain::{BatchJob, ExecutionGroup};
use crate::executor::WorkerExecutor;
use crate::jobs::JobStore;
use crate::stats::StatisticsService;

/// Everything a dispatched group needs once it leaves the loop
#[derive(Clone)]
pub(crate) struct GroupRunner {
    pub handle: SchedulerHandle,
    pub job_store: Arc<dyn JobStore>,
    pub executor: Arc<dyn WorkerExecutor>,
    pub statistics: Option<StatisticsService>,
    pub breaker: Arc<ErrorBreaker>,
    pub max_attempts: u32,
}

impl GroupRunner {
    pub async fn run(self, job: Arc<BatchJob>, group: Arc<ExecutionGroup>) {
        debug!(group_id = %group.id(), "GroupRunner::run: called");
        if group.is_cancelled() {
            debug!(group_id = %group.id(), "GroupRunner::run: cancelled before start");
            self.finish(job, &group, Duration::ZERO, Duration::ZERO).await;
            return;
        }

        group.mark_execution_started();
        let mut application_time = Duration::ZERO;
        let mut executed_time = Duration::ZERO;
        let (completed, failed) = loop {
            let executor = self.executor.clone();
            let attempt = group.clone();
            // Panics in handler code surface as join errors
            match tokio::spawn(async move { executor.execute(&attempt).await }).await {
                Ok(Ok(outcome)) => {
                    application_time += outcome.application_time;
                    executed_time += outcome.executed_time;
                    break (outcome.completed, outcome.failed);
                }
                Ok(Err(e)) => {
                    warn!(group_id = %group.id(), error = %e, "Execution group failed");
                }
                Err(e) => {
                    error!(group_id = %group.id(), error = %e, "Execution group panicked");
                }
            }

            if group.is_cancelled() || group.attempt() >= self.max_attempts {
                warn!(
                    group_id = %group.id(),
                    attempts = group.attempt(),
                    "Giving up on execution group, counting its requests as failed"
                );
                Counters::bump(&self.handle.counters.groups_exhausted);
                break (0, u32::try_from(group.num_requests()).unwrap_or(u32::MAX));
            }
            let id = group.reset_id();
            Counters::bump(&self.handle.counters.group_retries);
            info!(group_id = %id, "Retrying execution group");
        };

        group.set_counts(completed, failed);
        self.finish(job, &group, application_time, executed_time).await;
    }

    async fn finish(
        &self,
        job: Arc<BatchJob>,
        group: &ExecutionGroup,
        application_time: Duration,
        executed_time: Duration,
    ) {
        if let Some(statistics) = &self.statistics
            && group.execution_start_time().is_some()
        {
            let executed = statistics
                .update_group_statistics(group, application_time, executed_time)
                .await;
            debug!(group_id = %group.id(), ?executed, "GroupRunner::finish: statistics recorded");
        }
        if let Err(e) = self.job_store.complete_group(&job, group).await {
            error!(group_id = %group.id(), error = %e, "Failed to record group completion");
            self.breaker.record();
        }
        self.handle.group_finished(job, group);
    }
}
