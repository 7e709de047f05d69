//! Simulated worker executor with random latencies and failures

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::Instant;
use tracing::debug;

use super::{GroupOutcome, WorkerExecutor};
use crate::domain::ExecutionGroup;

/// Executor that sleeps instead of invoking handler code
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    /// Per-request latency bounds in milliseconds
    min_latency_ms: u64,
    max_latency_ms: u64,
    /// Chance each request fails
    failure_rate: f64,
    /// Chance the whole group errors and gets retried
    group_error_rate: f64,
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(1, 5, 0.0)
    }
}

impl SimulatedExecutor {
    pub fn new(min_latency_ms: u64, max_latency_ms: u64, failure_rate: f64) -> Self {
        Self {
            min_latency_ms,
            max_latency_ms: max_latency_ms.max(min_latency_ms),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            group_error_rate: 0.0,
        }
    }

    pub fn with_group_error_rate(mut self, rate: f64) -> Self {
        self.group_error_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Draw latency and per-request outcomes up front
    fn plan(&self, num_requests: u64) -> (bool, Duration, u32) {
        let mut rng = rand::rng();
        let errored = rng.random_bool(self.group_error_rate);
        let mut total_ms = 0;
        let mut failed = 0;
        for _ in 0..num_requests {
            total_ms += rng.random_range(self.min_latency_ms..=self.max_latency_ms);
            if rng.random_bool(self.failure_rate) {
                failed += 1;
            }
        }
        (errored, Duration::from_millis(total_ms), failed)
    }
}

#[async_trait]
impl WorkerExecutor for SimulatedExecutor {
    async fn execute(&self, group: &ExecutionGroup) -> eyre::Result<GroupOutcome> {
        debug!(group_id = %group.id(), requests = group.num_requests(), "SimulatedExecutor::execute: called");
        let started = Instant::now();
        let (errored, latency, failed) = self.plan(group.num_requests());
        tokio::time::sleep(latency).await;
        if errored {
            eyre::bail!("Simulated failure executing group {}", group.id());
        }
        let total = u32::try_from(group.num_requests()).unwrap_or(u32::MAX);
        Ok(GroupOutcome {
            completed: total.saturating_sub(failed),
            failed,
            application_time: latency,
            executed_time: started.elapsed(),
        })
    }
}
