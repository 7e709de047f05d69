//! Worker executors: run the requests of a dispatched execution group

mod simulated;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::ExecutionGroup;

pub use simulated::SimulatedExecutor;

/// Result of executing one group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupOutcome {
    pub completed: u32,
    pub failed: u32,
    /// Time spent inside the business application
    pub application_time: Duration,
    /// Time the worker took for the whole group, handler calls included
    pub executed_time: Duration,
}

/// Runs a dispatched group's requests against its business application
#[async_trait]
pub trait WorkerExecutor: Send + Sync {
    async fn execute(&self, group: &ExecutionGroup) -> eyre::Result<GroupOutcome>;
}
