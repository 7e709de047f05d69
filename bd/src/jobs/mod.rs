//! Job storage
//!
//! The scheduler reads jobs and carves execution groups through [`JobStore`].
//! [`MemoryJobStore`] backs the simulation and tests.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{BatchJob, BusinessApplication, ExecutionGroup, JobId};

pub use memory::{JobProgress, MemoryJobStore};

/// Source of batch jobs and their execution groups
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Ids of jobs that still have work to schedule
    async fn load_pending_job_ids(&self) -> eyre::Result<Vec<JobId>>;

    async fn get_job(&self, id: JobId) -> eyre::Result<Option<Arc<BatchJob>>>;

    /// Carve the next execution group off a job
    ///
    /// Groups of one job come back in strictly increasing sequence order.
    /// `None` means the job has no unscheduled requests left.
    async fn next_group(&self, job: &BatchJob, application: Arc<BusinessApplication>)
    -> eyre::Result<Option<ExecutionGroup>>;

    /// Record a finished group's counts against its job
    async fn complete_group(&self, job: &BatchJob, group: &ExecutionGroup) -> eyre::Result<()>;
}
