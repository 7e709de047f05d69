//! In-memory job store

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::JobStore;
use crate::domain::{BatchJob, BusinessApplication, ExecutionGroup, JobId, JobParameters};

/// Progress of one job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub application: String,
    pub created_at: DateTime<Utc>,
    pub num_requests: u64,
    pub groups_completed: u64,
    pub groups_outstanding: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub processing: bool,
    pub cancelled: bool,
}

#[derive(Debug)]
struct JobEntry {
    job: Arc<BatchJob>,
    /// Fixed by the first group carved off the job
    group_count: Option<u64>,
    outstanding: BTreeSet<u64>,
    groups_completed: u64,
    completed_requests: u64,
    failed_requests: u64,
    cancelled: bool,
}

impl JobEntry {
    fn progress(&self) -> JobProgress {
        JobProgress {
            job_id: self.job.id(),
            application: self.job.application_name().to_string(),
            created_at: self.job.created_at(),
            num_requests: self.job.num_requests(),
            groups_completed: self.groups_completed,
            groups_outstanding: u64::try_from(self.outstanding.len()).unwrap_or(u64::MAX),
            completed_requests: self.completed_requests,
            failed_requests: self.failed_requests,
            processing: self.job.is_processing(),
            cancelled: self.cancelled,
        }
    }

    fn all_groups_claimed(&self) -> bool {
        self.group_count
            .is_some_and(|count| self.job.next_sequence() > count)
    }
}

/// Job store holding every job in memory
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    next_id: AtomicU64,
    jobs: Mutex<BTreeMap<JobId, JobEntry>>,
    /// Signalled whenever a job stops processing
    idle: Notify,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<JobId, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a job; jobs without requests are created finished
    pub fn submit(&self, application: &str, parameters: JobParameters, num_requests: u64) -> Arc<BatchJob> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(job_id = id, %application, num_requests, "MemoryJobStore::submit: called");
        let job = Arc::new(BatchJob::new(id, application, parameters, num_requests));
        self.lock().insert(
            id,
            JobEntry {
                job: job.clone(),
                group_count: None,
                outstanding: BTreeSet::new(),
                groups_completed: 0,
                completed_requests: 0,
                failed_requests: 0,
                cancelled: false,
            },
        );
        job
    }

    /// Stop a job; groups already running finish but no new ones are carved
    pub fn cancel_job(&self, id: JobId) -> bool {
        let mut jobs = self.lock();
        let Some(entry) = jobs.get_mut(&id) else {
            return false;
        };
        info!(job_id = id, "Cancelling job");
        entry.cancelled = true;
        entry.job.set_processing(false);
        drop(jobs);
        self.idle.notify_waiters();
        true
    }

    pub fn progress(&self, id: JobId) -> Option<JobProgress> {
        self.lock().get(&id).map(JobEntry::progress)
    }

    pub fn all_progress(&self) -> Vec<JobProgress> {
        self.lock().values().map(JobEntry::progress).collect()
    }

    /// True when no job is processing
    pub fn all_complete(&self) -> bool {
        self.lock().values().all(|entry| !entry.job.is_processing())
    }

    /// Wait until no job is processing
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.all_complete() {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load_pending_job_ids(&self) -> eyre::Result<Vec<JobId>> {
        let ids: Vec<JobId> = self
            .lock()
            .values()
            .filter(|entry| entry.job.is_processing() && !entry.all_groups_claimed())
            .map(|entry| entry.job.id())
            .collect();
        debug!(count = ids.len(), "MemoryJobStore::load_pending_job_ids: loaded");
        Ok(ids)
    }

    async fn get_job(&self, id: JobId) -> eyre::Result<Option<Arc<BatchJob>>> {
        Ok(self.lock().get(&id).map(|entry| entry.job.clone()))
    }

    async fn next_group(
        &self,
        job: &BatchJob,
        application: Arc<BusinessApplication>,
    ) -> eyre::Result<Option<ExecutionGroup>> {
        let mut jobs = self.lock();
        let Some(entry) = jobs.get_mut(&job.id()) else {
            eyre::bail!("Unknown batch job {}", job.id());
        };
        if entry.cancelled || !job.is_processing() {
            return Ok(None);
        }

        let per_group = u64::try_from(application.max_requests_per_group()).unwrap_or(u64::MAX);
        let group_count = *entry
            .group_count
            .get_or_insert_with(|| job.num_requests().div_ceil(per_group));
        let Some(sequence) = job.claim_sequence(group_count) else {
            debug!(job_id = job.id(), "MemoryJobStore::next_group: all groups claimed");
            return Ok(None);
        };

        let first_request = (sequence - 1) * per_group;
        let num_requests = per_group.min(job.num_requests() - first_request);
        entry.outstanding.insert(sequence);
        debug!(job_id = job.id(), sequence, num_requests, "MemoryJobStore::next_group: carved group");
        Ok(Some(ExecutionGroup::new(job, application, sequence, num_requests)))
    }

    async fn complete_group(&self, job: &BatchJob, group: &ExecutionGroup) -> eyre::Result<()> {
        let mut jobs = self.lock();
        let Some(entry) = jobs.get_mut(&job.id()) else {
            eyre::bail!("Unknown batch job {}", job.id());
        };
        if !entry.outstanding.remove(&group.sequence_number()) {
            eyre::bail!("Group {} was not outstanding", group.id());
        }
        entry.groups_completed += 1;
        entry.completed_requests += u64::from(group.completed_count());
        entry.failed_requests += u64::from(group.failed_count());

        let finished = entry.outstanding.is_empty() && (entry.cancelled || entry.all_groups_claimed());
        if finished && job.is_processing() {
            info!(
                job_id = job.id(),
                completed = entry.completed_requests,
                failed = entry.failed_requests,
                "Batch job finished"
            );
            job.set_processing(false);
        }
        drop(jobs);
        if finished {
            self.idle.notify_waiters();
        }
        Ok(())
    }
}
