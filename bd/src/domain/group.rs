//! Execution groups: one dispatched slice of a batch job

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{BatchJob, BusinessApplication, JobId, JobParameters};

/// A bounded slice of a batch job's requests assigned to one business application
///
/// Everything except the counters, timings, attempt and cancellation flag is fixed
/// at creation. The group id is `{batch_job_id}-{sequence_number}-{attempt}`; it
/// changes on every [`reset_id`](Self::reset_id) while the base id stays stable.
#[derive(Debug)]
pub struct ExecutionGroup {
    batch_job_id: JobId,
    sequence_number: u64,
    base_id: String,
    attempt: AtomicU32,
    application: Arc<BusinessApplication>,
    module_name: String,
    parameters: JobParameters,
    num_requests: u64,
    schedule_time: DateTime<Utc>,
    execution_start_ms: AtomicI64,
    module_start_ms: AtomicI64,
    completed_count: AtomicU32,
    failed_count: AtomicU32,
    cancelled: AtomicBool,
}

impl ExecutionGroup {
    pub fn new(job: &BatchJob, application: Arc<BusinessApplication>, sequence_number: u64, num_requests: u64) -> Self {
        let base_id = format!("{}-{}", job.id(), sequence_number);
        let module_start_ms = application
            .module()
            .start_time()
            .map(|t| t.timestamp_millis())
            .unwrap_or_default();
        Self {
            batch_job_id: job.id(),
            sequence_number,
            base_id,
            attempt: AtomicU32::new(1),
            module_name: application.module().name().to_string(),
            application,
            parameters: job.parameters().clone(),
            num_requests,
            schedule_time: Utc::now(),
            execution_start_ms: AtomicI64::new(0),
            module_start_ms: AtomicI64::new(module_start_ms),
            completed_count: AtomicU32::new(0),
            failed_count: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Current id; derived from one atomic load so it never tears
    pub fn id(&self) -> String {
        format!("{}-{}", self.base_id, self.attempt())
    }

    pub fn base_id(&self) -> &str {
        &self.base_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    /// Start a new attempt and return the new id
    pub fn reset_id(&self) -> String {
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}-{}", self.base_id, attempt);
        debug!(group_id = %id, "ExecutionGroup::reset_id: called");
        id
    }

    pub fn batch_job_id(&self) -> JobId {
        self.batch_job_id
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn application(&self) -> &Arc<BusinessApplication> {
        &self.application
    }

    pub fn application_name(&self) -> &str {
        self.application.name()
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn parameters(&self) -> &JobParameters {
        &self.parameters
    }

    pub fn num_requests(&self) -> u64 {
        self.num_requests
    }

    pub fn schedule_time(&self) -> DateTime<Utc> {
        self.schedule_time
    }

    /// Cancel the group; idempotent and permanent
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            debug!(group_id = %self.id(), "ExecutionGroup::cancel: cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn mark_execution_started(&self) {
        self.execution_start_ms.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    pub fn execution_start_time(&self) -> Option<DateTime<Utc>> {
        millis_to_time(self.execution_start_ms.load(Ordering::SeqCst))
    }

    pub fn module_start_time(&self) -> Option<DateTime<Utc>> {
        millis_to_time(self.module_start_ms.load(Ordering::SeqCst))
    }

    pub fn completed_count(&self) -> u32 {
        self.completed_count.load(Ordering::SeqCst)
    }

    pub fn failed_count(&self) -> u32 {
        self.failed_count.load(Ordering::SeqCst)
    }

    pub fn set_counts(&self, completed: u32, failed: u32) {
        self.completed_count.store(completed, Ordering::SeqCst);
        self.failed_count.store(failed, Ordering::SeqCst);
    }
}

fn millis_to_time(ms: i64) -> Option<DateTime<Utc>> {
    if ms == 0 { None } else { DateTime::from_timestamp_millis(ms) }
}
