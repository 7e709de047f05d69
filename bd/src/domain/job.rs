//! Batch jobs

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Batch job identifier
pub type JobId = u64;

/// Job parameters copied into every execution group
pub type JobParameters = BTreeMap<String, String>;

/// A caller's batch of independent requests for one business application
#[derive(Debug)]
pub struct BatchJob {
    id: JobId,
    application_name: String,
    parameters: JobParameters,
    num_requests: u64,
    created_at: DateTime<Utc>,
    processing: AtomicBool,
    /// Sequence number the next execution group will take
    next_sequence: AtomicU64,
}

impl BatchJob {
    pub fn new(id: JobId, application_name: impl Into<String>, parameters: JobParameters, num_requests: u64) -> Self {
        Self {
            id,
            application_name: application_name.into(),
            parameters,
            num_requests,
            created_at: Utc::now(),
            processing: AtomicBool::new(num_requests > 0),
            next_sequence: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn parameters(&self) -> &JobParameters {
        &self.parameters
    }

    pub fn num_requests(&self) -> u64 {
        self.num_requests
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the job still has work to schedule or finish
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn set_processing(&self, processing: bool) {
        self.processing.store(processing, Ordering::SeqCst);
    }

    /// Next sequence number that has not been handed out
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::SeqCst)
    }

    /// Claim the next sequence number, or None once `group_count` are handed out
    pub fn claim_sequence(&self, group_count: u64) -> Option<u64> {
        self.next_sequence
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |seq| (seq <= group_count).then_some(seq + 1))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_processing() {
        let job = BatchJob::new(1, "geocoder", JobParameters::new(), 10);
        assert!(job.is_processing());
        assert_eq!(job.next_sequence(), 1);
    }

    #[test]
    fn test_empty_job_not_processing() {
        let job = BatchJob::new(1, "geocoder", JobParameters::new(), 0);
        assert!(!job.is_processing());
    }

    #[test]
    fn test_claim_sequence_increasing_and_bounded() {
        let job = BatchJob::new(7, "geocoder", JobParameters::new(), 30);
        assert_eq!(job.claim_sequence(3), Some(1));
        assert_eq!(job.claim_sequence(3), Some(2));
        assert_eq!(job.claim_sequence(3), Some(3));
        assert_eq!(job.claim_sequence(3), None);
        assert_eq!(job.next_sequence(), 4);
    }
}
