//! Cloneable handle to a running scheduler

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{Notify, mpsc, watch};
use tracing::debug;

use super::admission::AdmissionRegistry;
use super::messages::{SchedulerCommand, SchedulerState};
use crate::dispatch::BoundedDispatcher;
use crate::domain::{BatchJob, ExecutionGroup};

/// Scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub groups_dispatched: u64,
    pub groups_finished: u64,
    pub group_retries: u64,
    /// Groups whose every attempt failed
    pub groups_exhausted: u64,
    /// Jobs dropped because their application was unavailable
    pub jobs_dropped: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub groups_dispatched: AtomicU64,
    pub groups_finished: AtomicU64,
    pub group_retries: AtomicU64,
    pub groups_exhausted: AtomicU64,
    pub jobs_dropped: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            groups_dispatched: self.groups_dispatched.load(Ordering::Relaxed),
            groups_finished: self.groups_finished.load(Ordering::Relaxed),
            group_retries: self.group_retries.load(Ordering::Relaxed),
            groups_exhausted: self.groups_exhausted.load(Ordering::Relaxed),
            jobs_dropped: self.jobs_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a scheduler's loop
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    pub(crate) arrivals: mpsc::UnboundedSender<Arc<BatchJob>>,
    pub(crate) commands: mpsc::UnboundedSender<SchedulerCommand>,
    pub(crate) wake: Arc<Notify>,
    pub(crate) state: Arc<watch::Sender<SchedulerState>>,
    pub(crate) admission: Arc<AdmissionRegistry>,
    pub(crate) dispatcher: BoundedDispatcher,
    pub(crate) counters: Arc<Counters>,
}

impl SchedulerHandle {
    /// Queue a job for scheduling; false when the job is not processing or the
    /// scheduler has stopped
    pub fn schedule(&self, job: Arc<BatchJob>) -> bool {
        if !job.is_processing() {
            debug!(job_id = job.id(), "SchedulerHandle::schedule: job not processing, ignoring");
            return false;
        }
        self.arrivals.send(job).is_ok()
    }

    /// Report a finished group: frees its admission slot and re-queues its job
    pub fn group_finished(&self, job: Arc<BatchJob>, group: &ExecutionGroup) {
        debug!(group_id = %group.id(), "SchedulerHandle::group_finished: called");
        self.admission.remove(group);
        Counters::bump(&self.counters.groups_finished);
        if !self.schedule(job) {
            self.wake();
        }
    }

    /// Make the loop re-examine its pending jobs
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Drop the pending jobs and registered groups of an application
    pub fn clear_application(&self, application: &str) -> bool {
        self.commands
            .send(SchedulerCommand::ClearApplication {
                application: application.to_string(),
            })
            .is_ok()
    }

    /// Ask the loop to stop; wait for [`Scheduler::run`](super::Scheduler::run) to return
    ///
    /// Closes the worker pool first so a loop blocked on a full pool gets back
    /// to its commands.
    pub fn shutdown(&self) -> bool {
        self.dispatcher.close();
        self.commands.send(SchedulerCommand::Shutdown).is_ok()
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Wait until the loop reaches `state`
    pub async fn wait_for_state(&self, state: SchedulerState) {
        let mut rx = self.subscribe_state();
        let _ = rx.wait_for(|current| *current == state).await;
    }

    pub fn scheduled_count(&self, application: &str) -> usize {
        self.admission.scheduled_count(application)
    }

    pub fn dispatcher(&self) -> &BoundedDispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }
}
