//! Scheduler implementation

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Notify, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::admission::AdmissionRegistry;
use super::breaker::ErrorBreaker;
use super::config::SchedulerConfig;
use super::handle::{Counters, SchedulerHandle};
use super::messages::{SchedulerCommand, SchedulerError, SchedulerState};
use super::runner::GroupRunner;
use crate::dispatch::BoundedDispatcher;
use crate::domain::{ApplicationRegistry, BatchJob, ExecutionGroup, JobId};
use crate::executor::WorkerExecutor;
use crate::jobs::JobStore;
use crate::stats::StatisticsService;

/// Collaborators the scheduler drives
#[derive(Clone)]
pub struct SchedulerDeps {
    pub job_store: Arc<dyn JobStore>,
    pub applications: Arc<dyn ApplicationRegistry>,
    pub executor: Arc<dyn WorkerExecutor>,
    pub statistics: Option<StatisticsService>,
}

/// The coordinating loop: admits execution groups and dispatches them
pub struct Scheduler {
    config: SchedulerConfig,
    deps: SchedulerDeps,
    admission: Arc<AdmissionRegistry>,
    dispatcher: BoundedDispatcher,
    breaker: Arc<ErrorBreaker>,
    /// Jobs waiting for their next group, keyed by id
    pending: BTreeMap<JobId, Arc<BatchJob>>,
    arrivals: mpsc::UnboundedReceiver<Arc<BatchJob>>,
    commands: mpsc::UnboundedReceiver<SchedulerCommand>,
    wake: Arc<Notify>,
    state: Arc<watch::Sender<SchedulerState>>,
    handle: SchedulerHandle,
    loader_running: Arc<AtomicBool>,
}

impl Scheduler {
    /// Create a scheduler and the handle used to feed it
    pub fn new(config: SchedulerConfig, deps: SchedulerDeps) -> (Self, SchedulerHandle) {
        debug!(?config, "Scheduler::new: called");
        let (arrivals_tx, arrivals) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SchedulerState::Idle);
        let state = Arc::new(state);
        let wake = Arc::new(Notify::new());
        let admission = Arc::new(AdmissionRegistry::new());
        let dispatcher = BoundedDispatcher::new(config.pool_size);
        let breaker = Arc::new(ErrorBreaker::new(config.error_window()));

        let handle = SchedulerHandle {
            arrivals: arrivals_tx,
            commands: commands_tx,
            wake: wake.clone(),
            state: state.clone(),
            admission: admission.clone(),
            dispatcher: dispatcher.clone(),
            counters: Arc::new(Counters::default()),
        };

        let scheduler = Self {
            config,
            deps,
            admission,
            dispatcher,
            breaker,
            pending: BTreeMap::new(),
            arrivals,
            commands,
            wake,
            state,
            handle: handle.clone(),
            loader_running: Arc::new(AtomicBool::new(false)),
        };
        (scheduler, handle)
    }

    /// Run until shut down
    ///
    /// Returns an error only for fatal conditions: no async runtime to dispatch
    /// on, or the arrival channel closing underneath the loop.
    pub async fn run(mut self) -> Result<(), SchedulerError> {
        debug!("run: called");
        info!(pool_size = self.config.pool_size, "Scheduler starting");
        BoundedDispatcher::runtime()?;

        self.start_loader();

        loop {
            if self.breaker.is_tripped() && self.cool_down().await {
                break;
            }

            self.set_state(SchedulerState::Idle);
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(SchedulerCommand::Shutdown) | None => {
                            info!("Shutdown requested");
                            break;
                        }
                        Some(SchedulerCommand::ClearApplication { application }) => {
                            self.clear_application(&application);
                        }
                    }
                }

                _ = self.wake.notified() => {
                    debug!("run: woken");
                }

                job = self.arrivals.recv() => {
                    match job {
                        Some(job) => self.enqueue(job),
                        None => {
                            error!("Arrival channel closed");
                            return Err(SchedulerError::ChannelClosed);
                        }
                    }
                }

                _ = tokio::time::sleep(self.config.poll_interval()) => {
                    debug!("run: poll timeout");
                    self.start_loader();
                }
            }

            self.set_state(SchedulerState::Draining);
            while let Ok(job) = self.arrivals.try_recv() {
                self.enqueue(job);
            }
            self.schedule_queued_jobs().await?;
        }

        self.stop().await;
        Ok(())
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = %current, to = %state, "Scheduler state change");
            *current = state;
            true
        });
    }

    fn enqueue(&mut self, job: Arc<BatchJob>) {
        debug!(job_id = job.id(), "enqueue: called");
        self.pending.entry(job.id()).or_insert(job);
    }

    /// Visit every pending job once, admitting one group per job where the
    /// application's ceiling allows
    async fn schedule_queued_jobs(&mut self) -> Result<(), SchedulerError> {
        let ids: Vec<JobId> = self.pending.keys().copied().collect();
        debug!(count = ids.len(), "schedule_queued_jobs: called");

        for id in ids {
            if self.breaker.is_tripped() {
                debug!("schedule_queued_jobs: intake paused");
                break;
            }
            if self.dispatcher.is_shutdown() {
                debug!("schedule_queued_jobs: dispatcher closed");
                break;
            }
            let Some(job) = self.pending.get(&id).cloned() else {
                continue;
            };
            if !job.is_processing() {
                self.pending.remove(&id);
                continue;
            }

            let application = match self.deps.applications.lookup(job.application_name()) {
                Some(application) if application.module().is_started() => application,
                _ => {
                    debug!(job_id = id, application = %job.application_name(), "Application unavailable, dropping job");
                    Counters::bump(&self.handle.counters.jobs_dropped);
                    self.pending.remove(&id);
                    continue;
                }
            };

            if self.admission.scheduled_count(application.name()) >= application.max_concurrent_requests() {
                continue;
            }

            self.pending.remove(&id);
            match self.deps.job_store.next_group(&job, application).await {
                Ok(Some(group)) => {
                    let group = Arc::new(group);
                    if self.admission.add(group.clone()) && !self.dispatch(job.clone(), group).await? {
                        break;
                    }
                    self.handle.schedule(job);
                }
                Ok(None) => {
                    debug!(job_id = id, "schedule_queued_jobs: no more groups");
                }
                Err(e) => {
                    error!(job_id = id, error = %e, "Failed to create execution group");
                    self.breaker.record();
                }
            }
        }
        Ok(())
    }

    /// Hand a group to the worker pool; false once the pool is closed
    async fn dispatch(&self, job: Arc<BatchJob>, group: Arc<ExecutionGroup>) -> Result<bool, SchedulerError> {
        debug!(group_id = %group.id(), "dispatch: called");
        let runner = GroupRunner {
            handle: self.handle.clone(),
            job_store: self.deps.job_store.clone(),
            executor: self.deps.executor.clone(),
            statistics: self.deps.statistics.clone(),
            breaker: self.breaker.clone(),
            max_attempts: self.config.max_group_attempts.max(1),
        };
        if self.dispatcher.submit(runner.run(job, group.clone())).await? {
            Counters::bump(&self.handle.counters.groups_dispatched);
            return Ok(true);
        }
        warn!(group_id = %group.id(), "Dispatcher shut down, group not run");
        self.admission.remove(&group);
        Ok(false)
    }

    /// Pause intake for the cool-down period; returns true if shutdown was
    /// requested meanwhile
    async fn cool_down(&mut self) -> bool {
        let cool_down = self.config.cool_down();
        warn!(?cool_down, "Pausing job intake after repeated errors");
        self.set_state(SchedulerState::CoolingDown);

        let deadline = Instant::now() + cool_down;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(SchedulerCommand::Shutdown) | None => return true,
                        Some(SchedulerCommand::ClearApplication { application }) => {
                            self.clear_application(&application);
                        }
                    }
                }
            }
        }

        self.breaker.reset();
        info!("Resuming job intake");
        false
    }

    fn clear_application(&mut self, application: &str) {
        info!(%application, "Clearing application");
        self.pending.retain(|_, job| job.application_name() != application);
        for group in self.admission.clear(application) {
            group.cancel();
        }
    }

    /// Load pending job ids in the background unless a load is already running
    fn start_loader(&self) {
        if self.loader_running.swap(true, Ordering::SeqCst) {
            debug!("start_loader: already running");
            return;
        }
        let job_store = self.deps.job_store.clone();
        let handle = self.handle.clone();
        let breaker = self.breaker.clone();
        let running = self.loader_running.clone();
        tokio::spawn(async move {
            match load_pending_jobs(job_store.as_ref(), &handle).await {
                Ok(count) => debug!(count, "Loaded pending jobs"),
                Err(e) => {
                    error!(error = %e, "Failed to load pending jobs");
                    breaker.record();
                    handle.wake();
                }
            }
            running.store(false, Ordering::SeqCst);
        });
    }

    async fn stop(&mut self) {
        self.set_state(SchedulerState::Stopped);
        self.arrivals.close();
        while self.arrivals.try_recv().is_ok() {}
        self.pending.clear();

        let grace = self.config.shutdown_timeout();
        if self.dispatcher.shutdown(grace).await {
            info!("Scheduler stopped");
        } else {
            warn!(
                ?grace,
                in_flight = self.dispatcher.in_flight(),
                registered = self.admission.total(),
                "Scheduler stopped with groups still running"
            );
        }
    }
}

async fn load_pending_jobs(job_store: &dyn JobStore, handle: &SchedulerHandle) -> eyre::Result<usize> {
    let ids = job_store.load_pending_job_ids().await?;
    let mut count = 0;
    for id in ids {
        if let Some(job) = job_store.get_job(id).await?
            && handle.schedule(job)
        {
            count += 1;
        }
    }
    Ok(count)
}
