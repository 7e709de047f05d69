//! BoundedDispatcher implementation

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Errors from the dispatcher
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No async runtime available to run tasks")]
    NoRuntime,
}

/// Snapshot of dispatcher counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub capacity: usize,
    pub in_flight: usize,
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
    pub shutdown: bool,
}

#[derive(Debug)]
struct DispatchState {
    capacity: usize,
    in_flight: usize,
    submitted: u64,
    completed: u64,
    panicked: u64,
    shutdown: bool,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<DispatchState>,
    /// One permit per freed slot
    slot_freed: Notify,
    /// Signalled when in-flight reaches zero
    drained: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Frees a slot when the task finishes, panics included
struct SlotGuard {
    inner: Arc<Inner>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.completed += 1;
        if std::thread::panicking() {
            state.panicked += 1;
        }
        let drained = state.in_flight == 0;
        let has_room = state.in_flight < state.capacity;
        drop(state);

        if has_room {
            self.inner.slot_freed.notify_one();
        }
        if drained {
            self.inner.drained.notify_waiters();
        }
    }
}

/// Worker pool that blocks submitters at capacity
#[derive(Debug, Clone)]
pub struct BoundedDispatcher {
    inner: Arc<Inner>,
}

impl BoundedDispatcher {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "BoundedDispatcher::new: called");
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(DispatchState {
                    capacity,
                    in_flight: 0,
                    submitted: 0,
                    completed: 0,
                    panicked: 0,
                    shutdown: false,
                }),
                slot_freed: Notify::new(),
                drained: Notify::new(),
            }),
        }
    }

    /// Runtime the tasks will be spawned on
    pub fn runtime() -> Result<Handle, DispatchError> {
        Handle::try_current().map_err(|_| DispatchError::NoRuntime)
    }

    /// Wait for a free slot and spawn the task
    ///
    /// Returns `Ok(false)` without running the task once the dispatcher is shut
    /// down, including when shutdown happens while waiting.
    pub async fn submit<F>(&self, task: F) -> Result<bool, DispatchError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runtime = Self::runtime()?;

        loop {
            let notified = self.inner.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.lock();
                if state.shutdown {
                    debug!("BoundedDispatcher::submit: shut down, dropping task");
                    return Ok(false);
                }
                if state.in_flight < state.capacity {
                    state.in_flight += 1;
                    state.submitted += 1;
                    break;
                }
            }

            debug!("BoundedDispatcher::submit: at capacity, waiting for a slot");
            notified.await;
        }

        let guard = SlotGuard {
            inner: self.inner.clone(),
        };
        runtime.spawn(async move {
            let _guard = guard;
            task.await;
        });
        Ok(true)
    }

    /// Change capacity; takes effect for subsequent submissions only
    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.inner.lock();
        let before = state.capacity.saturating_sub(state.in_flight);
        let after = capacity.saturating_sub(state.in_flight);
        info!(from = state.capacity, to = capacity, "Dispatcher capacity changed");
        state.capacity = capacity;
        drop(state);

        for _ in before..after {
            self.inner.slot_freed.notify_one();
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().shutdown
    }

    pub fn stats(&self) -> DispatchStats {
        let state = self.inner.lock();
        DispatchStats {
            capacity: state.capacity,
            in_flight: state.in_flight,
            submitted: state.submitted,
            completed: state.completed,
            panicked: state.panicked,
            shutdown: state.shutdown,
        }
    }

    /// Stop accepting tasks without waiting for in-flight ones
    ///
    /// Submitters blocked on a full pool return `Ok(false)`.
    pub fn close(&self) {
        let mut state = self.inner.lock();
        if state.shutdown {
            return;
        }
        debug!(in_flight = state.in_flight, "BoundedDispatcher::close: called");
        state.shutdown = true;
        drop(state);
        self.inner.slot_freed.notify_waiters();
    }

    /// Stop accepting tasks and wait up to `grace` for in-flight ones
    ///
    /// Returns true when every in-flight task finished within the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        debug!(?grace, "BoundedDispatcher::shutdown: called");
        self.close();

        let deadline = Instant::now() + grace;
        loop {
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            let in_flight = self.inner.lock().in_flight;
            if in_flight == 0 {
                info!("Dispatcher drained");
                return true;
            }
            if tokio::time::timeout_at(deadline, drained).await.is_err() {
                warn!(in_flight, ?grace, "Dispatcher shutdown timed out with tasks in flight");
                return false;
            }
        }
    }
}
