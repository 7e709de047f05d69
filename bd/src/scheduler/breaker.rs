//! Error breaker: pauses job intake after repeated failures

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Default)]
struct BreakerState {
    last_error: Option<Instant>,
    tripped: bool,
}

/// Trips when two errors land within the error window of each other
#[derive(Debug)]
pub struct ErrorBreaker {
    window: Duration,
    state: Mutex<BreakerState>,
}

impl ErrorBreaker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Record an error; returns true when this error trips the breaker
    pub fn record(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let repeated = state
            .last_error
            .is_some_and(|last| now.saturating_duration_since(last) < self.window);
        state.last_error = Some(now);
        if repeated && !state.tripped {
            warn!(window = ?self.window, "Repeated errors, pausing job intake");
            state.tripped = true;
            return true;
        }
        false
    }

    pub fn is_tripped(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).tripped
    }

    /// Clear the trip after a cool-down; the error history starts over
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.tripped = false;
        state.last_error = None;
    }
}
