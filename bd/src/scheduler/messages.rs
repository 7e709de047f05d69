//! Scheduler messages
//!
//! Commands, observable states and errors of the scheduling loop.

use std::fmt;

use thiserror::Error;

use crate::dispatch::DispatchError;

/// Errors that stop the scheduling loop
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Channel closed")]
    ChannelClosed,
}

/// Observable state of the scheduling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for arrivals, wake-ups or the poll timeout
    Idle,
    /// Visiting the pending jobs
    Draining,
    /// Intake paused after repeated errors
    CoolingDown,
    /// Shut down; the loop has exited or is draining the pool
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Draining => "draining",
            SchedulerState::CoolingDown => "cooling-down",
            SchedulerState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Control commands sent to the scheduling loop
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Drop pending jobs and registered groups of an application
    ClearApplication { application: String },
    /// Stop intake, drain the pool and exit
    Shutdown,
}
