//! Scheduler for batch job execution groups
//!
//! One coordinating loop admits execution groups per business application
//! under each application's concurrency ceiling and hands them to a bounded
//! worker pool.

mod admission;
mod breaker;
mod config;
mod core;
mod handle;
mod messages;
mod runner;

pub use admission::AdmissionRegistry;
pub use breaker::ErrorBreaker;
pub use config::SchedulerConfig;
pub use core::{Scheduler, SchedulerDeps};
pub use handle::{SchedulerHandle, SchedulerStats};
pub use messages::{SchedulerCommand, SchedulerError, SchedulerState};
