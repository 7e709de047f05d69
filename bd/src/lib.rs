//! batchd - batch job scheduler with per-application admission control
//!
//! Batch jobs are carved into execution groups and dispatched to business
//! application handlers, never exceeding an application's concurrency
//! ceiling. Group outcomes feed hour, day, month and year statistics that
//! are periodically collated with a SQLite store.
//!
//! # Modules
//!
//! - [`domain`] - Jobs, execution groups and business applications
//! - [`scheduler`] - The coordinating loop and admission registry
//! - [`dispatch`] - Bounded worker pool
//! - [`jobs`] - Job store trait and in-memory implementation
//! - [`executor`] - Worker executor trait and simulated executor
//! - [`stats`] - Statistics aggregation actor
//! - [`watcher`] - Configuration change notifications
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod executor;
pub mod jobs;
pub mod scheduler;
pub mod stats;
pub mod watcher;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::BoundedDispatcher;
pub use domain::{BatchJob, BusinessApplication, ExecutionGroup, Module, StaticApplicationRegistry};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerDeps, SchedulerHandle, SchedulerState};
pub use stats::{StatisticsAggregator, StatisticsService};
