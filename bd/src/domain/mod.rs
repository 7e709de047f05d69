//! Domain types for batch dispatch
//!
//! - [`BusinessApplication`] and [`Module`]: the handler types jobs run against
//! - [`BatchJob`]: a caller's unit of work
//! - [`ExecutionGroup`]: one slice of a job dispatched as a scheduling unit

mod application;
mod group;
mod job;

pub use application::{ApplicationRegistry, BusinessApplication, Module, StaticApplicationRegistry};
pub use group::ExecutionGroup;
pub use job::{BatchJob, JobId, JobParameters};
