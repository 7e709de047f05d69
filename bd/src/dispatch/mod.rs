//! Bounded dispatch of execution groups
//!
//! A worker pool that makes submitters wait for a free slot instead of
//! rejecting work, with a capacity that can change while running.

mod dispatcher;
mod listener;

pub use dispatcher::{BoundedDispatcher, DispatchError, DispatchStats};
pub use listener::{POOL_SIZE_PROPERTIES, spawn_pool_size_listener};
