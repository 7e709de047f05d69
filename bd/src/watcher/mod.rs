//! Configuration file watcher
//!
//! Polls the configuration file and broadcasts property changes so running
//! components can adjust without a restart. Applications removed from the
//! file are withdrawn.

mod config_watcher;
mod withdrawal;

pub use config_watcher::{ConfigEvent, ConfigWatcher, MAX_CONCURRENT_REQUESTS_SUFFIX, spawn_application_limit_listener};
pub use withdrawal::{spawn_application_withdrawal_listener, withdraw_application};
