//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Worker pool capacity
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Idle time before reloading pending job ids
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Two errors closer than this pause intake
    #[serde(default = "default_error_window_ms")]
    pub error_window_ms: u64,

    /// How long intake stays paused
    #[serde(default = "default_cool_down_ms")]
    pub cool_down_ms: u64,

    /// Grace period for in-flight groups on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Executions of one group before its requests count as failed
    #[serde(default = "default_max_group_attempts")]
    pub max_group_attempts: u32,
}

fn default_pool_size() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    60_000
}

fn default_error_window_ms() -> u64 {
    60_000
}

fn default_cool_down_ms() -> u64 {
    60_000
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_max_group_attempts() -> u32 {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            poll_interval_ms: default_poll_interval_ms(),
            error_window_ms: default_error_window_ms(),
            cool_down_ms: default_cool_down_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            max_group_attempts: default_max_group_attempts(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn error_window(&self) -> Duration {
        Duration::from_millis(self.error_window_ms)
    }

    pub fn cool_down(&self) -> Duration {
        Duration::from_millis(self.cool_down_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
