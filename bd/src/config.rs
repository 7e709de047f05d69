//! batchd configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scheduler::SchedulerConfig;
use crate::stats::StatisticsServiceConfig;

/// Main batchd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Scheduling loop and worker pool
    pub scheduler: SchedulerConfig,

    /// Statistics aggregation and storage
    pub statistics: StatisticsConfig,

    /// Business applications available to jobs
    pub applications: Vec<ApplicationConfig>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .batchd.yml
        let local_config = PathBuf::from(".batchd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/batchd/batchd.yml
        if let Some(user_config) = Self::user_config_path()
            && user_config.exists()
        {
            match Self::load_from_file(&user_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Path of the file [`load`](Self::load) would read, if any
    pub fn resolve_path(config_path: Option<&PathBuf>) -> Option<PathBuf> {
        if let Some(path) = config_path {
            return Some(path.clone());
        }
        let local_config = PathBuf::from(".batchd.yml");
        if local_config.exists() {
            return Some(local_config);
        }
        Self::user_config_path().filter(|path| path.exists())
    }

    /// Read only the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = Self::resolve_path(config_path)?;
        let content = fs::read_to_string(path).ok()?;
        serde_yaml::from_str::<Self>(&content).ok()?.log_level
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("batchd").join("batchd.yml"))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Statistics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// SQLite database path
    pub database: Option<PathBuf>,

    /// Seconds between background collations
    #[serde(rename = "collate-interval-secs")]
    pub collate_interval_secs: u64,

    /// Capacity of the statistics command channel
    #[serde(rename = "channel-buffer")]
    pub channel_buffer: usize,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            database: None,
            collate_interval_secs: 300,
            channel_buffer: 10_000,
        }
    }
}

impl StatisticsConfig {
    /// Configured database path, or the default under the local data directory
    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("batchd")
                .join("statistics.db")
        })
    }

    pub fn service_config(&self) -> StatisticsServiceConfig {
        StatisticsServiceConfig {
            collate_interval: Duration::from_secs(self.collate_interval_secs),
            channel_buffer: self.channel_buffer,
        }
    }
}

/// One business application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,

    /// Module hosting the application; defaults to the application name
    #[serde(default)]
    pub module: Option<String>,

    /// Outstanding execution groups allowed at once
    #[serde(rename = "max-concurrent-requests", default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Requests per execution group
    #[serde(rename = "max-requests-per-group", default = "default_max_requests_per_group")]
    pub max_requests_per_group: usize,
}

fn default_max_concurrent_requests() -> usize {
    10
}

fn default_max_requests_per_group() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.log_level.is_none());
        assert_eq!(config.scheduler.pool_size, 10);
        assert_eq!(config.statistics.collate_interval_secs, 300);
        assert!(config.applications.is_empty());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: debug

scheduler:
  pool-size: 4
  poll-interval-ms: 5000
  shutdown-timeout-secs: 10

statistics:
  database: /tmp/stats.db
  collate-interval-secs: 60

applications:
  - name: geocoder
    module: geo
    max-concurrent-requests: 3
    max-requests-per-group: 50
  - name: router
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.scheduler.pool_size, 4);
        assert_eq!(config.scheduler.poll_interval_ms, 5000);
        assert_eq!(config.scheduler.cool_down_ms, 60_000);
        assert_eq!(config.statistics.database_path(), PathBuf::from("/tmp/stats.db"));
        assert_eq!(config.statistics.service_config().collate_interval, Duration::from_secs(60));
        assert_eq!(config.applications.len(), 2);
        assert_eq!(config.applications[0].module.as_deref(), Some("geo"));
        assert_eq!(config.applications[1].max_concurrent_requests, 10);
        assert_eq!(config.applications[1].max_requests_per_group, 100);
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("batchd.yml");
        fs::write(&path, "scheduler:\n  pool-size: 2\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.scheduler.pool_size, 2);
        assert_eq!(Config::resolve_path(Some(&path)), Some(path));
    }

    #[test]
    fn test_load_log_level() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("batchd.yml");
        fs::write(&path, "log-level: warn\n").unwrap();
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));

        fs::write(&path, "scheduler: [not, a, map]\n").unwrap();
        assert!(Config::load_log_level(Some(&path)).is_none());
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/batchd.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
