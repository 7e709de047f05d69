//! ConfigWatcher implementation

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::domain::{ApplicationRegistry, StaticApplicationRegistry};

/// Suffix of the per-application ceiling property, `{application}.maxConcurrentRequests`
pub const MAX_CONCURRENT_REQUESTS_SUFFIX: &str = ".maxConcurrentRequests";

/// Configuration change notification
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigEvent {
    PropertyChanged { name: String, value: Value },
    /// An application was dropped from the configuration
    ApplicationRemoved { name: String },
}

/// Polls a configuration file for changed properties
pub struct ConfigWatcher {
    path: PathBuf,
    poll_interval: Duration,
    tx: broadcast::Sender<ConfigEvent>,
    last: Option<BTreeMap<String, Value>>,
}

impl ConfigWatcher {
    pub fn new(path: PathBuf, poll_interval: Duration, tx: broadcast::Sender<ConfigEvent>) -> Self {
        Self {
            path,
            poll_interval,
            tx,
            last: None,
        }
    }

    /// Watched properties of a configuration
    fn properties(config: &Config) -> BTreeMap<String, Value> {
        let mut properties = BTreeMap::new();
        properties.insert("schedulerPoolSize".to_string(), json!(config.scheduler.pool_size));
        for app in &config.applications {
            properties.insert(
                format!("{}{}", app.name, MAX_CONCURRENT_REQUESTS_SUFFIX),
                json!(app.max_concurrent_requests),
            );
        }
        properties
    }

    /// Read the file once and broadcast every property that changed
    ///
    /// The first read only records a baseline. Returns the number of events sent.
    pub fn check_once(&mut self) -> Result<usize> {
        let config = Config::load_from_file(&self.path)?;
        let current = Self::properties(&config);

        let Some(last) = &self.last else {
            debug!(count = current.len(), "Initial configuration properties");
            self.last = Some(current);
            return Ok(0);
        };

        let mut sent = 0;
        for (name, value) in &current {
            if last.get(name) != Some(value) {
                info!(%name, %value, "Configuration property changed");
                // No receivers is not an error
                let _ = self.tx.send(ConfigEvent::PropertyChanged {
                    name: name.clone(),
                    value: value.clone(),
                });
                sent += 1;
            }
        }
        for name in last.keys().filter(|name| !current.contains_key(*name)) {
            if let Some(application) = name.strip_suffix(MAX_CONCURRENT_REQUESTS_SUFFIX) {
                info!(%application, "Application removed from configuration");
                let _ = self.tx.send(ConfigEvent::ApplicationRemoved {
                    name: application.to_string(),
                });
                sent += 1;
            }
        }
        self.last = Some(current);
        Ok(sent)
    }

    /// Run the watcher loop
    ///
    /// This runs until every receiver is dropped.
    pub async fn run(mut self) {
        info!(path = %self.path.display(), interval = ?self.poll_interval, "ConfigWatcher started");
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            if self.tx.receiver_count() == 0 {
                debug!("ConfigWatcher: no receivers left");
                break;
            }
            if let Err(e) = self.check_once() {
                error!(error = %e, "Error checking configuration file");
            }
        }
        info!("ConfigWatcher stopped");
    }
}

/// Apply per-application ceiling changes to a registry
pub fn spawn_application_limit_listener(
    registry: Arc<StaticApplicationRegistry>,
    mut rx: broadcast::Receiver<ConfigEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ConfigEvent::PropertyChanged { name, value }) => {
                    let Some(application) = name.strip_suffix(MAX_CONCURRENT_REQUESTS_SUFFIX) else {
                        continue;
                    };
                    let max = value.as_u64().and_then(|max| usize::try_from(max).ok());
                    match (registry.lookup(application), max) {
                        (Some(app), Some(max)) => app.set_max_concurrent_requests(max),
                        (None, _) => debug!(%application, "Ceiling change for unknown application"),
                        (_, None) => warn!(%application, %value, "Ignoring invalid ceiling"),
                    }
                }
                Ok(ConfigEvent::ApplicationRemoved { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Application limit listener lagged behind configuration events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
