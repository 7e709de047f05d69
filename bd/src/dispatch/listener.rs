//! Applies pool-size configuration changes to a dispatcher

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::BoundedDispatcher;
use crate::watcher::ConfigEvent;

/// Property names that resize the worker pool
pub const POOL_SIZE_PROPERTIES: [&str; 2] = ["poolSize", "schedulerPoolSize"];

/// Listen for configuration changes and resize the dispatcher
///
/// The task ends when the sender side is dropped.
pub fn spawn_pool_size_listener(dispatcher: BoundedDispatcher, mut rx: broadcast::Receiver<ConfigEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("pool size listener started");
        loop {
            match rx.recv().await {
                Ok(event) => apply(&dispatcher, &event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Pool size listener lagged behind configuration events");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("pool size listener stopped");
    })
}

fn apply(dispatcher: &BoundedDispatcher, event: &ConfigEvent) {
    let ConfigEvent::PropertyChanged { name, value } = event else {
        return;
    };
    if !POOL_SIZE_PROPERTIES.contains(&name.as_str()) {
        return;
    }
    match parse_size(value) {
        Some(size) => {
            info!(%name, size, "Applying pool size change");
            dispatcher.set_capacity(size);
        }
        None => warn!(%name, %value, "Ignoring invalid pool size"),
    }
}

fn parse_size(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn changed(name: &str, value: Value) -> ConfigEvent {
        ConfigEvent::PropertyChanged {
            name: name.to_string(),
            value,
        }
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size(&json!(4)), Some(4));
        assert_eq!(parse_size(&json!(" 12 ")), Some(12));
        assert_eq!(parse_size(&json!(-1)), None);
        assert_eq!(parse_size(&json!("many")), None);
        assert_eq!(parse_size(&json!(null)), None);
    }

    #[tokio::test]
    async fn test_listener_applies_pool_size() {
        let dispatcher = BoundedDispatcher::new(2);
        let (tx, rx) = broadcast::channel(8);
        let handle = spawn_pool_size_listener(dispatcher.clone(), rx);

        tx.send(changed("unrelated", json!(99))).unwrap();
        tx.send(changed("schedulerPoolSize", json!(7))).unwrap();
        tx.send(changed("poolSize", json!("bogus"))).unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert_eq!(dispatcher.capacity(), 7);
    }
}
