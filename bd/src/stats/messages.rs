//! Statistics actor messages

use chrono::{DateTime, Utc};
use statstore::{DurationType, StatisticValues, StatisticsRecord, StoreError};
use thiserror::Error;
use tokio::sync::oneshot;

use super::CollationSummary;

/// Errors from statistics operations
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error")]
    ChannelError,
}

/// Response from statistics operations
pub type StatsResponse<T> = Result<T, StatsError>;

/// Commands sent to the statistics actor
#[derive(Debug)]
pub enum StatsCommand {
    AddStatistics {
        application: String,
        time: DateTime<Utc>,
        values: StatisticValues,
    },
    Collate {
        reply: oneshot::Sender<StatsResponse<CollationSummary>>,
    },
    Save {
        applications: Option<Vec<String>>,
        reply: oneshot::Sender<StatsResponse<usize>>,
    },
    GetStatistics {
        application: String,
        duration_type: DurationType,
        time: DateTime<Utc>,
        reply: oneshot::Sender<Option<StatisticValues>>,
    },
    ListStatistics {
        application: Option<String>,
        reply: oneshot::Sender<Vec<StatisticsRecord>>,
    },
    /// Save everything and stop
    Shutdown {
        reply: oneshot::Sender<StatsResponse<usize>>,
    },
}
