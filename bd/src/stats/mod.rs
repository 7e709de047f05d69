//! Runtime statistics
//!
//! Statistic events are added to hour buckets and rolled up into day, month
//! and year buckets. A single actor owns the buckets and periodically collates
//! them with the persisted statistics store.

mod aggregator;
mod bucket;
mod messages;
mod service;

pub use aggregator::{CollationSummary, StatisticsAggregator};
pub use bucket::StatisticsBucket;
pub use messages::{StatsCommand, StatsError, StatsResponse};
pub use service::{StatisticsService, StatisticsServiceConfig};

/// Event names recorded for executed groups
pub mod events {
    pub const APPLICATION_EXECUTED_GROUPS_COUNT: &str = "applicationExecutedGroupsCount";
    pub const APPLICATION_EXECUTED_REQUESTS_COUNT: &str = "applicationExecutedRequestsCount";
    pub const APPLICATION_EXECUTED_FAILED_REQUESTS_COUNT: &str = "applicationExecutedFailedRequestsCount";
    pub const APPLICATION_EXECUTED_TIME: &str = "applicationExecutedTime";
    pub const EXECUTED_TIME: &str = "executedTime";
    pub const EXECUTED_GROUPS_COUNT: &str = "executedGroupsCount";
    pub const EXECUTED_REQUESTS_COUNT: &str = "executedRequestsCount";
}
