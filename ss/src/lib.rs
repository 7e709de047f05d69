//! StatStore - persisted application statistics
//!
//! Stores the hour/day/month/year statistic buckets produced by the batch
//! dispatcher in a single SQLite table. The dispatcher's statistics actor owns
//! the store and drives collation through the [`StatisticsStore`] trait, so
//! alternate backends only need to provide ordered reads, upserts, deletes and
//! a transaction boundary.
//!
//! # Modules
//!
//! - `duration` - bucket granularities and period arithmetic
//! - `record` - the persisted bucket row
//! - `store` - the store trait and transaction helper
//! - `sqlite` - the rusqlite implementation

mod duration;
mod record;
mod sqlite;
mod store;

pub use duration::DurationType;
pub use record::{StatisticValues, StatisticsRecord};
pub use sqlite::SqliteStatisticsStore;
pub use store::{StatisticsStore, StoreError, with_transaction};
