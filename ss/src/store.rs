//! Statistics store trait

use thiserror::Error;
use tracing::{debug, warn};

use crate::record::StatisticsRecord;

/// Errors from statistics persistence
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid statistic values for record {id}: {reason}")]
    Decode { id: i64, reason: String },

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Transaction error: {0}")]
    Transaction(String),
}

/// Persisted statistics store
///
/// Reads return every record ordered by period start. Writes made between
/// [`begin`](StatisticsStore::begin) and [`commit`](StatisticsStore::commit)
/// are applied all-or-nothing.
pub trait StatisticsStore: Send {
    /// All records ordered by start time
    fn records(&self) -> Result<Vec<StatisticsRecord>, StoreError>;

    /// Insert or update a record, returning its database identity
    fn upsert(&self, record: &StatisticsRecord) -> Result<i64, StoreError>;

    /// Delete a record by database identity
    fn delete(&self, id: i64) -> Result<(), StoreError>;

    /// Begin a transaction
    fn begin(&mut self) -> Result<(), StoreError>;

    /// Commit the open transaction
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Roll back the open transaction
    fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Run `f` inside a store transaction
///
/// Commits when `f` succeeds, rolls back and returns the original error when it
/// fails.
pub fn with_transaction<S, T, E, F>(store: &mut S, f: F) -> Result<T, E>
where
    S: StatisticsStore + ?Sized,
    E: From<StoreError>,
    F: FnOnce(&mut S) -> Result<T, E>,
{
    debug!("with_transaction: called");
    store.begin()?;
    match f(store) {
        Ok(value) => {
            store.commit()?;
            debug!("with_transaction: committed");
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = store.rollback() {
                warn!(error = %rollback_err, "with_transaction: rollback failed");
            }
            debug!("with_transaction: rolled back");
            Err(e)
        }
    }
}
