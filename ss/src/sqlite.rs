//! SQLite statistics store

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::duration::DurationType;
use crate::record::StatisticsRecord;
use crate::store::{StatisticsStore, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS application_statistics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    business_application_name TEXT NOT NULL,
    duration_type TEXT NOT NULL,
    start_time TEXT NOT NULL,
    statistic_values TEXT
);
CREATE INDEX IF NOT EXISTS idx_application_statistics_start
ON application_statistics (start_time);
";

/// Statistics store backed by a single SQLite table
pub struct SqliteStatisticsStore {
    conn: Connection,
    in_transaction: bool,
}

impl SqliteStatisticsStore {
    /// Open (or create) a store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "SqliteStatisticsStore::open: called");
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Transaction(format!("create {}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let store = Self::with_connection(conn)?;
        info!(path = %path.display(), "Opened statistics store");
        Ok(store)
    }

    /// Open a private in-memory store
    pub fn open_in_memory() -> Result<Self, StoreError> {
        debug!("SqliteStatisticsStore::open_in_memory: called");
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            in_transaction: false,
        })
    }

    /// Number of stored rows
    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM application_statistics", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn decode_row(
    id: i64,
    application: String,
    duration_type: String,
    start_time: String,
    payload: Option<String>,
) -> Result<StatisticsRecord, StoreError> {
    let duration_type: DurationType = duration_type
        .parse()
        .map_err(|reason: String| StoreError::Decode { id, reason })?;
    let start_time = DateTime::parse_from_rfc3339(&start_time)
        .map_err(|e| StoreError::Decode {
            id,
            reason: format!("start_time: {}", e),
        })?
        .with_timezone(&Utc);
    let values = StatisticsRecord::parse_values(payload.as_deref()).map_err(|e| StoreError::Decode {
        id,
        reason: e.to_string(),
    })?;
    Ok(StatisticsRecord {
        id: Some(id),
        application,
        duration_type,
        start_time,
        values,
    })
}

impl StatisticsStore for SqliteStatisticsStore {
    fn records(&self) -> Result<Vec<StatisticsRecord>, StoreError> {
        debug!("SqliteStatisticsStore::records: called");
        let mut stmt = self.conn.prepare(
            "SELECT id, business_application_name, duration_type, start_time, statistic_values
             FROM application_statistics ORDER BY start_time, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, application, duration_type, start_time, payload) = row?;
            records.push(decode_row(id, application, duration_type, start_time, payload)?);
        }
        debug!(count = records.len(), "SqliteStatisticsStore::records: loaded");
        Ok(records)
    }

    fn upsert(&self, record: &StatisticsRecord) -> Result<i64, StoreError> {
        debug!(id = ?record.id, application = %record.application, bucket = %record.bucket_id(), "SqliteStatisticsStore::upsert: called");
        let payload = record.values_json()?;
        let start_time = format_time(&record.start_time);

        if let Some(id) = record.id {
            let updated = self.conn.execute(
                "UPDATE application_statistics
                 SET business_application_name = ?1, duration_type = ?2, start_time = ?3, statistic_values = ?4
                 WHERE id = ?5",
                params![record.application, record.duration_type.as_str(), start_time, payload, id],
            )?;
            if updated > 0 {
                return Ok(id);
            }
            debug!(id, "SqliteStatisticsStore::upsert: row vanished, inserting");
        }

        self.conn.execute(
            "INSERT INTO application_statistics
             (business_application_name, duration_type, start_time, statistic_values)
             VALUES (?1, ?2, ?3, ?4)",
            params![record.application, record.duration_type.as_str(), start_time, payload],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn delete(&self, id: i64) -> Result<(), StoreError> {
        debug!(id, "SqliteStatisticsStore::delete: called");
        self.conn
            .execute("DELETE FROM application_statistics WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            return Err(StoreError::Transaction("transaction already open".to_string()));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::Transaction("no open transaction".to_string()));
        }
        self.conn.execute_batch("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::Transaction("no open transaction".to_string()));
        }
        self.in_transaction = false;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}
