//! On-disk tests for the SQLite statistics store

use chrono::{TimeZone, Utc};
use statstore::{DurationType, SqliteStatisticsStore, StatisticsRecord, StatisticsStore};
use tempfile::TempDir;

#[test]
fn test_records_survive_reopen() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("stats").join("statistics.db");

    let time = Utc.with_ymd_and_hms(2026, 10, 17, 8, 15, 0).unwrap();
    {
        let store = SqliteStatisticsStore::open(&path).expect("open");
        let mut record = StatisticsRecord::new("geocoder", DurationType::Month, time);
        record.values.insert("applicationExecutedRequestsCount".to_string(), 42);
        store.upsert(&record).expect("upsert");
    }

    let store = SqliteStatisticsStore::open(&path).expect("reopen");
    let records = store.records().expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].bucket_id(), "2026-10");
    assert_eq!(records[0].values.get("applicationExecutedRequestsCount"), Some(&42));
}

#[test]
fn test_duplicate_rows_for_one_bucket_are_allowed() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = SqliteStatisticsStore::open(temp_dir.path().join("s.db")).expect("open");
    let time = Utc.with_ymd_and_hms(2026, 10, 17, 8, 0, 0).unwrap();

    let first = store.upsert(&StatisticsRecord::new("a", DurationType::Hour, time)).unwrap();
    let second = store.upsert(&StatisticsRecord::new("a", DurationType::Hour, time)).unwrap();

    assert_ne!(first, second);
    assert_eq!(store.count().unwrap(), 2);
}
