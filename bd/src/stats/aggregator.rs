//! Statistics aggregation and collation

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use statstore::{DurationType, StatisticValues, StatisticsRecord, StatisticsStore, with_transaction};
use tracing::{debug, info};

use super::StatisticsBucket;
use super::messages::StatsError;

type Buckets = HashMap<String, HashMap<String, StatisticsBucket>>;

/// Counts from one collation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollationSummary {
    /// Persisted records loaded into memory
    pub loaded: usize,
    /// Persisted records merged into a bucket already in memory
    pub merged: usize,
    /// Rows deleted from storage
    pub deleted: usize,
    /// Buckets inserted or updated
    pub saved: usize,
    /// Records of unknown applications left alone
    pub skipped: usize,
}

/// Two-level map of application name to bucket id to bucket
#[derive(Debug, Default)]
pub struct StatisticsAggregator {
    buckets: Buckets,
}

impl StatisticsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add values to the hour bucket of `time` and every bucket above it
    pub fn add_statistics(&mut self, application: &str, time: DateTime<Utc>, values: &StatisticValues) {
        debug!(%application, %time, count = values.len(), "StatisticsAggregator::add_statistics: called");
        if values.is_empty() {
            return;
        }
        let app_buckets = self.buckets.entry(application.to_string()).or_default();
        let mut duration_type = Some(DurationType::Hour);
        while let Some(current) = duration_type {
            app_buckets
                .entry(current.bucket_id(time))
                .or_insert_with(|| StatisticsBucket::new(application, current, time))
                .add_values(values);
            duration_type = current.parent();
        }
    }

    pub fn get(&self, application: &str, bucket_id: &str) -> Option<&StatisticsBucket> {
        self.buckets.get(application)?.get(bucket_id)
    }

    /// Values of the bucket of `duration_type` covering `time`
    pub fn values(&self, application: &str, duration_type: DurationType, time: DateTime<Utc>) -> Option<StatisticValues> {
        self.get(application, &duration_type.bucket_id(time))
            .map(|bucket| bucket.values().clone())
    }

    /// Buckets in memory as records, ordered by application then start time
    pub fn list(&self, application: Option<&str>) -> Vec<StatisticsRecord> {
        let mut records: Vec<StatisticsRecord> = self
            .buckets
            .iter()
            .filter(|(name, _)| application.is_none_or(|app| app == name.as_str()))
            .flat_map(|(_, buckets)| buckets.values().map(StatisticsBucket::to_record))
            .collect();
        records.sort_by(|a, b| {
            (&a.application, a.start_time, a.duration_type).cmp(&(&b.application, b.start_time, b.duration_type))
        });
        records
    }

    pub fn applications(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buckets.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.values().map(HashMap::len).sum()
    }

    /// Merge the in-memory buckets with the persisted records
    ///
    /// Runs in one store transaction. On failure the transaction is rolled back
    /// and the in-memory buckets are left as they were.
    pub fn collate<S, F>(&mut self, store: &mut S, is_known: F, now: DateTime<Utc>) -> Result<CollationSummary, StatsError>
    where
        S: StatisticsStore + ?Sized,
        F: Fn(&str) -> bool,
    {
        debug!(%now, "StatisticsAggregator::collate: called");

        // Unknown applications are carried over untouched
        let mut carried: Buckets = HashMap::new();
        let mut staged: Buckets = HashMap::new();
        for (application, buckets) in &self.buckets {
            if !is_known(application) {
                carried.insert(application.clone(), buckets.clone());
                continue;
            }
            let unsaved: HashMap<String, StatisticsBucket> = buckets
                .iter()
                .filter(|(_, bucket)| bucket.is_unsaved())
                .map(|(id, bucket)| (id.clone(), bucket.clone()))
                .collect();
            if !unsaved.is_empty() {
                staged.insert(application.clone(), unsaved);
            }
        }

        let summary = with_transaction(store, |store| -> Result<CollationSummary, StatsError> {
            let mut summary = CollationSummary::default();
            for record in store.records()? {
                merge_record(&mut staged, record, &is_known, store, &mut summary)?;
            }
            for app_buckets in staged.values_mut() {
                persist_application(app_buckets, store, now, &mut summary)?;
            }
            Ok(summary)
        })?;

        staged.retain(|_, buckets| !buckets.is_empty());
        staged.extend(carried);
        self.buckets = staged;
        info!(
            loaded = summary.loaded,
            merged = summary.merged,
            deleted = summary.deleted,
            saved = summary.saved,
            skipped = summary.skipped,
            "Statistics collated"
        );
        Ok(summary)
    }

    /// Persist and evict the buckets of the named applications, or of all of them
    ///
    /// On failure the evicted buckets are put back.
    pub fn save<S>(&mut self, store: &mut S, applications: Option<&[String]>) -> Result<usize, StatsError>
    where
        S: StatisticsStore + ?Sized,
    {
        debug!(?applications, "StatisticsAggregator::save: called");
        let names: Vec<String> = match applications {
            Some(names) => names.to_vec(),
            None => self.buckets.keys().cloned().collect(),
        };
        let evicted: Buckets = names
            .iter()
            .filter_map(|name| self.buckets.remove_entry(name))
            .collect();

        let result = with_transaction(store, |store| -> Result<usize, StatsError> {
            let mut saved = 0;
            for bucket in evicted.values().flat_map(HashMap::values) {
                if bucket.is_unsaved() {
                    store.upsert(&bucket.to_record())?;
                    saved += 1;
                }
            }
            Ok(saved)
        });

        match result {
            Ok(saved) => {
                info!(applications = evicted.len(), saved, "Statistics saved");
                Ok(saved)
            }
            Err(e) => {
                self.buckets.extend(evicted);
                Err(e)
            }
        }
    }
}

/// Fold one persisted record into the staged buckets
fn merge_record<S, F>(
    staged: &mut Buckets,
    record: StatisticsRecord,
    is_known: &F,
    store: &mut S,
    summary: &mut CollationSummary,
) -> Result<(), StatsError>
where
    S: StatisticsStore + ?Sized,
    F: Fn(&str) -> bool,
{
    if !is_known(&record.application) {
        summary.skipped += 1;
        return Ok(());
    }
    if record.values.is_empty() && !record.duration_type.is_retained() {
        if let Some(id) = record.id {
            debug!(id, "merge_record: deleting empty record");
            store.delete(id)?;
            summary.deleted += 1;
        }
        return Ok(());
    }

    let bucket_id = record.bucket_id();
    let app_buckets = staged.entry(record.application.clone()).or_default();
    match app_buckets.get_mut(&bucket_id) {
        None => {
            app_buckets.insert(bucket_id, StatisticsBucket::from_record(record));
            summary.loaded += 1;
        }
        Some(bucket) => match bucket.database_id() {
            None => {
                bucket.adopt(record.id, &record.values);
                summary.merged += 1;
            }
            Some(id) if record.id == Some(id) => {}
            Some(_) => {
                // Row written by a concurrent writer for the same bucket
                bucket.add_values(&record.values);
                if let Some(duplicate) = record.id {
                    store.delete(duplicate)?;
                    summary.deleted += 1;
                }
                summary.merged += 1;
            }
        },
    }
    Ok(())
}

/// Drop superseded buckets and write the rest
fn persist_application<S>(
    app_buckets: &mut HashMap<String, StatisticsBucket>,
    store: &mut S,
    now: DateTime<Utc>,
    summary: &mut CollationSummary,
) -> Result<(), StatsError>
where
    S: StatisticsStore + ?Sized,
{
    let expired: Vec<String> = app_buckets
        .iter()
        .filter(|(_, bucket)| bucket.can_delete(now))
        .map(|(id, _)| id.clone())
        .collect();
    for bucket_id in expired {
        if let Some(bucket) = app_buckets.remove(&bucket_id)
            && let Some(id) = bucket.database_id()
        {
            store.delete(id)?;
            summary.deleted += 1;
        }
    }

    for bucket in app_buckets.values_mut() {
        if bucket.is_unsaved() {
            let id = store.upsert(&bucket.to_record())?;
            bucket.mark_saved(id);
            summary.saved += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use statstore::{SqliteStatisticsStore, StoreError};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 13, 20, 0).unwrap()
    }

    fn values(pairs: &[(&str, i64)]) -> StatisticValues {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn known(_: &str) -> bool {
        true
    }

    fn stored(store: &SqliteStatisticsStore, duration_type: DurationType) -> Vec<StatisticsRecord> {
        store
            .records()
            .unwrap()
            .into_iter()
            .filter(|r| r.duration_type == duration_type)
            .collect()
    }

    /// Store wrapper that fails the nth upsert
    struct FailingStore {
        inner: SqliteStatisticsStore,
        fail_on: usize,
        upserts: Cell<usize>,
    }

    impl StatisticsStore for FailingStore {
        fn records(&self) -> Result<Vec<StatisticsRecord>, StoreError> {
            self.inner.records()
        }

        fn upsert(&self, record: &StatisticsRecord) -> Result<i64, StoreError> {
            let n = self.upserts.get() + 1;
            self.upserts.set(n);
            if n == self.fail_on {
                return Err(StoreError::Transaction("injected failure".to_string()));
            }
            self.inner.upsert(record)
        }

        fn delete(&self, id: i64) -> Result<(), StoreError> {
            self.inner.delete(id)
        }

        fn begin(&mut self) -> Result<(), StoreError> {
            self.inner.begin()
        }

        fn commit(&mut self) -> Result<(), StoreError> {
            self.inner.commit()
        }

        fn rollback(&mut self) -> Result<(), StoreError> {
            self.inner.rollback()
        }
    }

    #[test]
    fn test_rollup_reaches_every_level() {
        let mut aggregator = StatisticsAggregator::new();
        aggregator.add_statistics("geo", now(), &values(&[("applicationExecutedRequestsCount", 5)]));

        for duration_type in DurationType::ALL {
            let got = aggregator.values("geo", duration_type, now()).unwrap();
            assert_eq!(got["applicationExecutedRequestsCount"], 5, "{duration_type}");
        }
        assert_eq!(aggregator.bucket_count(), 4);
    }

    #[test]
    fn test_collate_persists_every_level() {
        let mut store = SqliteStatisticsStore::open_in_memory().unwrap();
        let mut aggregator = StatisticsAggregator::new();
        aggregator.add_statistics("geo", now(), &values(&[("applicationExecutedRequestsCount", 5)]));

        let summary = aggregator.collate(&mut store, known, now()).unwrap();
        assert_eq!(summary.saved, 4);

        for duration_type in DurationType::ALL {
            let records = stored(&store, duration_type);
            assert_eq!(records.len(), 1, "{duration_type}");
            assert_eq!(records[0].values["applicationExecutedRequestsCount"], 5);
        }
    }

    #[test]
    fn test_collate_is_idempotent() {
        let mut store = SqliteStatisticsStore::open_in_memory().unwrap();
        let mut aggregator = StatisticsAggregator::new();
        aggregator.add_statistics("geo", now(), &values(&[("x", 3)]));

        aggregator.collate(&mut store, known, now()).unwrap();
        let first = store.records().unwrap();
        let memory = aggregator.list(None);

        let summary = aggregator.collate(&mut store, known, now()).unwrap();
        assert_eq!(summary.saved, 0);
        assert_eq!(summary.deleted, 0);
        assert_eq!(store.records().unwrap(), first);
        assert_eq!(aggregator.list(None), memory);
    }

    #[test]
    fn test_collate_adds_to_persisted_totals() {
        let mut store = SqliteStatisticsStore::open_in_memory().unwrap();
        let mut aggregator = StatisticsAggregator::new();
        aggregator.add_statistics("geo", now(), &values(&[("x", 3)]));
        aggregator.collate(&mut store, known, now()).unwrap();

        aggregator.add_statistics("geo", now(), &values(&[("x", 4)]));
        aggregator.collate(&mut store, known, now()).unwrap();

        let year = stored(&store, DurationType::Year);
        assert_eq!(year.len(), 1);
        assert_eq!(year[0].values["x"], 7);
    }

    #[test]
    fn test_fresh_aggregator_merges_with_persisted_rows() {
        let mut store = SqliteStatisticsStore::open_in_memory().unwrap();
        let mut first = StatisticsAggregator::new();
        first.add_statistics("geo", now(), &values(&[("x", 2)]));
        first.collate(&mut store, known, now()).unwrap();

        let mut second = StatisticsAggregator::new();
        second.add_statistics("geo", now(), &values(&[("x", 5)]));
        let summary = second.collate(&mut store, known, now()).unwrap();
        assert_eq!(summary.merged, 4);

        for duration_type in DurationType::ALL {
            let records = stored(&store, duration_type);
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].values["x"], 7);
        }
    }

    #[test]
    fn test_concurrent_rows_merged_and_deleted() {
        let mut store = SqliteStatisticsStore::open_in_memory().unwrap();
        let day = StatisticsRecord::new("geo", DurationType::Day, now());
        let a = store.upsert(&day.clone().with_values(values(&[("x", 1)]))).unwrap();
        let b = store.upsert(&day.with_values(values(&[("x", 2)]))).unwrap();
        assert_ne!(a, b);

        let mut aggregator = StatisticsAggregator::new();
        aggregator.collate(&mut store, known, now()).unwrap();

        let days = stored(&store, DurationType::Day);
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].values["x"], 3);
        assert_eq!(aggregator.values("geo", DurationType::Day, now()).unwrap()["x"], 3);
    }

    #[test]
    fn test_superseded_hour_deleted_year_kept() {
        let mut store = SqliteStatisticsStore::open_in_memory().unwrap();
        let yesterday = now() - Duration::days(1);
        let mut aggregator = StatisticsAggregator::new();
        aggregator.add_statistics("geo", yesterday, &values(&[("x", 1)]));
        aggregator.collate(&mut store, known, yesterday).unwrap();
        assert_eq!(stored(&store, DurationType::Hour).len(), 1);

        let summary = aggregator.collate(&mut store, known, now()).unwrap();
        assert_eq!(summary.deleted, 1);
        assert!(stored(&store, DurationType::Hour).is_empty());
        assert_eq!(stored(&store, DurationType::Day).len(), 1);
        assert!(aggregator.values("geo", DurationType::Hour, yesterday).is_none());

        let next_decade = Utc.with_ymd_and_hms(2036, 1, 1, 0, 0, 0).unwrap();
        aggregator.collate(&mut store, known, next_decade).unwrap();
        assert!(stored(&store, DurationType::Day).is_empty());
        assert_eq!(stored(&store, DurationType::Month).len(), 1);
        assert_eq!(stored(&store, DurationType::Year).len(), 1);
    }

    #[test]
    fn test_empty_payload_deleted_unless_retained() {
        let mut store = SqliteStatisticsStore::open_in_memory().unwrap();
        store.upsert(&StatisticsRecord::new("geo", DurationType::Hour, now())).unwrap();
        store.upsert(&StatisticsRecord::new("geo", DurationType::Year, now())).unwrap();

        let mut aggregator = StatisticsAggregator::new();
        let summary = aggregator.collate(&mut store, known, now()).unwrap();
        assert_eq!(summary.deleted, 1);
        assert!(stored(&store, DurationType::Hour).is_empty());
        assert_eq!(stored(&store, DurationType::Year).len(), 1);
    }

    #[test]
    fn test_unknown_application_skipped() {
        let mut store = SqliteStatisticsStore::open_in_memory().unwrap();
        let old = now() - Duration::days(3);
        store
            .upsert(&StatisticsRecord::new("retired", DurationType::Hour, old).with_values(values(&[("x", 1)])))
            .unwrap();

        let mut aggregator = StatisticsAggregator::new();
        aggregator.add_statistics("retired", now(), &values(&[("x", 1)]));
        let summary = aggregator.collate(&mut store, |app| app != "retired", now()).unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.saved, 0);
        assert_eq!(store.count().unwrap(), 1);
        assert!(aggregator.values("retired", DurationType::Hour, now()).is_some());
    }

    #[test]
    fn test_failed_collation_rolls_back_and_keeps_memory() {
        let mut store = FailingStore {
            inner: SqliteStatisticsStore::open_in_memory().unwrap(),
            fail_on: 3,
            upserts: Cell::new(0),
        };
        let mut aggregator = StatisticsAggregator::new();
        aggregator.add_statistics("geo", now(), &values(&[("x", 1)]));
        let before = aggregator.list(None);

        assert!(aggregator.collate(&mut store, known, now()).is_err());
        assert_eq!(store.inner.count().unwrap(), 0);
        assert_eq!(aggregator.list(None), before);
        assert!(aggregator.list(None).iter().all(|r| r.id.is_none()));

        store.fail_on = 0;
        aggregator.collate(&mut store, known, now()).unwrap();
        assert_eq!(store.inner.count().unwrap(), 4);
    }

    #[test]
    fn test_save_evicts_named_applications() {
        let mut store = SqliteStatisticsStore::open_in_memory().unwrap();
        let mut aggregator = StatisticsAggregator::new();
        aggregator.add_statistics("geo", now(), &values(&[("x", 1)]));
        aggregator.add_statistics("route", now(), &values(&[("y", 1)]));

        let saved = aggregator.save(&mut store, Some(&["geo".to_string()])).unwrap();
        assert_eq!(saved, 4);
        assert_eq!(aggregator.applications(), vec!["route"]);

        aggregator.save(&mut store, None).unwrap();
        assert!(aggregator.applications().is_empty());
        assert_eq!(store.count().unwrap(), 8);
    }

    #[test]
    fn test_failed_save_restores_buckets() {
        let mut store = FailingStore {
            inner: SqliteStatisticsStore::open_in_memory().unwrap(),
            fail_on: 2,
            upserts: Cell::new(0),
        };
        let mut aggregator = StatisticsAggregator::new();
        aggregator.add_statistics("geo", now(), &values(&[("x", 1)]));
        assert!(aggregator.save(&mut store, None).is_err());
        assert_eq!(aggregator.bucket_count(), 4);
        assert_eq!(store.inner.count().unwrap(), 0);
    }

    proptest! {
        #[test]
        fn prop_rollup_order_independent(
            events in prop::collection::vec((0i64..72, 0usize..3, 1i64..100), 1..40)
        ) {
            let names = ["a", "b", "c"];
            let base = now();
            let mut forward = StatisticsAggregator::new();
            let mut reverse = StatisticsAggregator::new();
            for (hours, name, value) in &events {
                forward.add_statistics("geo", base - Duration::hours(*hours), &values(&[(names[*name], *value)]));
            }
            for (hours, name, value) in events.iter().rev() {
                reverse.add_statistics("geo", base - Duration::hours(*hours), &values(&[(names[*name], *value)]));
            }
            prop_assert_eq!(forward.list(None), reverse.list(None));

            let total: i64 = events.iter().map(|(_, _, v)| v).sum();
            let year_total: i64 = forward
                .list(None)
                .iter()
                .filter(|r| r.duration_type == DurationType::Year)
                .flat_map(|r| r.values.values())
                .sum();
            prop_assert_eq!(year_total, total);
        }
    }
}
