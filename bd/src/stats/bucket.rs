//! In-memory statistics bucket

use chrono::{DateTime, Utc};
use statstore::{DurationType, StatisticValues, StatisticsRecord};

/// One application's statistic values for one period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticsBucket {
    application: String,
    duration_type: DurationType,
    start_time: DateTime<Utc>,
    database_id: Option<i64>,
    values: StatisticValues,
    modified: bool,
}

impl StatisticsBucket {
    /// Empty, unsaved bucket for the period containing `time`
    pub fn new(application: impl Into<String>, duration_type: DurationType, time: DateTime<Utc>) -> Self {
        Self {
            application: application.into(),
            duration_type,
            start_time: duration_type.period_start(time),
            database_id: None,
            values: StatisticValues::new(),
            modified: false,
        }
    }

    pub fn from_record(record: StatisticsRecord) -> Self {
        Self {
            application: record.application,
            duration_type: record.duration_type,
            start_time: record.start_time,
            database_id: record.id,
            values: record.values,
            modified: false,
        }
    }

    pub fn to_record(&self) -> StatisticsRecord {
        StatisticsRecord {
            id: self.database_id,
            application: self.application.clone(),
            duration_type: self.duration_type,
            start_time: self.start_time,
            values: self.values.clone(),
        }
    }

    pub fn id(&self) -> String {
        self.duration_type.bucket_id(self.start_time)
    }

    /// Id of the next coarser bucket covering the same instant
    pub fn parent_id(&self) -> Option<String> {
        self.duration_type
            .parent()
            .map(|parent| parent.bucket_id(self.start_time))
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn duration_type(&self) -> DurationType {
        self.duration_type
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn database_id(&self) -> Option<i64> {
        self.database_id
    }

    pub fn values(&self) -> &StatisticValues {
        &self.values
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Needs writing: never saved or changed since the last save
    pub fn is_unsaved(&self) -> bool {
        self.database_id.is_none() || self.modified
    }

    /// Add each value to the bucket's running totals
    pub fn add_values(&mut self, values: &StatisticValues) {
        for (name, delta) in values {
            *self.values.entry(name.clone()).or_insert(0) += delta;
        }
        if !values.is_empty() {
            self.modified = true;
        }
    }

    /// Take over a persisted row's identity and add its values
    pub(crate) fn adopt(&mut self, id: Option<i64>, values: &StatisticValues) {
        self.database_id = id;
        self.add_values(values);
        self.modified = true;
    }

    pub(crate) fn mark_saved(&mut self, id: i64) {
        self.database_id = Some(id);
        self.modified = false;
    }

    /// Whether the bucket's period has been superseded at `now`
    ///
    /// Hour and day buckets go once their parent period is older than the
    /// current one. Month and year buckets are never deleted.
    pub fn can_delete(&self, now: DateTime<Utc>) -> bool {
        if self.duration_type.is_retained() {
            return false;
        }
        match self.duration_type.parent() {
            Some(parent) => parent.bucket_id(self.start_time) < parent.bucket_id(now),
            None => false,
        }
    }
}
