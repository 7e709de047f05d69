//! Persisted statistics bucket

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::duration::DurationType;

/// Named statistic values of one bucket
pub type StatisticValues = BTreeMap<String, i64>;

/// One row of the application statistics table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsRecord {
    /// Database identity, `None` until first saved
    pub id: Option<i64>,

    /// Business application the bucket belongs to
    pub application: String,

    /// Bucket granularity
    pub duration_type: DurationType,

    /// Start of the bucket's period
    pub start_time: DateTime<Utc>,

    /// Accumulated statistic values
    pub values: StatisticValues,
}

impl StatisticsRecord {
    /// Create an unsaved record for the period containing `time`
    pub fn new(application: impl Into<String>, duration_type: DurationType, time: DateTime<Utc>) -> Self {
        Self {
            id: None,
            application: application.into(),
            duration_type,
            start_time: duration_type.period_start(time),
            values: StatisticValues::new(),
        }
    }

    /// Set the values (builder style)
    pub fn with_values(mut self, values: StatisticValues) -> Self {
        self.values = values;
        self
    }

    /// Bucket id derived from the duration type and start time
    pub fn bucket_id(&self) -> String {
        self.duration_type.bucket_id(self.start_time)
    }

    /// Encode the values as the stored JSON payload
    pub fn values_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.values)
    }

    /// Decode a stored JSON payload; an absent or blank payload is empty
    pub fn parse_values(payload: Option<&str>) -> Result<StatisticValues, serde_json::Error> {
        match payload.map(str::trim) {
            None | Some("") => Ok(StatisticValues::new()),
            Some(text) => serde_json::from_str(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_record_truncates_start_time() {
        let time = Utc.with_ymd_and_hms(2026, 10, 17, 13, 42, 5).unwrap();
        let record = StatisticsRecord::new("geocoder", DurationType::Day, time);
        assert_eq!(record.start_time, Utc.with_ymd_and_hms(2026, 10, 17, 0, 0, 0).unwrap());
        assert_eq!(record.bucket_id(), "2026-10-17");
        assert!(record.id.is_none());
        assert!(record.values.is_empty());
    }

    #[test]
    fn test_parse_values_blank_is_empty() {
        assert!(StatisticsRecord::parse_values(None).unwrap().is_empty());
        assert!(StatisticsRecord::parse_values(Some("  ")).unwrap().is_empty());
        assert!(StatisticsRecord::parse_values(Some("{}")).unwrap().is_empty());
    }

    #[test]
    fn test_parse_values_rejects_garbage() {
        assert!(StatisticsRecord::parse_values(Some("not json")).is_err());
    }

    #[test]
    fn test_values_json() {
        let mut values = StatisticValues::new();
        values.insert("executedGroupsCount".to_string(), 3);
        let record = StatisticsRecord::new("app", DurationType::Hour, Utc::now()).with_values(values);
        assert_eq!(record.values_json().unwrap(), r#"{"executedGroupsCount":3}"#);
    }
}
