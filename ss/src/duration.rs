//! Duration types for statistic buckets

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Granularity of a statistics bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationType {
    Hour,
    Day,
    Month,
    Year,
}

impl DurationType {
    /// All duration types, finest first
    pub const ALL: [DurationType; 4] = [Self::Hour, Self::Day, Self::Month, Self::Year];

    /// Storage name of the duration type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Next coarser duration type, `None` for years
    pub fn parent(&self) -> Option<DurationType> {
        match self {
            Self::Hour => Some(Self::Day),
            Self::Day => Some(Self::Month),
            Self::Month => Some(Self::Year),
            Self::Year => None,
        }
    }

    /// Month and year buckets are kept in storage permanently
    pub fn is_retained(&self) -> bool {
        matches!(self, Self::Month | Self::Year)
    }

    /// Start of the period of this granularity containing `time`
    pub fn period_start(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        let (year, month, day, hour) = match self {
            Self::Hour => (time.year(), time.month(), time.day(), time.hour()),
            Self::Day => (time.year(), time.month(), time.day(), 0),
            Self::Month => (time.year(), time.month(), 1, 0),
            Self::Year => (time.year(), 1, 1, 0),
        };
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, 0, 0))
            .map(|naive| naive.and_utc())
            .unwrap_or(time)
    }

    /// Bucket id of the period containing `time`
    ///
    /// Ids of one duration type sort chronologically as strings.
    pub fn bucket_id(&self, time: DateTime<Utc>) -> String {
        let format = match self {
            Self::Hour => "%Y-%m-%dT%H",
            Self::Day => "%Y-%m-%d",
            Self::Month => "%Y-%m",
            Self::Year => "%Y",
        };
        time.format(format).to_string()
    }
}

impl std::fmt::Display for DurationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DurationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            _ => Err(format!("Unknown duration type: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 17).unwrap()
    }

    #[test]
    fn test_parent_chain() {
        assert_eq!(DurationType::Hour.parent(), Some(DurationType::Day));
        assert_eq!(DurationType::Day.parent(), Some(DurationType::Month));
        assert_eq!(DurationType::Month.parent(), Some(DurationType::Year));
        assert_eq!(DurationType::Year.parent(), None);
    }

    #[test]
    fn test_period_start() {
        let time = at(2026, 10, 17, 13, 42);
        assert_eq!(DurationType::Hour.period_start(time), Utc.with_ymd_and_hms(2026, 10, 17, 13, 0, 0).unwrap());
        assert_eq!(DurationType::Day.period_start(time), Utc.with_ymd_and_hms(2026, 10, 17, 0, 0, 0).unwrap());
        assert_eq!(DurationType::Month.period_start(time), Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap());
        assert_eq!(DurationType::Year.period_start(time), Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_bucket_ids() {
        let time = at(2026, 3, 7, 9, 5);
        assert_eq!(DurationType::Hour.bucket_id(time), "2026-03-07T09");
        assert_eq!(DurationType::Day.bucket_id(time), "2026-03-07");
        assert_eq!(DurationType::Month.bucket_id(time), "2026-03");
        assert_eq!(DurationType::Year.bucket_id(time), "2026");
    }

    #[test]
    fn test_bucket_ids_sort_chronologically() {
        let earlier = DurationType::Hour.bucket_id(at(2026, 9, 30, 23, 0));
        let later = DurationType::Hour.bucket_id(at(2026, 10, 1, 0, 0));
        assert!(earlier < later);
    }

    #[test]
    fn test_retained() {
        assert!(!DurationType::Hour.is_retained());
        assert!(!DurationType::Day.is_retained());
        assert!(DurationType::Month.is_retained());
        assert!(DurationType::Year.is_retained());
    }

    #[test]
    fn test_from_str() {
        assert_eq!("HOUR".parse::<DurationType>().unwrap(), DurationType::Hour);
        assert_eq!("year".parse::<DurationType>().unwrap(), DurationType::Year);
        assert!("week".parse::<DurationType>().is_err());
    }
}
