use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Calendar bucket for time-window keys. Buckets are computed in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowGranularity {
    Hour,
    Day,
    Week,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown window granularity: {0} (expected hour, day or week)")]
pub struct ParseGranularityError(String);

impl FromStr for WindowGranularity {
    type Err = ParseGranularityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            other => Err(ParseGranularityError(other.to_string())),
        }
    }
}

impl fmt::Display for WindowGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
        };
        f.write_str(name)
    }
}

pub fn dedupe_key(source: &str, action: &str, identifier: &str) -> String {
    format!("{source}:{action}:{identifier}")
}

pub fn time_window_key(source: &str, action: &str, granularity: WindowGranularity) -> String {
    time_window_key_at(source, action, granularity, Utc::now())
}

pub fn time_window_key_at(
    source: &str,
    action: &str,
    granularity: WindowGranularity,
    at: DateTime<Utc>,
) -> String {
    let bucket = match granularity {
        WindowGranularity::Hour => at.format("%Y-%m-%dT%H").to_string(),
        WindowGranularity::Day => at.format("%Y-%m-%d").to_string(),
        WindowGranularity::Week => {
            let week = at.iso_week();
            format!("{}-W{:02}", week.year(), week.week())
        }
    };
    format!("{source}:{action}:{bucket}")
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{WindowGranularity, dedupe_key, time_window_key_at};

    #[test]
    fn composite_key_joins_parts() {
        assert_eq!(
            dedupe_key("telegram", "notify", "chat-42"),
            "telegram:notify:chat-42"
        );
    }

    #[test]
    fn same_hour_shares_a_key() {
        let early = Utc.with_ymd_and_hms(2026, 10, 16, 9, 1, 0).single();
        let late = Utc.with_ymd_and_hms(2026, 10, 16, 9, 59, 59).single();
        let next = Utc.with_ymd_and_hms(2026, 10, 16, 10, 0, 0).single();
        let (Some(early), Some(late), Some(next)) = (early, late, next) else {
            panic!("invalid test timestamps");
        };

        let key = |at| time_window_key_at("cron", "digest", WindowGranularity::Hour, at);
        assert_eq!(key(early), "cron:digest:2026-10-16T09");
        assert_eq!(key(early), key(late));
        assert_ne!(key(late), key(next));
    }

    #[test]
    fn day_bucket() {
        let Some(at) = Utc.with_ymd_and_hms(2026, 10, 16, 23, 59, 0).single() else {
            panic!("invalid test timestamp");
        };
        assert_eq!(
            time_window_key_at("cron", "digest", WindowGranularity::Day, at),
            "cron:digest:2026-10-16"
        );
    }

    #[test]
    fn week_bucket_uses_iso_year() {
        // 2027-01-01 is a Friday, still in ISO week 53 of 2026.
        let Some(at) = Utc.with_ymd_and_hms(2027, 1, 1, 12, 0, 0).single() else {
            panic!("invalid test timestamp");
        };
        assert_eq!(
            time_window_key_at("cron", "review", WindowGranularity::Week, at),
            "cron:review:2026-W53"
        );
    }

    #[test]
    fn granularity_parses_case_insensitively() {
        assert_eq!(
            "Week".parse::<WindowGranularity>(),
            Ok(WindowGranularity::Week)
        );
        assert!("month".parse::<WindowGranularity>().is_err());
    }
}
