use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// `{prefix}_{32 hex chars}`.
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

/// Inclusive window over event timestamps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The window of length `span` ending at `now`.
    pub fn last(span: Duration, now: DateTime<Utc>) -> Self {
        Self {
            start: now - span,
            end: now,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days().max(1)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Timeframe {
    #[serde(rename = "1d")]
    Day,
    #[serde(rename = "1w")]
    Week,
    #[default]
    #[serde(rename = "1m")]
    Month,
    #[serde(rename = "1q")]
    Quarter,
    #[serde(rename = "1y")]
    Year,
}

impl Timeframe {
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::Day => Duration::days(1),
            Timeframe::Week => Duration::days(7),
            Timeframe::Month => Duration::days(30),
            Timeframe::Quarter => Duration::days(90),
            Timeframe::Year => Duration::days(365),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Day => "1d",
            Timeframe::Week => "1w",
            Timeframe::Month => "1m",
            Timeframe::Quarter => "1q",
            Timeframe::Year => "1y",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "1d" => Some(Timeframe::Day),
            "1w" => Some(Timeframe::Week),
            "1m" => Some(Timeframe::Month),
            "1q" => Some(Timeframe::Quarter),
            "1y" => Some(Timeframe::Year),
            _ => None,
        }
    }

    /// Window ending at `now`, unless `custom` overrides it.
    pub fn range(&self, custom: Option<TimeRange>, now: DateTime<Utc>) -> TimeRange {
        custom.unwrap_or_else(|| TimeRange::last(self.duration(), now))
    }
}
