//! Core data models for the log autoscaler

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Timestamp layout used by common/combined access logs
pub const LOG_TIMESTAMP_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// One parsed access-log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub host: String,
    pub timestamp: DateTime<FixedOffset>,
    pub method: String,
    pub path: String,
    pub protocol: String,
    pub status: u16,
    pub bytes: u64,
}

impl LogRecord {
    pub fn status_class(&self) -> StatusClass {
        StatusClass::of(self.status)
    }
}

/// Renders the record back into common log format. The two ident fields are
/// not retained by the parser and are written as `-`.
impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - - [{}] \"{} {} {}\" {} {}",
            self.host,
            self.timestamp.format(LOG_TIMESTAMP_FORMAT),
            self.method,
            self.path,
            self.protocol,
            self.status,
            self.bytes
        )
    }
}

/// HTTP status class, i.e. the status truncated to its hundreds digit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StatusClass(u16);

impl StatusClass {
    pub const SUCCESS: StatusClass = StatusClass(200);
    pub const REDIRECT: StatusClass = StatusClass(300);
    pub const CLIENT_ERROR: StatusClass = StatusClass(400);
    pub const SERVER_ERROR: StatusClass = StatusClass(500);

    pub fn of(status: u16) -> Self {
        StatusClass((status / 100) * 100)
    }

    /// Lower bound of the class (200 for `2xx`)
    pub fn code(&self) -> u16 {
        self.0
    }

    /// Column name used in aggregated tables, e.g. `status_2xx`
    pub fn column_name(&self) -> String {
        format!("status_{}", self)
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}xx", self.0 / 100)
    }
}

/// Aggregate over the half-open interval `[start, start + width)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBucket {
    /// Absolute bucket index: local seconds since the epoch divided by width
    pub index: i64,
    pub start: DateTime<FixedOffset>,
    pub requests: u64,
    pub bytes: u64,
    pub status_counts: BTreeMap<StatusClass, u64>,
}

impl TimeBucket {
    pub fn status_count(&self, class: StatusClass) -> u64 {
        self.status_counts.get(&class).copied().unwrap_or(0)
    }

    /// True when no record fell into this interval
    pub fn is_zero(&self) -> bool {
        self.requests == 0
    }
}

/// Which per-bucket quantity a forecaster predicts and the controller sizes for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemandMetric {
    /// Request count per bucket
    #[default]
    Requests,
    /// Byte sum per bucket (bandwidth scaling)
    Bytes,
}

impl DemandMetric {
    pub fn actual(&self, bucket: &TimeBucket) -> u64 {
        match self {
            DemandMetric::Requests => bucket.requests,
            DemandMetric::Bytes => bucket.bytes,
        }
    }
}

impl fmt::Display for DemandMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DemandMetric::Requests => f.write_str("requests"),
            DemandMetric::Bytes => f.write_str("bytes"),
        }
    }
}

/// Lagged values for one offset. `None` means the series was too short at
/// this bucket for the lag to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagFeature {
    pub offset: usize,
    pub requests: Option<u64>,
    pub bytes: Option<u64>,
}

/// Per-bucket feature vector consumed by demand forecasters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub bucket_index: i64,
    pub start: DateTime<FixedOffset>,
    pub hour_of_day: u32,
    pub day_of_week: u32,
    pub ratio_5xx: f64,
    pub is_crash: bool,
    pub lags: Vec<LagFeature>,
}

/// What the controller did at a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    ScaleUp,
    ScaleDown,
    Hold,
    /// A lower count was needed but the cooldown window had not elapsed
    CooldownBlocked,
}

impl fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScaleAction::ScaleUp => "scale_up",
            ScaleAction::ScaleDown => "scale_down",
            ScaleAction::Hold => "hold",
            ScaleAction::CooldownBlocked => "cooldown_blocked",
        };
        f.write_str(s)
    }
}

/// Controller output record for one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerOutput {
    pub bucket_index: i64,
    pub servers_online: u32,
    pub system_capacity: f64,
    pub overloaded: bool,
    pub needed: u32,
    pub action: ScaleAction,
    pub demand_estimate: f64,
    pub actual_demand: f64,
}

impl ControllerOutput {
    /// Actual demand as a percentage of provisioned capacity
    pub fn load_percent(&self) -> f64 {
        if self.system_capacity <= 0.0 {
            return 0.0;
        }
        self.actual_demand / self.system_capacity * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_class_truncation() {
        assert_eq!(StatusClass::of(200), StatusClass::SUCCESS);
        assert_eq!(StatusClass::of(304), StatusClass::REDIRECT);
        assert_eq!(StatusClass::of(404), StatusClass::CLIENT_ERROR);
        assert_eq!(StatusClass::of(503), StatusClass::SERVER_ERROR);
        assert_eq!(StatusClass::of(101).code(), 100);
    }

    #[test]
    fn test_status_class_display() {
        assert_eq!(StatusClass::of(503).to_string(), "5xx");
        assert_eq!(StatusClass::of(200).column_name(), "status_2xx");
    }

    #[test]
    fn test_load_percent() {
        let out = ControllerOutput {
            bucket_index: 0,
            servers_online: 2,
            system_capacity: 200.0,
            overloaded: false,
            needed: 2,
            action: ScaleAction::Hold,
            demand_estimate: 150.0,
            actual_demand: 150.0,
        };
        assert!((out.load_percent() - 75.0).abs() < 1e-9);
    }
}
