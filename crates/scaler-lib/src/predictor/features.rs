//! Feature derivation for demand forecasting
//!
//! Derives calendar context, the 5xx ratio and lagged request/byte values
//! from a bucket series. Lags that reach before the start of the series are
//! left undefined; filling them is the consumer's decision (see
//! [`backward_fill`]).

use crate::error::{ConfigError, ConfigResult, FeatureError};
use crate::ingest::BucketSeries;
use crate::models::{DemandMetric, FeatureRow, LagFeature, StatusClass};
use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

/// 5xx ratio above which a bucket counts as a crash
pub const DEFAULT_CRASH_THRESHOLD: f64 = 0.2;

/// Previous bucket, and one day back at 5-minute resolution
pub const DEFAULT_LAG_OFFSETS: [usize; 2] = [1, 288];

/// Keeps the 5xx ratio finite for empty buckets
pub const RATIO_EPSILON: f64 = 1e-9;

/// Configuration for feature derivation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default = "default_crash_threshold")]
    pub crash_threshold: f64,
    #[serde(default = "default_lag_offsets")]
    pub lag_offsets: Vec<usize>,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

fn default_crash_threshold() -> f64 {
    DEFAULT_CRASH_THRESHOLD
}

fn default_lag_offsets() -> Vec<usize> {
    DEFAULT_LAG_OFFSETS.to_vec()
}

fn default_epsilon() -> f64 {
    RATIO_EPSILON
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            crash_threshold: DEFAULT_CRASH_THRESHOLD,
            lag_offsets: DEFAULT_LAG_OFFSETS.to_vec(),
            epsilon: RATIO_EPSILON,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if !(0.0..=1.0).contains(&self.crash_threshold) {
            return Err(ConfigError::InvalidCrashThreshold(self.crash_threshold));
        }
        if self.lag_offsets.iter().any(|&k| k == 0) {
            return Err(ConfigError::EmptyLagOffset);
        }
        Ok(())
    }
}

/// How a consumer handles lag features that are undefined at the start of
/// a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LagPolicy {
    /// Do not forecast until the forecaster's required lags exist
    #[default]
    SkipWarmup,
    /// Fill each undefined lag from the next defined value of the same lag
    BackwardFill,
}

/// Derives one feature row per bucket
pub struct FeatureDeriver {
    config: FeatureConfig,
}

impl FeatureDeriver {
    pub fn new(config: FeatureConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn derive(&self, series: &BucketSeries) -> Vec<FeatureRow> {
        let buckets = series.buckets();

        buckets
            .iter()
            .enumerate()
            .map(|(i, bucket)| {
                let errors = bucket.status_count(StatusClass::SERVER_ERROR) as f64;
                let ratio_5xx = errors / (bucket.requests as f64 + self.config.epsilon);

                let lags = self
                    .config
                    .lag_offsets
                    .iter()
                    .map(|&offset| {
                        let past = i.checked_sub(offset).map(|j| &buckets[j]);
                        LagFeature {
                            offset,
                            requests: past.map(|b| b.requests),
                            bytes: past.map(|b| b.bytes),
                        }
                    })
                    .collect();

                FeatureRow {
                    bucket_index: bucket.index,
                    start: bucket.start,
                    hour_of_day: bucket.start.hour(),
                    day_of_week: bucket.start.weekday().num_days_from_monday(),
                    ratio_5xx,
                    is_crash: ratio_5xx > self.config.crash_threshold,
                    lags,
                }
            })
            .collect()
    }
}

impl FeatureRow {
    pub fn lag(&self, offset: usize) -> Result<&LagFeature, FeatureError> {
        self.lags
            .iter()
            .find(|l| l.offset == offset)
            .ok_or(FeatureError::UnconfiguredLag(offset))
    }

    /// Lagged value of `metric`, or an error if it is undefined here
    pub fn lag_value(&self, metric: DemandMetric, offset: usize) -> Result<u64, FeatureError> {
        let lag = self.lag(offset)?;
        let value = match metric {
            DemandMetric::Requests => lag.requests,
            DemandMetric::Bytes => lag.bytes,
        };
        value.ok_or(FeatureError::UndefinedLag {
            offset,
            bucket_index: self.bucket_index,
        })
    }

    pub fn lag_requests(&self, offset: usize) -> Result<u64, FeatureError> {
        self.lag_value(DemandMetric::Requests, offset)
    }

    pub fn lag_bytes(&self, offset: usize) -> Result<u64, FeatureError> {
        self.lag_value(DemandMetric::Bytes, offset)
    }

    /// True when every listed lag is defined for both metrics
    pub fn has_lags(&self, offsets: &[usize]) -> bool {
        offsets.iter().all(|&k| {
            self.lag(k)
                .map(|l| l.requests.is_some() && l.bytes.is_some())
                .unwrap_or(false)
        })
    }
}

/// Position of the first row where all `offsets` are defined
pub fn first_complete_row(rows: &[FeatureRow], offsets: &[usize]) -> Option<usize> {
    rows.iter().position(|row| row.has_lags(offsets))
}

/// Fill undefined lags from the next defined value of the same lag, leaving
/// them undefined when no later value exists.
pub fn backward_fill(rows: &[FeatureRow]) -> Vec<FeatureRow> {
    let mut filled = rows.to_vec();
    let lag_count = filled.first().map(|r| r.lags.len()).unwrap_or(0);

    for slot in 0..lag_count {
        let mut next_requests = None;
        let mut next_bytes = None;
        for row in filled.iter_mut().rev() {
            let Some(lag) = row.lags.get_mut(slot) else {
                continue;
            };
            match lag.requests {
                Some(v) => next_requests = Some(v),
                None => lag.requests = next_requests,
            }
            match lag.bytes {
                Some(v) => next_bytes = Some(v),
                None => lag.bytes = next_bytes,
            }
        }
    }

    filled
}
