//! Per-bucket forecasting over a whole series
//!
//! Walks feature rows in bucket order, applies the consumer's lag policy and
//! asks the forecaster for one estimate per bucket.

use super::features::{backward_fill, first_complete_row, LagPolicy};
use super::DemandForecaster;
use crate::ingest::BucketSeries;
use crate::models::{DemandMetric, FeatureRow};
use crate::observability::ScalerMetrics;
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Instant;
use tracing::{debug, info};

/// Demand estimate for one bucket next to what actually happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketForecast {
    pub bucket_index: i64,
    pub start: DateTime<FixedOffset>,
    pub demand_estimate: f64,
    pub actual: u64,
}

/// Forecasts for a series, starting after any skipped warm-up buckets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRun {
    pub forecaster: String,
    pub metric: DemandMetric,
    pub warmup_buckets: usize,
    pub forecasts: Vec<BucketForecast>,
}

/// Runs a forecaster over every bucket of a series
pub struct ForecastRunner<'a> {
    forecaster: &'a dyn DemandForecaster,
    metric: DemandMetric,
    lag_policy: LagPolicy,
    metrics: Option<ScalerMetrics>,
}

impl<'a> ForecastRunner<'a> {
    pub fn new(forecaster: &'a dyn DemandForecaster, metric: DemandMetric, lag_policy: LagPolicy) -> Self {
        Self {
            forecaster,
            metric,
            lag_policy,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ScalerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Forecast every bucket of `series` from its feature `rows`.
    ///
    /// A forecast failure after the warm-up is fatal to the run.
    pub fn run(&self, series: &BucketSeries, rows: &[FeatureRow]) -> Result<ForecastRun> {
        if rows.len() != series.len() {
            anyhow::bail!(
                "feature rows ({}) do not match buckets ({})",
                rows.len(),
                series.len()
            );
        }

        let (rows, warmup): (Cow<'_, [FeatureRow]>, usize) = match self.lag_policy {
            LagPolicy::SkipWarmup => {
                let required = self.forecaster.required_lags();
                let first = first_complete_row(rows, &required).unwrap_or(rows.len());
                (Cow::Borrowed(rows), first)
            }
            LagPolicy::BackwardFill => (Cow::Owned(backward_fill(rows)), 0),
        };

        info!(
            forecaster = self.forecaster.name(),
            metric = %self.metric,
            buckets = series.len(),
            warmup_buckets = warmup,
            "Forecasting series"
        );

        let mut forecasts = Vec::with_capacity(rows.len().saturating_sub(warmup));
        for (row, bucket) in rows.iter().zip(series.buckets()).skip(warmup) {
            let start = Instant::now();
            let demand_estimate = self
                .forecaster
                .forecast(row)
                .with_context(|| format!("Forecast failed for bucket {}", row.bucket_index))?;
            if let Some(metrics) = &self.metrics {
                metrics.observe_forecast_latency(start.elapsed().as_secs_f64());
            }

            debug!(bucket_index = row.bucket_index, demand_estimate, "Bucket forecast");
            forecasts.push(BucketForecast {
                bucket_index: bucket.index,
                start: bucket.start,
                demand_estimate,
                actual: self.metric.actual(bucket),
            });
        }

        Ok(ForecastRun {
            forecaster: self.forecaster.name().to_string(),
            metric: self.metric,
            warmup_buckets: warmup,
            forecasts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::BucketAggregator;
    use crate::models::LogRecord;
    use crate::predictor::{FeatureConfig, FeatureDeriver, NaiveForecaster};
    use chrono::TimeZone;

    /// `counts[i]` requests in minute i
    fn series(counts: &[u32]) -> BucketSeries {
        let offset = FixedOffset::west_opt(4 * 3600).unwrap();
        let mut records = Vec::new();
        for (minute, &n) in counts.iter().enumerate() {
            for _ in 0..n {
                records.push(LogRecord {
                    host: "h".to_string(),
                    timestamp: offset.with_ymd_and_hms(1995, 8, 23, 0, minute as u32, 0).unwrap(),
                    method: "GET".to_string(),
                    path: "/".to_string(),
                    protocol: "HTTP/1.0".to_string(),
                    status: 200,
                    bytes: 100,
                });
            }
        }
        BucketAggregator::new(60).unwrap().aggregate(&records)
    }

    fn rows(series: &BucketSeries) -> Vec<FeatureRow> {
        FeatureDeriver::new(FeatureConfig {
            lag_offsets: vec![1, 3],
            ..FeatureConfig::default()
        })
        .unwrap()
        .derive(series)
    }

    #[test]
    fn test_skip_warmup_uses_required_lags_only() {
        let s = series(&[10, 20, 40, 80]);
        let naive = NaiveForecaster::new(DemandMetric::Requests, 1.0).unwrap();
        let run = ForecastRunner::new(&naive, DemandMetric::Requests, LagPolicy::SkipWarmup)
            .run(&s, &rows(&s))
            .unwrap();

        assert_eq!(run.warmup_buckets, 1);
        let estimates: Vec<f64> = run.forecasts.iter().map(|f| f.demand_estimate).collect();
        assert_eq!(estimates, vec![10.0, 20.0, 40.0]);
        let actuals: Vec<u64> = run.forecasts.iter().map(|f| f.actual).collect();
        assert_eq!(actuals, vec![20, 40, 80]);
        assert_eq!(run.forecasts[0].bucket_index, s.buckets()[1].index);
    }

    #[test]
    fn test_backward_fill_forecasts_every_bucket() {
        let s = series(&[10, 20, 40]);
        let naive = NaiveForecaster::new(DemandMetric::Bytes, 1.0).unwrap();
        let run = ForecastRunner::new(&naive, DemandMetric::Bytes, LagPolicy::BackwardFill)
            .with_metrics(ScalerMetrics::new())
            .run(&s, &rows(&s))
            .unwrap();

        assert_eq!(run.warmup_buckets, 0);
        assert_eq!(run.forecasts.len(), 3);
        // bucket 0 borrows lag 1 from bucket 1
        assert_eq!(run.forecasts[0].demand_estimate, 1000.0);
        assert_eq!(run.forecasts[0].actual, 1000);
    }

    #[test]
    fn test_series_shorter_than_warmup() {
        let s = series(&[5]);
        let naive = NaiveForecaster::new(DemandMetric::Requests, 1.0).unwrap();
        let run = ForecastRunner::new(&naive, DemandMetric::Requests, LagPolicy::SkipWarmup)
            .run(&s, &rows(&s))
            .unwrap();
        assert_eq!(run.warmup_buckets, 1);
        assert!(run.forecasts.is_empty());
    }

    #[test]
    fn test_mismatched_rows_rejected() {
        let s = series(&[5, 6]);
        let naive = NaiveForecaster::new(DemandMetric::Requests, 1.0).unwrap();
        let r = rows(&s);
        let result = ForecastRunner::new(&naive, DemandMetric::Requests, LagPolicy::SkipWarmup).run(&s, &r[..1]);
        assert!(result.is_err());
    }
}
