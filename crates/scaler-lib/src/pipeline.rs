//! End-to-end batch run
//!
//! Loaded log -> bucket series -> feature rows -> demand forecasts ->
//! controller decisions -> run summary, all over one ordered series.

use crate::ingest::{AggregationConfig, BucketAggregator, BucketSeries, IngestReport, LoadedLog};
use crate::observability::{DecisionLogger, ScalerMetrics};
use crate::predictor::{
    build_forecaster, DemandForecaster, FeatureConfig, FeatureDeriver, ForecastRun, ForecastRunner,
    ForecasterConfig, LagPolicy,
};
use crate::scaling::{Autoscaler, ControllerInput, ReportConfig, RunSummary, ScalingPolicy, ScalingRun};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Default label attached to log events of a run
pub const DEFAULT_SERIES_NAME: &str = "access-log";

/// Every stage's configuration for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_series_name")]
    pub series_name: String,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub forecaster: ForecasterConfig,
    #[serde(default)]
    pub lag_policy: LagPolicy,
    #[serde(default)]
    pub policy: ScalingPolicy,
    #[serde(default)]
    pub report: ReportConfig,
}

fn default_series_name() -> String {
    DEFAULT_SERIES_NAME.to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            series_name: default_series_name(),
            aggregation: AggregationConfig::default(),
            features: FeatureConfig::default(),
            forecaster: ForecasterConfig::default(),
            lag_policy: LagPolicy::default(),
            policy: ScalingPolicy::default(),
            report: ReportConfig::default(),
        }
    }
}

/// Everything a run produced, stage by stage
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub ingest: IngestReport,
    pub series: BucketSeries,
    pub forecast: ForecastRun,
    pub scaling: ScalingRun,
    pub summary: RunSummary,
}

/// Stages wired together from a `PipelineConfig`
pub struct Pipeline {
    config: PipelineConfig,
    aggregator: BucketAggregator,
    deriver: FeatureDeriver,
    forecaster: Box<dyn DemandForecaster>,
    metrics: Option<ScalerMetrics>,
}

impl Pipeline {
    /// Validate the configuration and build the configured forecaster
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let forecaster = build_forecaster(&config.forecaster).context("Failed to build forecaster")?;
        Self::with_forecaster(config, forecaster)
    }

    /// Use a caller-supplied forecaster instead of the configured one
    pub fn with_forecaster(config: PipelineConfig, forecaster: Box<dyn DemandForecaster>) -> Result<Self> {
        let aggregator = BucketAggregator::from_config(&config.aggregation)?;
        let deriver = FeatureDeriver::new(config.features.clone())?;
        config.policy.validate()?;
        Ok(Self {
            config,
            aggregator,
            deriver,
            forecaster,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: ScalerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn aggregate(&self, loaded: &LoadedLog) -> BucketSeries {
        let series = self.aggregator.aggregate(&loaded.records);
        if let Some(m) = &self.metrics {
            m.record_ingest(&loaded.report);
            m.add_buckets(series.len() as u64);
        }
        series
    }

    /// Run every stage over already-parsed records
    pub fn run(&self, loaded: &LoadedLog) -> Result<PipelineOutcome> {
        let logger = DecisionLogger::new(self.config.series_name.clone());

        let series = self.aggregate(loaded);
        logger.log_ingest(&loaded.report, series.len());

        let rows = self.deriver.derive(&series);

        let mut runner = ForecastRunner::new(
            self.forecaster.as_ref(),
            self.config.forecaster.metric,
            self.config.lag_policy,
        );
        if let Some(m) = &self.metrics {
            runner = runner.with_metrics(m.clone());
        }
        let forecast = runner.run(&series, &rows)?;

        let inputs: Vec<ControllerInput> = forecast
            .forecasts
            .iter()
            .map(|f| ControllerInput::new(f.bucket_index, f.demand_estimate, f.actual as f64))
            .collect();

        let mut autoscaler = Autoscaler::new(self.config.policy, logger.clone())?;
        if let Some(m) = &self.metrics {
            autoscaler = autoscaler.with_metrics(m.clone());
        }
        let outputs = autoscaler.run(&inputs).context("Controller rejected a forecast")?;
        let scaling = ScalingRun {
            outputs,
            final_state: autoscaler.into_state(),
        };

        let summary = RunSummary::from_outputs(&scaling.outputs, &self.config.report);
        logger.log_run_summary(
            summary.total_buckets,
            summary.overload_count,
            summary.flap_count,
            summary.uptime_percent,
        );
        info!(
            series = %self.config.series_name,
            peak_servers = summary.peak_servers,
            estimated_cost = summary.estimated_cost,
            sla_met = summary.sla_met,
            "Pipeline finished"
        );

        Ok(PipelineOutcome {
            ingest: loaded.report.clone(),
            series,
            forecast,
            scaling,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::parse_lines;
    use crate::models::DemandMetric;
    use crate::predictor::NaiveForecaster;
    use anyhow::bail;

    /// `counts[i]` requests in the i-th 5-minute bucket
    fn log_text(counts: &[usize]) -> Vec<String> {
        let mut lines = Vec::new();
        for (bucket, &n) in counts.iter().enumerate() {
            let minutes = bucket * 5;
            for _ in 0..n {
                lines.push(format!(
                    "host - - [01/Jul/1995:{:02}:{:02}:00 -0400] \"GET / HTTP/1.0\" 200 10",
                    minutes / 60,
                    minutes % 60
                ));
            }
        }
        lines
    }

    fn loaded(counts: &[usize]) -> LoadedLog {
        let (records, report) = parse_lines(log_text(counts));
        LoadedLog { records, report }
    }

    #[test]
    fn test_naive_pipeline_end_to_end() {
        let config = PipelineConfig {
            forecaster: ForecasterConfig {
                growth_factor: 1.0,
                ..ForecasterConfig::default()
            },
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::from_config(config).unwrap().with_metrics(ScalerMetrics::new());
        let outcome = pipeline.run(&loaded(&[80, 80, 250, 80, 80, 80, 80])).unwrap();

        assert_eq!(outcome.series.len(), 7);
        assert_eq!(outcome.forecast.warmup_buckets, 1);
        // bucket i is sized from bucket i - 1
        assert_eq!(outcome.scaling.servers(), vec![1, 1, 3, 3, 3, 1]);
        assert_eq!(outcome.summary.total_buckets, 6);
        // the spike arrives before the forecast sees it
        assert_eq!(outcome.summary.overload_count, 1);
        assert_eq!(outcome.summary.flap_count, 2);
    }

    #[test]
    fn test_empty_log_gives_empty_run() {
        let pipeline = Pipeline::from_config(PipelineConfig::default()).unwrap();
        let outcome = pipeline.run(&LoadedLog::default()).unwrap();
        assert!(outcome.series.is_empty());
        assert_eq!(outcome.summary.total_buckets, 0);
        assert_eq!(outcome.summary.uptime_percent, 100.0);
    }

    #[test]
    fn test_invalid_policy_rejected_up_front() {
        let config = PipelineConfig {
            policy: ScalingPolicy {
                capacity_per_server: 0.0,
                ..ScalingPolicy::default()
            },
            ..PipelineConfig::default()
        };
        assert!(Pipeline::from_config(config).is_err());
    }

    struct NegativeForecaster;

    impl DemandForecaster for NegativeForecaster {
        fn forecast(&self, _row: &crate::models::FeatureRow) -> Result<f64> {
            Ok(-1.0)
        }

        fn name(&self) -> &str {
            "negative"
        }
    }

    struct FailingForecaster;

    impl DemandForecaster for FailingForecaster {
        fn forecast(&self, _row: &crate::models::FeatureRow) -> Result<f64> {
            bail!("model unavailable")
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn test_negative_forecast_is_rejected() {
        let pipeline = Pipeline::with_forecaster(PipelineConfig::default(), Box::new(NegativeForecaster)).unwrap();
        let err = pipeline.run(&loaded(&[10, 10])).unwrap_err();
        assert!(format!("{err:#}").contains("demand estimate"));
    }

    #[test]
    fn test_forecast_failure_aborts_run() {
        let pipeline = Pipeline::with_forecaster(PipelineConfig::default(), Box::new(FailingForecaster)).unwrap();
        assert!(pipeline.run(&loaded(&[10, 10])).is_err());
    }

    #[test]
    fn test_bytes_metric_with_backward_fill() {
        let config = PipelineConfig {
            forecaster: ForecasterConfig {
                metric: DemandMetric::Bytes,
                growth_factor: 1.0,
                ..ForecasterConfig::default()
            },
            lag_policy: LagPolicy::BackwardFill,
            policy: ScalingPolicy {
                capacity_per_server: 1_000.0,
                ..ScalingPolicy::default()
            },
            ..PipelineConfig::default()
        };
        let outcome = Pipeline::from_config(config).unwrap().run(&loaded(&[50, 150, 50])).unwrap();
        assert_eq!(outcome.forecast.warmup_buckets, 0);
        let actuals: Vec<u64> = outcome.forecast.forecasts.iter().map(|f| f.actual).collect();
        assert_eq!(actuals, vec![500, 1500, 500]);
        assert_eq!(outcome.scaling.outputs.len(), 3);
    }
}
