//! Layered configuration
//!
//! Defaults, then an optional config file, then `AUTOSCALER__*` environment
//! variables. Command-line flags are applied on top by the caller.

use anyhow::{Context, Result};
use scaler_lib::ingest::AggregationConfig;
use scaler_lib::pipeline::{PipelineConfig, DEFAULT_SERIES_NAME};
use scaler_lib::predictor::{FeatureConfig, ForecasterConfig, LagPolicy};
use scaler_lib::scaling::{ReportConfig, ScalingPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;

const ENV_PREFIX: &str = "AUTOSCALER";
const ENV_SEPARATOR: &str = "__";

/// Autoscaler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_series_name")]
    pub series_name: String,

    /// Blocking workers used to parse log files
    #[serde(default = "default_workers")]
    pub workers: usize,

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

    /// Overrides `policy.cooldown_buckets` when set
    #[serde(default)]
    pub cooldown_minutes: Option<i64>,

    #[serde(default)]
    pub report: ReportConfig,
}

fn default_series_name() -> String {
    DEFAULT_SERIES_NAME.to_string()
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            series_name: default_series_name(),
            workers: default_workers(),
            aggregation: AggregationConfig::default(),
            features: FeatureConfig::default(),
            forecaster: ForecasterConfig::default(),
            lag_policy: LagPolicy::default(),
            policy: ScalingPolicy::default(),
            cooldown_minutes: None,
            report: ReportConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from an optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load with an explicit environment map instead of the process one
    pub fn load_with_env(path: Option<&Path>, env: Option<config::Map<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        );

        let settings = builder.build().context("Failed to load configuration")?;
        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Resolve into the library's pipeline configuration
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut policy = self.policy;
        if let Some(minutes) = self.cooldown_minutes {
            policy = ScalingPolicy::with_cooldown_minutes(
                policy.capacity_per_server,
                policy.safety_margin_percent,
                minutes,
                self.aggregation.bucket_width_secs,
            )?;
        }
        policy.validate()?;

        Ok(PipelineConfig {
            series_name: self.series_name.clone(),
            aggregation: self.aggregation.clone(),
            features: self.features.clone(),
            forecaster: self.forecaster.clone(),
            lag_policy: self.lag_policy,
            policy,
            report: self.report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scaler_lib::predictor::ForecasterKind;
    use scaler_lib::DemandMetric;
    use std::io::Write;

    fn empty_env() -> Option<config::Map<String, String>> {
        Some(config::Map::new())
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = AppConfig::load_with_env(None, empty_env()).unwrap();
        assert_eq!(config.series_name, "access-log");
        assert_eq!(config.aggregation.bucket_width_secs, 300);
        assert_eq!(config.policy, ScalingPolicy::default());
        assert_eq!(config.forecaster.kind, ForecasterKind::Naive);
        assert!(config.workers >= 1);
    }

    #[test]
    fn test_file_then_env() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
series_name = "nasa"
cooldown_minutes = 20

[policy]
capacity_per_server = 250.0

[forecaster]
metric = "bytes"
"#
        )
        .unwrap();

        let mut env = config::Map::new();
        env.insert("AUTOSCALER__POLICY__SAFETY_MARGIN_PERCENT".to_string(), "25".to_string());
        env.insert("AUTOSCALER__SERIES_NAME".to_string(), "from-env".to_string());

        let config = AppConfig::load_with_env(Some(file.path()), Some(env)).unwrap();
        assert_eq!(config.series_name, "from-env");
        assert_eq!(config.policy.capacity_per_server, 250.0);
        assert_eq!(config.policy.safety_margin_percent, 25.0);
        assert_eq!(config.forecaster.metric, DemandMetric::Bytes);

        let pipeline = config.pipeline_config().unwrap();
        // 20 minutes at 5-minute buckets
        assert_eq!(pipeline.policy.cooldown_buckets, 4);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = AppConfig::load_with_env(Some(Path::new("/nonexistent/autoscaler.toml")), empty_env());
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let config = AppConfig {
            policy: ScalingPolicy {
                capacity_per_server: -1.0,
                ..ScalingPolicy::default()
            },
            ..AppConfig::default()
        };
        assert!(config.pipeline_config().is_err());
    }
}
