//! Demand forecaster implementations
//!
//! `OnnxForecaster` runs an exported gradient-boosting regressor with tract.
//! `NaiveForecaster` is the explicit heuristic variant used when no model is
//! configured.

use super::DemandForecaster;
use crate::error::{ConfigError, ConfigResult};
use crate::models::{DemandMetric, FeatureRow};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

/// Default growth applied by the naive forecaster (5%)
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.05;

/// Maximum inference latency before warning (5ms target)
const MAX_INFERENCE_MS: u128 = 5;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Which forecaster variant to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecasterKind {
    /// Previous bucket times a growth factor
    #[default]
    Naive,
    /// Exported regression model
    Onnx,
}

/// Forecaster selection and parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecasterConfig {
    #[serde(default)]
    pub kind: ForecasterKind,
    #[serde(default)]
    pub metric: DemandMetric,
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,
    /// Model predicting `metric`
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    /// Expected hex SHA-256 of the model file
    #[serde(default)]
    pub model_sha256: Option<String>,
    /// Requests model feeding the bytes model its `predicted_requests` input
    #[serde(default)]
    pub requests_model_path: Option<PathBuf>,
    #[serde(default)]
    pub requests_model_sha256: Option<String>,
    /// Lag offsets the model was trained with, in input order
    #[serde(default = "default_model_lags")]
    pub model_lag_offsets: Vec<usize>,
}

fn default_growth_factor() -> f64 {
    DEFAULT_GROWTH_FACTOR
}

fn default_model_lags() -> Vec<usize> {
    super::features::DEFAULT_LAG_OFFSETS.to_vec()
}

impl Default for ForecasterConfig {
    fn default() -> Self {
        Self {
            kind: ForecasterKind::Naive,
            metric: DemandMetric::Requests,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            model_path: None,
            model_sha256: None,
            requests_model_path: None,
            requests_model_sha256: None,
            model_lag_offsets: default_model_lags(),
        }
    }
}

/// Build the forecaster the configuration names. A configured model that
/// cannot be loaded is an error, never a silent switch to the heuristic.
pub fn build_forecaster(config: &ForecasterConfig) -> Result<Box<dyn DemandForecaster>> {
    let forecaster: Box<dyn DemandForecaster> = match config.kind {
        ForecasterKind::Naive => Box::new(NaiveForecaster::new(config.metric, config.growth_factor)?),
        ForecasterKind::Onnx => {
            let model_path = config
                .model_path
                .as_deref()
                .context("ONNX forecaster selected but no model_path configured")?;
            let bytes = read_model_file(model_path, config.model_sha256.as_deref())?;

            match config.metric {
                DemandMetric::Requests => Box::new(OnnxForecaster::requests(
                    &bytes,
                    config.model_lag_offsets.clone(),
                )?),
                DemandMetric::Bytes => {
                    let requests_path = config
                        .requests_model_path
                        .as_deref()
                        .context("bytes model needs requests_model_path for its predicted_requests input")?;
                    let requests_bytes =
                        read_model_file(requests_path, config.requests_model_sha256.as_deref())?;
                    let requests_model =
                        OnnxForecaster::requests(&requests_bytes, config.model_lag_offsets.clone())?;
                    Box::new(OnnxForecaster::bytes(
                        &bytes,
                        config.model_lag_offsets.clone(),
                        Box::new(requests_model),
                    )?)
                }
            }
        }
    };

    info!(
        event = "forecaster_selected",
        forecaster = forecaster.name(),
        metric = %config.metric,
        "Forecaster selected"
    );
    Ok(forecaster)
}

/// Read a model file, verifying its checksum when one is given
pub fn read_model_file(path: &Path, expected_sha256: Option<&str>) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read model file {}", path.display()))?;

    if let Some(expected) = expected_sha256 {
        let actual = compute_checksum(&bytes);
        if !actual.eq_ignore_ascii_case(expected) {
            anyhow::bail!(
                "Checksum mismatch for {}: expected {}, got {}",
                path.display(),
                expected,
                actual
            );
        }
        debug!(path = %path.display(), "Model checksum verified");
    }

    Ok(bytes)
}

/// Compute SHA256 checksum of data
fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Forecasts the previous bucket's value scaled by a growth factor
pub struct NaiveForecaster {
    metric: DemandMetric,
    growth_factor: f64,
}

impl NaiveForecaster {
    pub fn new(metric: DemandMetric, growth_factor: f64) -> ConfigResult<Self> {
        if !(growth_factor.is_finite() && growth_factor > 0.0) {
            return Err(ConfigError::NonPositiveGrowthFactor(growth_factor));
        }
        Ok(Self {
            metric,
            growth_factor,
        })
    }
}

impl DemandForecaster for NaiveForecaster {
    fn forecast(&self, row: &FeatureRow) -> Result<f64> {
        let previous = row.lag_value(self.metric, 1)?;
        Ok(previous as f64 * self.growth_factor)
    }

    fn name(&self) -> &str {
        "naive"
    }

    fn required_lags(&self) -> Vec<usize> {
        vec![1]
    }
}

/// What the model's input vector is built from
enum ModelInputs {
    /// `[hour, dayofweek, lag_requests_k..., ratio_5xx, is_crash]`
    Requests,
    /// `[hour, dayofweek, lag_bytes_k..., ratio_5xx, predicted_requests]`
    Bytes {
        requests_model: Box<dyn DemandForecaster>,
    },
}

/// ONNX-based forecaster using tract for lightweight inference.
///
/// Models are trained on `log1p(target)`; outputs are mapped back with
/// `expm1`. Undefined lags are fed as NaN, which gradient-boosting models
/// treat as missing values.
pub struct OnnxForecaster {
    model: TractModel,
    inputs: ModelInputs,
    lag_offsets: Vec<usize>,
    inference_count: AtomicU64,
    slow_inference_count: AtomicU64,
}

impl OnnxForecaster {
    /// Model predicting requests per bucket
    pub fn requests(model_bytes: &[u8], lag_offsets: Vec<usize>) -> Result<Self> {
        Self::with_inputs(model_bytes, lag_offsets, ModelInputs::Requests)
    }

    /// Model predicting bytes per bucket from a requests forecast
    pub fn bytes(
        model_bytes: &[u8],
        lag_offsets: Vec<usize>,
        requests_model: Box<dyn DemandForecaster>,
    ) -> Result<Self> {
        Self::with_inputs(model_bytes, lag_offsets, ModelInputs::Bytes { requests_model })
    }

    fn with_inputs(model_bytes: &[u8], lag_offsets: Vec<usize>, inputs: ModelInputs) -> Result<Self> {
        let model = Self::load_model(model_bytes, lag_offsets.len() + 4)?;
        Ok(Self {
            model,
            inputs,
            lag_offsets,
            inference_count: AtomicU64::new(0),
            slow_inference_count: AtomicU64::new(0),
        })
    }

    fn load_model(model_bytes: &[u8], num_features: usize) -> Result<TractModel> {
        let model = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(model_bytes))
            .context("Failed to parse ONNX model")?
            .with_input_fact(0, f32::fact([1, num_features]).into())
            .context("Failed to set input shape")?
            .into_optimized()
            .context("Failed to optimize model")?
            .into_runnable()
            .context("Failed to create runnable model")?;
        Ok(model)
    }

    /// Assemble the model input vector for a row
    fn feature_values(&self, row: &FeatureRow) -> Result<Vec<f32>> {
        let metric = match self.inputs {
            ModelInputs::Requests => DemandMetric::Requests,
            ModelInputs::Bytes { .. } => DemandMetric::Bytes,
        };

        let mut data = Vec::with_capacity(self.lag_offsets.len() + 4);
        data.push(row.hour_of_day as f32);
        data.push(row.day_of_week as f32);
        for &offset in &self.lag_offsets {
            let value = row
                .lag_value(metric, offset)
                .map(|v| v as f32)
                .unwrap_or(f32::NAN);
            data.push(value);
        }
        data.push(row.ratio_5xx as f32);

        match &self.inputs {
            ModelInputs::Requests => data.push(if row.is_crash { 1.0 } else { 0.0 }),
            ModelInputs::Bytes { requests_model } => {
                let predicted = requests_model
                    .forecast(row)
                    .context("Requests forecast for bytes model failed")?;
                data.push(predicted as f32);
            }
        }
        Ok(data)
    }

    fn features_to_tensor(&self, data: Vec<f32>) -> Result<Tensor> {
        let n = data.len();
        Ok(tract_ndarray::Array2::from_shape_vec((1, n), data)?.into())
    }

    /// Get inference statistics
    pub fn stats(&self) -> InferenceStats {
        InferenceStats {
            total_inferences: self.inference_count.load(Ordering::Relaxed),
            slow_inferences: self.slow_inference_count.load(Ordering::Relaxed),
        }
    }
}

impl DemandForecaster for OnnxForecaster {
    fn forecast(&self, row: &FeatureRow) -> Result<f64> {
        let start = Instant::now();

        let input = self.features_to_tensor(self.feature_values(row)?)?;
        let result = self.model.run(tvec!(input.into()))?;
        let output = result.get(0).context("No output from model")?;
        let raw = output
            .to_array_view::<f32>()?
            .iter()
            .next()
            .copied()
            .context("Model output is empty")?;

        let elapsed = start.elapsed();
        self.inference_count.fetch_add(1, Ordering::Relaxed);

        if elapsed.as_millis() > MAX_INFERENCE_MS {
            self.slow_inference_count.fetch_add(1, Ordering::Relaxed);
            warn!(elapsed_ms = elapsed.as_millis(), "Inference exceeded {}ms target", MAX_INFERENCE_MS);
        } else {
            debug!(elapsed_us = elapsed.as_micros(), bucket_index = row.bucket_index, "Inference completed");
        }

        Ok((raw as f64).exp_m1())
    }

    fn name(&self) -> &str {
        match self.inputs {
            ModelInputs::Requests => "onnx-requests",
            ModelInputs::Bytes { .. } => "onnx-bytes",
        }
    }
}

/// Inference statistics
#[derive(Debug, Clone)]
pub struct InferenceStats {
    pub total_inferences: u64,
    pub slow_inferences: u64,
}
