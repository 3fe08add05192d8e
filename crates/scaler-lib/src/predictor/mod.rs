//! Demand prediction
//!
//! Feature derivation from bucket series, the forecaster capability with its
//! model and heuristic variants, and the runner that produces one demand
//! estimate per bucket.

mod features;
mod inference;
mod runner;

pub use features::{
    backward_fill, first_complete_row, FeatureConfig, FeatureDeriver, LagPolicy,
    DEFAULT_CRASH_THRESHOLD, DEFAULT_LAG_OFFSETS, RATIO_EPSILON,
};
pub use inference::{
    build_forecaster, read_model_file, ForecasterConfig, ForecasterKind, InferenceStats,
    NaiveForecaster, OnnxForecaster, DEFAULT_GROWTH_FACTOR,
};
pub use runner::{BucketForecast, ForecastRun, ForecastRunner};

use crate::models::FeatureRow;
use anyhow::Result;

/// Maps a feature row to a demand estimate for the same bucket, in the
/// units of the metric being forecast
pub trait DemandForecaster: Send + Sync {
    /// Estimate demand for the row's bucket
    fn forecast(&self, row: &FeatureRow) -> Result<f64>;

    /// Short identifier for logs and reports
    fn name(&self) -> &str;

    /// Lag offsets that must be defined for `forecast` to succeed
    fn required_lags(&self) -> Vec<usize> {
        Vec::new()
    }
}
