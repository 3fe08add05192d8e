//! Log-driven capacity planning library
//!
//! This crate provides the core functionality for:
//! - Access log parsing and time-bucket aggregation
//! - Demand feature derivation and forecasting
//! - Hysteresis-based autoscaling decisions and run reports
//! - Metrics and structured decision logging

pub mod error;
pub mod ingest;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod predictor;
pub mod scaling;

pub use error::{ConfigError, ConfigResult, FeatureError, ParseError};
pub use models::*;
pub use observability::{DecisionLogger, ScalerMetrics};
pub use pipeline::{Pipeline, PipelineConfig, PipelineOutcome};
