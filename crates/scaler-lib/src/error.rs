//! Error types for parsing, feature derivation and controller configuration

use thiserror::Error;

/// Why a single log line was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line does not match the access log grammar")]
    Malformed,

    #[error("invalid timestamp `{0}`")]
    Timestamp(String),

    #[error("status code {0} outside 100-599")]
    StatusOutOfRange(u16),
}

/// A requested feature does not exist for the bucket
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureError {
    #[error("lag {offset} is undefined at bucket {bucket_index}")]
    UndefinedLag { offset: usize, bucket_index: i64 },

    #[error("lag offset {0} is not configured")]
    UnconfiguredLag(usize),
}

/// Rejected configuration or controller input
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("capacity per server must be positive, got {0}")]
    NonPositiveCapacity(f64),

    #[error("safety margin must be a non-negative percentage, got {0}")]
    NegativeSafetyMargin(f64),

    #[error("cooldown must be a non-negative bucket count, got {0}")]
    NegativeCooldown(i64),

    #[error("demand estimate for bucket {bucket_index} must be non-negative, got {value}")]
    InvalidDemand { bucket_index: i64, value: f64 },

    #[error("actual demand for bucket {bucket_index} must be non-negative, got {value}")]
    InvalidActual { bucket_index: i64, value: f64 },

    #[error("bucket {bucket_index} does not follow bucket {previous}")]
    OutOfOrderBucket { bucket_index: i64, previous: i64 },

    #[error("bucket width must be positive, got {0}s")]
    NonPositiveWidth(i64),

    #[error("cannot re-bucket from {from}s to {to}s: target must be a multiple of the source width")]
    IncompatibleWidth { from: i64, to: i64 },

    #[error("series mismatch: {0}")]
    SeriesMismatch(String),

    #[error("crash threshold must lie in [0, 1], got {0}")]
    InvalidCrashThreshold(f64),

    #[error("lag offsets must be positive")]
    EmptyLagOffset,

    #[error("growth factor must be positive, got {0}")]
    NonPositiveGrowthFactor(f64),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
