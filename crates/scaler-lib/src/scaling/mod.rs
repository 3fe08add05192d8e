//! Capacity control
//!
//! The hysteresis controller folding demand estimates into server counts,
//! and the derived run report.

mod controller;
mod report;

pub use controller::{
    run, step, Autoscaler, ControllerInput, ControllerState, ScalingPolicy, ScalingRun,
    DEFAULT_CAPACITY_PER_SERVER, DEFAULT_COOLDOWN_BUCKETS, DEFAULT_SAFETY_MARGIN_PERCENT,
};
pub use report::{
    recommend, uptime_percent, Recommendation, RecommendedAction, ReportConfig, RunSummary,
    DEFAULT_COST_PER_SERVER_BUCKET, SLA_UPTIME_PERCENT,
};
