//! End-of-run reporting and one-shot recommendations

use super::controller::ControllerState;
use crate::error::{ConfigError, ConfigResult};
use crate::models::ControllerOutput;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default cost of one server for one bucket
pub const DEFAULT_COST_PER_SERVER_BUCKET: f64 = 0.5;

/// Uptime at or above which the run meets its SLA
pub const SLA_UPTIME_PERCENT: f64 = 99.9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_cost")]
    pub cost_per_server_bucket: f64,
}

fn default_cost() -> f64 {
    DEFAULT_COST_PER_SERVER_BUCKET
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            cost_per_server_bucket: DEFAULT_COST_PER_SERVER_BUCKET,
        }
    }
}

/// Derived figures for a finished controller run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_buckets: u64,
    pub overload_count: u64,
    pub flap_count: u64,
    pub uptime_percent: f64,
    /// Sum of servers online over all buckets
    pub server_buckets: u64,
    pub peak_servers: u32,
    pub estimated_cost: f64,
    pub sla_met: bool,
    /// Sum of absolute server count changes between consecutive buckets
    pub total_server_delta: u64,
}

impl RunSummary {
    pub fn from_outputs(outputs: &[ControllerOutput], config: &ReportConfig) -> Self {
        let total_buckets = outputs.len() as u64;
        let overload_count = outputs.iter().filter(|o| o.overloaded).count() as u64;

        let mut previous = ControllerState::new().current_servers;
        let mut flap_count = 0;
        let mut total_server_delta = 0;
        for output in outputs {
            if output.servers_online != previous {
                flap_count += 1;
                total_server_delta += u64::from(output.servers_online.abs_diff(previous));
            }
            previous = output.servers_online;
        }

        let server_buckets: u64 = outputs.iter().map(|o| u64::from(o.servers_online)).sum();
        let peak_servers = outputs.iter().map(|o| o.servers_online).max().unwrap_or(0);
        let uptime_percent = uptime_percent(overload_count, total_buckets);

        Self {
            total_buckets,
            overload_count,
            flap_count,
            uptime_percent,
            server_buckets,
            peak_servers,
            estimated_cost: server_buckets as f64 * config.cost_per_server_bucket,
            sla_met: uptime_percent >= SLA_UPTIME_PERCENT,
            total_server_delta,
        }
    }
}

/// `100 * (1 - overloads / buckets)`; a run with no buckets has full uptime
pub fn uptime_percent(overload_count: u64, total_buckets: u64) -> f64 {
    if total_buckets == 0 {
        return 100.0;
    }
    100.0 * (1.0 - overload_count as f64 / total_buckets as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendedAction {
    ScaleOut,
    Maintain,
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecommendedAction::ScaleOut => write!(f, "SCALE_OUT"),
            RecommendedAction::Maintain => write!(f, "MAINTAIN"),
        }
    }
}

/// Stateless sizing for a single demand value, without margin or cooldown
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub demand: f64,
    pub servers_recommended: u32,
    pub action: RecommendedAction,
}

pub fn recommend(demand: f64, capacity_per_server: f64) -> ConfigResult<Recommendation> {
    if !(capacity_per_server.is_finite() && capacity_per_server > 0.0) {
        return Err(ConfigError::NonPositiveCapacity(capacity_per_server));
    }
    if !(demand.is_finite() && demand >= 0.0) {
        return Err(ConfigError::InvalidDemand {
            bucket_index: 0,
            value: demand,
        });
    }

    let servers_recommended = ((demand / capacity_per_server).ceil() as u32).max(1);
    let action = if servers_recommended > 1 {
        RecommendedAction::ScaleOut
    } else {
        RecommendedAction::Maintain
    };
    Ok(Recommendation {
        demand,
        servers_recommended,
        action,
    })
}
