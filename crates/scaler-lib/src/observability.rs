//! Observability infrastructure for the autoscaler
//!
//! Provides:
//! - Prometheus metrics (ingest counts, scaling events, overloads, forecast latency)
//! - Structured JSON logging with tracing

use crate::ingest::IngestReport;
use prometheus::{register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Rejection ratio above which ingest summaries are logged as warnings
const REJECTION_WARN_RATIO: f64 = 0.01;

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ScalerMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct ScalerMetricsInner {
    lines_parsed: IntCounter,
    lines_rejected: IntCounter,
    buckets_aggregated: IntCounter,
    scale_up_events: IntCounter,
    scale_down_events: IntCounter,
    scale_down_blocked: IntCounter,
    overload_buckets: IntCounter,
    servers_online: IntGauge,
    forecast_latency_seconds: Histogram,
}

impl ScalerMetricsInner {
    fn new() -> Self {
        Self {
            lines_parsed: register_int_counter!(
                "autoscaler_log_lines_parsed_total",
                "Access log lines parsed into records"
            )
            .expect("Failed to register log_lines_parsed_total"),

            lines_rejected: register_int_counter!(
                "autoscaler_log_lines_rejected_total",
                "Access log lines rejected by the parser"
            )
            .expect("Failed to register log_lines_rejected_total"),

            buckets_aggregated: register_int_counter!(
                "autoscaler_buckets_aggregated_total",
                "Time buckets emitted by aggregation, including zero-filled ones"
            )
            .expect("Failed to register buckets_aggregated_total"),

            scale_up_events: register_int_counter!(
                "autoscaler_scale_up_events_total",
                "Accepted scale-up decisions"
            )
            .expect("Failed to register scale_up_events_total"),

            scale_down_events: register_int_counter!(
                "autoscaler_scale_down_events_total",
                "Accepted scale-down decisions"
            )
            .expect("Failed to register scale_down_events_total"),

            scale_down_blocked: register_int_counter!(
                "autoscaler_scale_down_blocked_total",
                "Scale-down decisions held back by the cooldown window"
            )
            .expect("Failed to register scale_down_blocked_total"),

            overload_buckets: register_int_counter!(
                "autoscaler_overload_buckets_total",
                "Buckets whose actual demand exceeded provisioned capacity"
            )
            .expect("Failed to register overload_buckets_total"),

            servers_online: register_int_gauge!(
                "autoscaler_servers_online",
                "Servers provisioned for the most recent bucket"
            )
            .expect("Failed to register servers_online"),

            forecast_latency_seconds: register_histogram!(
                "autoscaler_forecast_latency_seconds",
                "Time spent producing one demand forecast",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register forecast_latency_seconds"),
        }
    }
}

/// Autoscaler metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ScalerMetrics {
    _private: (),
}

impl Default for ScalerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ScalerMetricsInner {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new)
    }

    pub fn record_ingest(&self, report: &IngestReport) {
        self.inner().lines_parsed.inc_by(report.parsed);
        self.inner().lines_rejected.inc_by(report.rejected);
    }

    pub fn add_buckets(&self, count: u64) {
        self.inner().buckets_aggregated.inc_by(count);
    }

    pub fn inc_scale_up(&self) {
        self.inner().scale_up_events.inc();
    }

    pub fn inc_scale_down(&self) {
        self.inner().scale_down_events.inc();
    }

    pub fn inc_scale_down_blocked(&self) {
        self.inner().scale_down_blocked.inc();
    }

    pub fn inc_overload(&self) {
        self.inner().overload_buckets.inc();
    }

    pub fn set_servers_online(&self, servers: u32) {
        self.inner().servers_online.set(servers as i64);
    }

    pub fn observe_forecast_latency(&self, duration_secs: f64) {
        self.inner().forecast_latency_seconds.observe(duration_secs);
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        use prometheus::{Encoder, TextEncoder};

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Structured logger for scaling events of one monitored series
///
/// Provides consistent JSON-formatted logging for ingest summaries,
/// capacity changes, overloads and run summaries.
#[derive(Clone)]
pub struct DecisionLogger {
    series: String,
}

impl DecisionLogger {
    pub fn new(series: impl Into<String>) -> Self {
        Self {
            series: series.into(),
        }
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    /// Log the outcome of parsing a batch of lines
    pub fn log_ingest(&self, report: &IngestReport, buckets: usize) {
        if report.rejection_ratio() > REJECTION_WARN_RATIO {
            warn!(
                event = "ingest_completed",
                series = %self.series,
                parsed = report.parsed,
                rejected = report.rejected,
                blank = report.blank,
                first_rejected_line = ?report.first_rejected_line,
                buckets = buckets,
                "Ingest completed with a high rejection rate"
            );
        } else {
            info!(
                event = "ingest_completed",
                series = %self.series,
                parsed = report.parsed,
                rejected = report.rejected,
                blank = report.blank,
                buckets = buckets,
                "Ingest completed"
            );
        }
    }

    pub fn log_scale_up(&self, bucket_index: i64, from: u32, to: u32, demand_estimate: f64) {
        info!(
            event = "scale_up",
            series = %self.series,
            bucket_index = bucket_index,
            from = from,
            to = to,
            demand_estimate = demand_estimate,
            "Scaled up"
        );
    }

    pub fn log_scale_down(&self, bucket_index: i64, from: u32, to: u32, demand_estimate: f64) {
        info!(
            event = "scale_down",
            series = %self.series,
            bucket_index = bucket_index,
            from = from,
            to = to,
            demand_estimate = demand_estimate,
            "Scaled down"
        );
    }

    pub fn log_scale_down_blocked(&self, bucket_index: i64, current: u32, needed: u32, buckets_since_change: i64) {
        debug!(
            event = "scale_down_blocked",
            series = %self.series,
            bucket_index = bucket_index,
            current = current,
            needed = needed,
            buckets_since_change = buckets_since_change,
            "Scale-down held by cooldown"
        );
    }

    pub fn log_overload(&self, bucket_index: i64, actual: f64, capacity: f64) {
        warn!(
            event = "overload",
            series = %self.series,
            bucket_index = bucket_index,
            actual = actual,
            capacity = capacity,
            "Actual demand exceeded provisioned capacity"
        );
    }

    pub fn log_run_summary(&self, total_buckets: u64, overload_count: u64, flap_count: u64, uptime_percent: f64) {
        info!(
            event = "run_completed",
            series = %self.series,
            total_buckets = total_buckets,
            overload_count = overload_count,
            flap_count = flap_count,
            uptime_percent = uptime_percent,
            "Scaling run completed"
        );
    }
}
