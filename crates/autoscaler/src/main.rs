//! Log Autoscaler CLI
//!
//! Replays web access logs through bucket aggregation, demand forecasting
//! and the hysteresis controller, and reports what capacity would have been
//! provisioned.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use output::{LogFormat, OutputFormat};
use scaler_lib::predictor::{ForecasterKind, LagPolicy};
use scaler_lib::{DemandMetric, ScalerMetrics};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Access-log driven autoscaling simulator
#[derive(Parser)]
#[command(name = "autoscaler")]
#[command(author, version, about = "Autoscaling simulator driven by web access logs", long_about = None)]
pub struct Cli {
    /// Config file (TOML, JSON or YAML by extension)
    #[arg(long, global = true, env = "AUTOSCALER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: OutputFormat,

    /// Log line format on stderr
    #[arg(long, global = true, default_value = "json")]
    pub log_format: LogFormat,

    /// Print Prometheus metrics after the command (to stderr with `--format json`)
    #[arg(long, global = true)]
    pub emit_metrics: bool,

    /// Parser workers (defaults to available parallelism)
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse logs and print the bucket table
    Aggregate {
        /// Access log files, in time order
        #[arg(required = true)]
        logs: Vec<PathBuf>,

        /// Bucket width in seconds
        #[arg(long)]
        width_secs: Option<i64>,

        /// Re-bucket to a coarser width (a multiple of the bucket width)
        #[arg(long)]
        rebucket_secs: Option<i64>,
    },

    /// Run forecasting and the scaling controller over logs
    Simulate {
        /// Access log files, in time order
        #[arg(required = true)]
        logs: Vec<PathBuf>,

        /// Forecaster variant
        #[arg(long)]
        forecaster: Option<ForecasterArg>,

        /// Quantity to forecast and scale on
        #[arg(long)]
        metric: Option<MetricArg>,

        /// ONNX model file
        #[arg(long)]
        model: Option<PathBuf>,

        /// How undefined lag features are handled at the start of the series
        #[arg(long)]
        lag_policy: Option<LagPolicyArg>,

        /// Demand one server handles per bucket
        #[arg(long)]
        capacity: Option<f64>,

        /// Headroom added to every forecast, in percent
        #[arg(long)]
        safety_margin: Option<f64>,

        /// Minimum minutes between a change and a scale-down
        #[arg(long)]
        cooldown_minutes: Option<i64>,

        /// Bucket width in seconds
        #[arg(long)]
        width_secs: Option<i64>,

        /// Number of trailing buckets to print
        #[arg(long, default_value_t = 20)]
        tail: usize,
    },

    /// Recommend a server count for a single demand value
    Recommend {
        /// Forecast demand for the next bucket
        demand: f64,

        /// Demand one server handles per bucket
        #[arg(long)]
        capacity: Option<f64>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ForecasterArg {
    Naive,
    Onnx,
}

impl From<ForecasterArg> for ForecasterKind {
    fn from(arg: ForecasterArg) -> Self {
        match arg {
            ForecasterArg::Naive => ForecasterKind::Naive,
            ForecasterArg::Onnx => ForecasterKind::Onnx,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MetricArg {
    Requests,
    Bytes,
}

impl From<MetricArg> for DemandMetric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::Requests => DemandMetric::Requests,
            MetricArg::Bytes => DemandMetric::Bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LagPolicyArg {
    SkipWarmup,
    BackwardFill,
}

impl From<LagPolicyArg> for LagPolicy {
    fn from(arg: LagPolicyArg) -> Self {
        match arg {
            LagPolicyArg::SkipWarmup => LagPolicy::SkipWarmup,
            LagPolicyArg::BackwardFill => LagPolicy::BackwardFill,
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_writer(std::io::stderr)).init(),
        LogFormat::Text => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut app_config = config::AppConfig::load(cli.config.as_deref())?;
    if let Some(workers) = cli.workers {
        app_config.workers = workers.max(1);
    }
    let metrics = cli.emit_metrics.then(ScalerMetrics::new);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting autoscaler");

    match cli.command {
        Commands::Aggregate {
            logs,
            width_secs,
            rebucket_secs,
        } => {
            let width = width_secs.unwrap_or(app_config.aggregation.bucket_width_secs);
            commands::aggregate::run(&logs, app_config.workers, width, rebucket_secs, metrics.as_ref(), cli.format)
                .await?;
        }
        Commands::Simulate {
            logs,
            forecaster,
            metric,
            model,
            lag_policy,
            capacity,
            safety_margin,
            cooldown_minutes,
            width_secs,
            tail,
        } => {
            if let Some(kind) = forecaster {
                app_config.forecaster.kind = kind.into();
            }
            if let Some(metric) = metric {
                app_config.forecaster.metric = metric.into();
            }
            if model.is_some() {
                app_config.forecaster.model_path = model;
            }
            if let Some(policy) = lag_policy {
                app_config.lag_policy = policy.into();
            }
            if let Some(capacity) = capacity {
                app_config.policy.capacity_per_server = capacity;
            }
            if let Some(margin) = safety_margin {
                app_config.policy.safety_margin_percent = margin;
            }
            if cooldown_minutes.is_some() {
                app_config.cooldown_minutes = cooldown_minutes;
            }
            if let Some(width) = width_secs {
                app_config.aggregation.bucket_width_secs = width;
            }

            let pipeline_config = app_config.pipeline_config()?;
            commands::simulate::run(&logs, app_config.workers, pipeline_config, tail, metrics.clone(), cli.format)
                .await?;
        }
        Commands::Recommend { demand, capacity } => {
            let capacity = capacity.unwrap_or(app_config.policy.capacity_per_server);
            commands::recommend::run(demand, capacity, cli.format)?;
        }
    }

    if let Some(m) = metrics {
        let exposition = m.render()?;
        // stdout stays a single JSON document
        match cli.format {
            OutputFormat::Json => eprint!("{}", exposition),
            OutputFormat::Table => print!("{}", exposition),
        }
    }

    Ok(())
}
