//! `simulate`: full forecast and scaling run over a log

use anyhow::{Context, Result};
use colored::Colorize;
use scaler_lib::ingest::{load_log_files, IngestReport};
use scaler_lib::pipeline::{Pipeline, PipelineConfig};
use scaler_lib::scaling::{ControllerState, RunSummary};
use scaler_lib::{ControllerOutput, DemandMetric, ScalerMetrics};
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;

use crate::output::{color_action, color_load, print_ingest_report, print_json, print_rows, print_summary, OutputFormat};

/// Row for the per-bucket decision table
#[derive(Tabled)]
struct DecisionRow {
    #[tabled(rename = "Start")]
    start: String,
    #[tabled(rename = "Forecast")]
    forecast: String,
    #[tabled(rename = "Actual")]
    actual: String,
    #[tabled(rename = "Needed")]
    needed: u32,
    #[tabled(rename = "Servers")]
    servers: u32,
    #[tabled(rename = "Load")]
    load: String,
    #[tabled(rename = "Action")]
    action: String,
}

#[derive(Serialize)]
struct DecisionRecord<'a> {
    start: String,
    #[serde(flatten)]
    output: &'a ControllerOutput,
    load_percent: f64,
}

#[derive(Serialize)]
struct SimulateOutput<'a> {
    series: &'a str,
    forecaster: &'a str,
    metric: DemandMetric,
    ingest: &'a IngestReport,
    warmup_buckets: usize,
    final_state: &'a ControllerState,
    summary: &'a RunSummary,
    decisions: Vec<DecisionRecord<'a>>,
}

pub async fn run(
    logs: &[PathBuf],
    workers: usize,
    config: PipelineConfig,
    tail: usize,
    metrics: Option<ScalerMetrics>,
    format: OutputFormat,
) -> Result<()> {
    let mut pipeline = Pipeline::from_config(config)?;
    if let Some(m) = metrics {
        pipeline = pipeline.with_metrics(m);
    }

    let loaded = load_log_files(logs, workers).await?;
    let outcome = pipeline.run(&loaded).context("Simulation failed")?;

    let outputs = &outcome.scaling.outputs;
    let skip = outputs.len().saturating_sub(tail);
    let starts = outcome.forecast.forecasts.iter().map(|f| f.start.to_rfc3339());
    let shown = starts.zip(outputs).skip(skip);

    match format {
        OutputFormat::Json => {
            let decisions = shown
                .map(|(start, output)| DecisionRecord {
                    start,
                    output,
                    load_percent: output.load_percent(),
                })
                .collect();
            print_json(&SimulateOutput {
                series: &pipeline.config().series_name,
                forecaster: &outcome.forecast.forecaster,
                metric: outcome.forecast.metric,
                ingest: &outcome.ingest,
                warmup_buckets: outcome.forecast.warmup_buckets,
                final_state: &outcome.scaling.final_state,
                summary: &outcome.summary,
                decisions,
            })?;
        }
        OutputFormat::Table => {
            print_ingest_report(&outcome.ingest);
            println!(
                "Forecaster:             {} ({})",
                outcome.forecast.forecaster.cyan(),
                outcome.forecast.metric
            );
            println!("Warm-up buckets:        {}", outcome.forecast.warmup_buckets);
            println!();

            let rows: Vec<DecisionRow> = shown
                .map(|(start, o)| DecisionRow {
                    start,
                    forecast: format!("{:.1}", o.demand_estimate),
                    actual: format!("{:.0}", o.actual_demand),
                    needed: o.needed,
                    servers: o.servers_online,
                    load: color_load(o.load_percent()),
                    action: color_action(o.action),
                })
                .collect();
            if skip > 0 {
                println!("{}", format!("Last {} of {} buckets", rows.len(), outputs.len()).dimmed());
            }
            print_rows(&rows);
            println!();
            print_summary(&outcome.summary);
        }
    }

    Ok(())
}
