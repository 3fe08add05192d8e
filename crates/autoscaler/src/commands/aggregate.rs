//! `aggregate`: bucket table for one or more log files

use anyhow::Result;
use colored::Colorize;
use scaler_lib::ingest::{load_log_files, BucketAggregator, BucketSeries, IngestReport};
use scaler_lib::ScalerMetrics;
use serde::Serialize;
use std::path::PathBuf;

use crate::output::{bucket_table, print_ingest_report, print_json, OutputFormat};

#[derive(Serialize)]
struct AggregateOutput<'a> {
    ingest: &'a IngestReport,
    width_secs: i64,
    total_requests: u64,
    total_bytes: u64,
    series: &'a BucketSeries,
}

pub async fn run(
    logs: &[PathBuf],
    workers: usize,
    width_secs: i64,
    rebucket_secs: Option<i64>,
    metrics: Option<&ScalerMetrics>,
    format: OutputFormat,
) -> Result<()> {
    let loaded = load_log_files(logs, workers).await?;
    let mut series = BucketAggregator::new(width_secs)?.aggregate(&loaded.records);
    if let Some(m) = metrics {
        m.record_ingest(&loaded.report);
        m.add_buckets(series.len() as u64);
    }
    if let Some(target) = rebucket_secs {
        series = series.rebucket(target)?;
    }

    match format {
        OutputFormat::Json => print_json(&AggregateOutput {
            ingest: &loaded.report,
            width_secs: series.width_secs(),
            total_requests: series.total_requests(),
            total_bytes: series.total_bytes(),
            series: &series,
        })?,
        OutputFormat::Table => {
            print_ingest_report(&loaded.report);
            if series.is_empty() {
                println!("{}", "No data: no line parsed into a record".yellow());
            } else {
                println!(
                    "{} ({} buckets of {}s)",
                    "Buckets".bold(),
                    series.len(),
                    series.width_secs()
                );
                println!("{}", bucket_table(&series));
            }
        }
    }

    Ok(())
}
