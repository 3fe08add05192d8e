//! Output formatting utilities

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use scaler_lib::ingest::{BucketSeries, IngestReport};
use scaler_lib::scaling::RunSummary;
use scaler_lib::ScaleAction;
use serde::Serialize;
use tabled::{builder::Builder, settings::Style, Table, Tabled};

/// Output format for command results
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Format of the log lines written to stderr
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_rows<T: Tabled>(rows: &[T]) {
    if rows.is_empty() {
        println!("{}", "No buckets".yellow());
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()));
}

/// Bucket table with one `status_<class>` column per observed class
pub fn bucket_table(series: &BucketSeries) -> String {
    let classes = series.status_classes();

    let mut builder = Builder::default();
    let mut header = vec!["start".to_string(), "requests".to_string(), "bytes".to_string()];
    header.extend(classes.iter().map(|c| c.column_name()));
    builder.push_record(header);

    for bucket in series.buckets() {
        let mut record = vec![
            bucket.start.to_rfc3339(),
            bucket.requests.to_string(),
            format_bytes(bucket.bytes),
        ];
        record.extend(classes.iter().map(|c| bucket.status_count(*c).to_string()));
        builder.push_record(record);
    }

    builder.build().with(Style::rounded()).to_string()
}

pub fn print_ingest_report(report: &IngestReport) {
    println!("{}", "Ingest".bold());
    println!("{}", "-".repeat(40));
    println!("Lines:                  {}", report.total_lines);
    println!("Parsed:                 {}", report.parsed);
    let rejected = if report.rejected == 0 {
        report.rejected.to_string().green()
    } else {
        report.rejected.to_string().yellow()
    };
    println!("Rejected:               {}", rejected);
    println!("Blank:                  {}", report.blank);
    if let Some(line) = report.first_rejected_line {
        println!("First rejected line:    {}", line);
    }
    println!();
}

pub fn print_summary(summary: &RunSummary) {
    println!("{}", "Run Summary".bold());
    println!("{}", "=".repeat(40));
    println!("Buckets:                {}", summary.total_buckets);
    println!("Peak servers:           {}", summary.peak_servers);
    println!("Server-buckets:         {}", summary.server_buckets);
    println!("Estimated cost:         {}", format_currency(summary.estimated_cost));
    println!("Flaps:                  {}", summary.flap_count);
    println!("Total server delta:     {}", summary.total_server_delta);
    println!("Overloads:              {}", summary.overload_count);

    let uptime = format!("{:.2}%", summary.uptime_percent);
    if summary.sla_met {
        println!("{} {}", "Uptime (SLA):".bold(), uptime.green().bold());
    } else {
        println!("{} {} {}", "Uptime (SLA):".bold(), uptime.red().bold(), "below 99.9%".red());
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}Gi", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}Mi", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}Ki", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

pub fn format_currency(amount: f64) -> String {
    format!("${:.2}", amount)
}

pub fn color_action(action: ScaleAction) -> String {
    let text = action.to_string();
    match action {
        ScaleAction::ScaleUp => text.green().to_string(),
        ScaleAction::ScaleDown => text.blue().to_string(),
        ScaleAction::CooldownBlocked => text.yellow().to_string(),
        ScaleAction::Hold => text.dimmed().to_string(),
    }
}

/// Color a load percentage by how close it is to capacity
pub fn color_load(load_percent: f64) -> String {
    let formatted = format!("{:.0}%", load_percent);
    if load_percent > 100.0 {
        formatted.red().bold().to_string()
    } else if load_percent >= 80.0 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}
