//! Access log ingestion
//!
//! This module turns raw access-log text into a gap-filled bucket series:
//! line parsing with rejection accounting, parallel file loading, and
//! fixed-width aggregation with re-bucketing.

mod aggregator;
mod loader;
mod parser;

#[cfg(test)]
mod tests;

pub use aggregator::{AggregationConfig, BucketAggregator, BucketSeries, DEFAULT_BUCKET_WIDTH_SECS};
pub use loader::{load_log_file, load_log_files, parse_text, LoadedLog};
pub use parser::{parse_line, parse_lines, IngestReport};
