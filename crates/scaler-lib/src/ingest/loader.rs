//! Log file loading with parallel parsing
//!
//! Lines are split into contiguous chunks and parsed on blocking workers.
//! Chunk results are joined back in chunk order, and aggregation groups by
//! bucket index, so the outcome does not depend on worker scheduling.

use super::parser::{parse_lines, IngestReport};
use crate::models::LogRecord;
use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Below this many lines a single worker is used
const MIN_LINES_PER_WORKER: usize = 10_000;

/// Records and parse statistics for one or more log sources
#[derive(Debug, Clone, Default)]
pub struct LoadedLog {
    pub records: Vec<LogRecord>,
    pub report: IngestReport,
}

impl LoadedLog {
    /// Append a later source
    pub fn extend(&mut self, later: LoadedLog) {
        self.records.extend(later.records);
        self.report.merge(&later.report);
    }
}

/// Parse already-read log text using up to `workers` blocking tasks
pub async fn parse_text(text: String, workers: usize) -> Result<LoadedLog> {
    let lines: Vec<String> = text.lines().map(str::to_owned).collect();
    let total = lines.len();
    let workers = workers.max(1).min(total.div_ceil(MIN_LINES_PER_WORKER).max(1));
    let chunk_size = total.div_ceil(workers).max(1);

    let mut handles: Vec<JoinHandle<(Vec<LogRecord>, IngestReport)>> = Vec::with_capacity(workers);
    let mut remaining = lines.into_iter();
    loop {
        let chunk: Vec<String> = remaining.by_ref().take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }
        // chunk-relative line numbers; merging in order makes them absolute
        handles.push(tokio::task::spawn_blocking(move || parse_lines(chunk)));
    }

    debug!(lines = total, chunks = handles.len(), "Parsing log text");

    let mut loaded = LoadedLog::default();
    for handle in handles {
        let (records, report) = handle.await.context("Parse worker panicked")?;
        loaded.extend(LoadedLog { records, report });
    }
    Ok(loaded)
}

/// Read and parse one log file. Invalid UTF-8 is replaced rather than
/// failing the whole file.
pub async fn load_log_file(path: impl AsRef<Path>, workers: usize) -> Result<LoadedLog> {
    let path = path.as_ref();
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes).into_owned();

    let loaded = parse_text(text, workers).await?;
    info!(
        path = %path.display(),
        parsed = loaded.report.parsed,
        rejected = loaded.report.rejected,
        "Loaded access log"
    );
    Ok(loaded)
}

/// Load several files in order, e.g. a training month followed by a test month
pub async fn load_log_files<P: AsRef<Path>>(paths: &[P], workers: usize) -> Result<LoadedLog> {
    let mut loaded = LoadedLog::default();
    for path in paths {
        loaded.extend(load_log_file(path, workers).await?);
    }
    Ok(loaded)
}
