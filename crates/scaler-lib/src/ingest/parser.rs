//! Access log line parsing
//!
//! Accepts the NCSA common log format
//! (`host ident authuser [timestamp] "method path protocol" status bytes`).
//! Anything after the bytes field, such as the referer and user-agent of the
//! combined format, is ignored.

use crate::error::ParseError;
use crate::models::{LogRecord, LOG_TIMESTAMP_FORMAT};
use chrono::DateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const LOG_PATTERN: &str = concat!(
    r#"^(?P<host>\S+) \S+ \S+ "#,
    r#"\[(?P<time>[^\]]+)\] "#,
    r#""(?P<method>\S+) (?P<path>\S+) (?P<protocol>[^"]+)" "#,
    r#"(?P<status>\d{3}) (?P<bytes>\S+)"#,
);

static LOG_REGEX: OnceLock<Regex> = OnceLock::new();

fn log_regex() -> &'static Regex {
    LOG_REGEX.get_or_init(|| Regex::new(LOG_PATTERN).expect("access log pattern is valid"))
}

/// Parse one raw log line into a record
pub fn parse_line(line: &str) -> Result<LogRecord, ParseError> {
    let caps = log_regex().captures(line).ok_or(ParseError::Malformed)?;

    let time = &caps["time"];
    let timestamp = DateTime::parse_from_str(time, LOG_TIMESTAMP_FORMAT)
        .map_err(|_| ParseError::Timestamp(time.to_string()))?;

    // \d{3} guarantees the parse succeeds
    let status: u16 = caps["status"].parse().map_err(|_| ParseError::Malformed)?;
    if !(100..=599).contains(&status) {
        return Err(ParseError::StatusOutOfRange(status));
    }

    Ok(LogRecord {
        host: caps["host"].to_string(),
        timestamp,
        method: caps["method"].to_string(),
        path: caps["path"].to_string(),
        protocol: caps["protocol"].to_string(),
        status,
        bytes: parse_bytes(&caps["bytes"]),
    })
}

/// `-` and any other non-numeric size count as zero bytes
fn parse_bytes(raw: &str) -> u64 {
    if raw.bytes().all(|b| b.is_ascii_digit()) {
        raw.parse().unwrap_or(0)
    } else {
        0
    }
}

/// Outcome counts for a batch of lines
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub total_lines: u64,
    pub parsed: u64,
    pub rejected: u64,
    pub blank: u64,
    pub malformed: u64,
    pub bad_timestamp: u64,
    pub bad_status: u64,
    /// 1-based line number of the first rejected line, counted across every
    /// batch merged into this report
    pub first_rejected_line: Option<u64>,
}

impl IngestReport {
    fn record_rejection(&mut self, line_number: u64, err: &ParseError) {
        self.rejected += 1;
        match err {
            ParseError::Malformed => self.malformed += 1,
            ParseError::Timestamp(_) => self.bad_timestamp += 1,
            ParseError::StatusOutOfRange(_) => self.bad_status += 1,
        }
        if self.first_rejected_line.is_none() {
            self.first_rejected_line = Some(line_number);
        }
    }

    /// Fold a report for lines that came after this one. The later report's
    /// line numbers are shifted past the lines already counted here.
    pub fn merge(&mut self, later: &IngestReport) {
        if self.first_rejected_line.is_none() {
            self.first_rejected_line = later.first_rejected_line.map(|n| n + self.total_lines);
        }
        self.total_lines += later.total_lines;
        self.parsed += later.parsed;
        self.rejected += later.rejected;
        self.blank += later.blank;
        self.malformed += later.malformed;
        self.bad_timestamp += later.bad_timestamp;
        self.bad_status += later.bad_status;
    }

    /// Fraction of non-blank lines that were rejected
    pub fn rejection_ratio(&self) -> f64 {
        let considered = self.parsed + self.rejected;
        if considered == 0 {
            return 0.0;
        }
        self.rejected as f64 / considered as f64
    }
}

/// Parse a batch of lines, dropping rejected ones and counting them
pub fn parse_lines<I, S>(lines: I) -> (Vec<LogRecord>, IngestReport)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut records = Vec::new();
    let mut report = IngestReport::default();

    for (i, line) in lines.into_iter().enumerate() {
        let line = line.as_ref();
        report.total_lines += 1;

        if line.trim().is_empty() {
            report.blank += 1;
            continue;
        }

        match parse_line(line) {
            Ok(record) => {
                report.parsed += 1;
                records.push(record);
            }
            Err(e) => report.record_rejection(i as u64 + 1, &e),
        }
    }

    (records, report)
}
