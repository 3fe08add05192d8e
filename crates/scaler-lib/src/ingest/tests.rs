//! Integration tests for log ingestion
//!
//! These tests write small access logs to temporary files and run them
//! through loading, parsing and aggregation.

#[cfg(test)]
mod log_file_tests {
    use crate::ingest::{load_log_file, load_log_files, parse_lines, parse_text, BucketAggregator};
    use crate::models::StatusClass;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Ten well-formed lines spread over three 5-minute buckets
    fn well_formed_lines() -> Vec<String> {
        let entries = [
            ("00:00:01", 200, "6245"),
            ("00:00:06", 200, "3985"),
            ("00:01:10", 304, "-"),
            ("00:02:00", 404, "-"),
            ("00:04:59", 200, "4085"),
            ("00:05:00", 200, "7074"),
            ("00:07:12", 500, "0"),
            ("00:09:30", 200, "1713"),
            ("00:12:01", 302, "-"),
            ("00:14:59", 200, "12040"),
        ];
        entries
            .iter()
            .enumerate()
            .map(|(i, (time, status, bytes))| {
                format!(
                    r#"host{}.nasa.gov - - [23/Aug/1995:{} -0400] "GET /shuttle/countdown/ HTTP/1.0" {} {}"#,
                    i, time, status, bytes
                )
            })
            .collect()
    }

    fn write_log(lines: &[String]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_malformed_line_is_dropped_and_counted() {
        let clean = well_formed_lines();
        let mut dirty = clean.clone();
        dirty.insert(4, "this line is not an access log entry".to_string());

        let (clean_records, clean_report) = parse_lines(&clean);
        let (dirty_records, dirty_report) = parse_lines(&dirty);

        assert_eq!(clean_report.rejected, 0);
        assert_eq!(dirty_report.rejected, 1);
        assert_eq!(dirty_report.parsed, 10);
        assert_eq!(dirty_report.first_rejected_line, Some(5));

        let agg = BucketAggregator::new(300).unwrap();
        assert_eq!(agg.aggregate(&dirty_records), agg.aggregate(&clean_records));
    }

    #[test]
    fn test_aggregated_table_contents() {
        let (records, _) = parse_lines(well_formed_lines());
        let series = BucketAggregator::new(300).unwrap().aggregate(&records);

        assert_eq!(series.len(), 3);
        let requests: Vec<u64> = series.buckets().iter().map(|b| b.requests).collect();
        assert_eq!(requests, vec![5, 3, 2]);
        assert_eq!(series.buckets()[0].bytes, 6245 + 3985 + 4085);
        assert_eq!(series.buckets()[1].status_count(StatusClass::SERVER_ERROR), 1);
        let classes: Vec<String> = series.status_classes().iter().map(|c| c.to_string()).collect();
        assert_eq!(classes, vec!["2xx", "3xx", "4xx", "5xx"]);
    }

    #[tokio::test]
    async fn test_load_log_file() {
        let mut lines = well_formed_lines();
        lines.push("broken".to_string());
        let file = write_log(&lines);

        let loaded = load_log_file(file.path(), 4).await.unwrap();
        assert_eq!(loaded.records.len(), 10);
        assert_eq!(loaded.report.rejected, 1);
        assert_eq!(loaded.report.first_rejected_line, Some(11));
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let result = load_log_file("/nonexistent/access.log", 1).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_load_tolerates_invalid_utf8() {
        let mut file = NamedTempFile::new().unwrap();
        for line in well_formed_lines() {
            writeln!(file, "{}", line).unwrap();
        }
        file.write_all(b"\xff\xfe garbage\n").unwrap();
        file.flush().unwrap();

        let loaded = load_log_file(file.path(), 2).await.unwrap();
        assert_eq!(loaded.report.parsed, 10);
        assert_eq!(loaded.report.rejected, 1);
    }

    #[tokio::test]
    async fn test_parallel_parse_matches_sequential() {
        // enough lines to spread across several workers
        let base = well_formed_lines();
        let mut lines = Vec::new();
        for i in 0..3_000 {
            lines.extend(base.iter().cloned());
            if i % 7 == 0 {
                lines.push(format!("junk {}", i));
            }
        }
        let text = lines.join("\n");

        let (seq_records, seq_report) = parse_lines(&lines);
        let parallel = parse_text(text, 8).await.unwrap();

        assert_eq!(parallel.report, seq_report);
        assert_eq!(parallel.records, seq_records);
    }

    #[tokio::test]
    async fn test_load_multiple_files_in_order() {
        let lines = well_formed_lines();
        let first = write_log(&lines[..5].to_vec());
        let second = write_log(&lines[5..].to_vec());

        let loaded = load_log_files(&[first.path(), second.path()], 2).await.unwrap();
        assert_eq!(loaded.records.len(), 10);
        assert_eq!(loaded.report.total_lines, 10);
    }

    #[tokio::test]
    async fn test_first_rejection_counts_lines_of_earlier_files() {
        let lines = well_formed_lines();
        let first = write_log(&lines);
        let mut later = lines[..3].to_vec();
        later.push("not an access log line".to_string());
        let second = write_log(&later);

        let loaded = load_log_files(&[first.path(), second.path()], 1).await.unwrap();
        assert_eq!(loaded.report.rejected, 1);
        assert_eq!(loaded.report.first_rejected_line, Some(14));

        // same numbering as parsing the concatenated lines in one pass
        let (_, joined) = parse_lines(lines.iter().chain(later.iter()));
        assert_eq!(loaded.report.first_rejected_line, joined.first_rejected_line);
    }

    #[tokio::test]
    async fn test_first_rejection_in_a_later_chunk() {
        let base = well_formed_lines();
        let mut lines: Vec<String> = (0..3_000).flat_map(|_| base.iter().cloned()).collect();
        lines.push("junk".to_string());
        let text = lines.join("\n");

        let parallel = parse_text(text, 4).await.unwrap();
        assert_eq!(parallel.report.first_rejected_line, Some(30_001));
    }
}
