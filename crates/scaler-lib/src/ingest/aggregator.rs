//! Fixed-width time bucket aggregation
//!
//! Folds parsed records into a contiguous, gap-filled sequence of buckets.
//! Bucket boundaries are aligned to the epoch in the series' local
//! wall-clock time, so a 5-minute bucket always starts at :00, :05, ...

use crate::error::{ConfigError, ConfigResult};
use crate::models::{LogRecord, StatusClass, TimeBucket};
use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Default bucket width (5 minutes)
pub const DEFAULT_BUCKET_WIDTH_SECS: i64 = 5 * 60;

/// Configuration for the aggregation stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_bucket_width")]
    pub bucket_width_secs: i64,
}

fn default_bucket_width() -> i64 {
    DEFAULT_BUCKET_WIDTH_SECS
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            bucket_width_secs: DEFAULT_BUCKET_WIDTH_SECS,
        }
    }
}

/// Running sums for one bucket index
#[derive(Debug, Default, Clone)]
struct Accumulator {
    requests: u64,
    bytes: u64,
    status_counts: BTreeMap<StatusClass, u64>,
}

impl Accumulator {
    fn add_record(&mut self, record: &LogRecord) {
        self.requests += 1;
        // byte fields are unbounded digit runs; a sum pins at u64::MAX
        self.bytes = self.bytes.saturating_add(record.bytes);
        *self.status_counts.entry(record.status_class()).or_insert(0) += 1;
    }

    fn add_bucket(&mut self, bucket: &TimeBucket) {
        self.requests += bucket.requests;
        self.bytes = self.bytes.saturating_add(bucket.bytes);
        for (class, count) in &bucket.status_counts {
            *self.status_counts.entry(*class).or_insert(0) += count;
        }
    }
}

/// Serializes a UTC offset as signed seconds east of UTC
mod offset_seconds {
    use chrono::FixedOffset;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(offset: &FixedOffset, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(offset.local_minus_utc())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<FixedOffset, D::Error> {
        let secs = i32::deserialize(deserializer)?;
        FixedOffset::east_opt(secs).ok_or_else(|| D::Error::custom(format!("UTC offset {secs}s out of range")))
    }
}

/// Ordered, gap-free sequence of buckets of one width in one UTC offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSeries {
    width_secs: i64,
    #[serde(rename = "utc_offset_secs", with = "offset_seconds")]
    offset: FixedOffset,
    buckets: Vec<TimeBucket>,
}

impl BucketSeries {
    /// A series with no data at all
    pub fn empty(width_secs: i64, offset: FixedOffset) -> Self {
        Self {
            width_secs,
            offset,
            buckets: Vec::new(),
        }
    }

    pub fn width_secs(&self) -> i64 {
        self.width_secs
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn buckets(&self) -> &[TimeBucket] {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// True when no record was aggregated, as opposed to all-zero buckets
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn first_index(&self) -> Option<i64> {
        self.buckets.first().map(|b| b.index)
    }

    pub fn last_index(&self) -> Option<i64> {
        self.buckets.last().map(|b| b.index)
    }

    /// Bucket with the given absolute index, if it lies within the series
    pub fn get(&self, index: i64) -> Option<&TimeBucket> {
        let first = self.first_index()?;
        let pos = usize::try_from(index - first).ok()?;
        self.buckets.get(pos)
    }

    /// Union of status classes present in the series
    pub fn status_classes(&self) -> BTreeSet<StatusClass> {
        self.buckets
            .first()
            .map(|b| b.status_counts.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn total_requests(&self) -> u64 {
        self.buckets.iter().map(|b| b.requests).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.buckets.iter().fold(0u64, |acc, b| acc.saturating_add(b.bytes))
    }

    /// Re-aggregate into coarser buckets without touching raw records.
    ///
    /// `width_secs` must be a positive multiple of the current width.
    pub fn rebucket(&self, width_secs: i64) -> ConfigResult<BucketSeries> {
        if width_secs <= 0 {
            return Err(ConfigError::NonPositiveWidth(width_secs));
        }
        if width_secs % self.width_secs != 0 {
            return Err(ConfigError::IncompatibleWidth {
                from: self.width_secs,
                to: width_secs,
            });
        }

        let first = match self.buckets.first() {
            Some(b) => b,
            None => return Ok(BucketSeries::empty(width_secs, self.offset)),
        };

        let mut groups: BTreeMap<i64, Accumulator> = BTreeMap::new();
        for bucket in &self.buckets {
            let local_start = bucket.index * self.width_secs;
            groups
                .entry(local_start.div_euclid(width_secs))
                .or_default()
                .add_bucket(bucket);
        }

        let first_local = first.index * self.width_secs;
        let first_start = first.start - Duration::seconds(first_local.rem_euclid(width_secs));

        Ok(assemble(
            width_secs,
            self.offset,
            first_start,
            groups,
            self.status_classes(),
        ))
    }

    /// Append a later series, zero-filling any gap between the two.
    ///
    /// Used to join consecutive log files before deriving lag features so
    /// lags do not break at the file boundary.
    pub fn concat(&self, later: &BucketSeries) -> ConfigResult<BucketSeries> {
        if later.is_empty() {
            return Ok(self.clone());
        }
        if self.is_empty() {
            return Ok(later.clone());
        }
        if self.width_secs != later.width_secs {
            return Err(ConfigError::SeriesMismatch(format!(
                "bucket widths differ ({}s vs {}s)",
                self.width_secs, later.width_secs
            )));
        }
        if self.offset != later.offset {
            return Err(ConfigError::SeriesMismatch(format!(
                "UTC offsets differ ({} vs {})",
                self.offset, later.offset
            )));
        }

        let mut groups: BTreeMap<i64, Accumulator> = BTreeMap::new();
        for bucket in self.buckets.iter().chain(later.buckets.iter()) {
            groups.entry(bucket.index).or_default().add_bucket(bucket);
        }

        let mut classes = self.status_classes();
        classes.extend(later.status_classes());

        let first = if self.buckets[0].index <= later.buckets[0].index {
            &self.buckets[0]
        } else {
            &later.buckets[0]
        };

        Ok(assemble(
            self.width_secs,
            self.offset,
            first.start,
            groups,
            classes,
        ))
    }
}

/// Groups records into buckets of a fixed width
#[derive(Debug, Clone)]
pub struct BucketAggregator {
    width_secs: i64,
}

impl BucketAggregator {
    pub fn new(width_secs: i64) -> ConfigResult<Self> {
        if width_secs <= 0 {
            return Err(ConfigError::NonPositiveWidth(width_secs));
        }
        Ok(Self { width_secs })
    }

    pub fn from_config(config: &AggregationConfig) -> ConfigResult<Self> {
        Self::new(config.bucket_width_secs)
    }

    pub fn width_secs(&self) -> i64 {
        self.width_secs
    }

    /// Aggregate records into a gap-filled series.
    ///
    /// Input order does not matter: records are grouped by bucket index.
    /// The series takes the UTC offset of its earliest record.
    pub fn aggregate(&self, records: &[LogRecord]) -> BucketSeries {
        let earliest = match records
            .iter()
            .min_by_key(|r| (r.timestamp.timestamp(), r.timestamp.offset().local_minus_utc()))
        {
            Some(r) => r,
            None => return BucketSeries::empty(self.width_secs, utc()),
        };
        let offset = *earliest.timestamp.offset();

        let mut groups: BTreeMap<i64, Accumulator> = BTreeMap::new();
        let mut classes = BTreeSet::new();
        for record in records {
            let index = local_seconds(&record.timestamp, offset).div_euclid(self.width_secs);
            groups.entry(index).or_default().add_record(record);
            classes.insert(record.status_class());
        }

        let earliest_local = local_seconds(&earliest.timestamp, offset);
        let first_start = earliest.timestamp.with_timezone(&offset)
            - Duration::seconds(earliest_local.rem_euclid(self.width_secs));

        let series = assemble(self.width_secs, offset, first_start, groups, classes);
        debug!(
            records = records.len(),
            buckets = series.len(),
            width_secs = self.width_secs,
            "Aggregated records into buckets"
        );
        series
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

/// Seconds since the epoch as read on a wall clock in `offset`
fn local_seconds(ts: &DateTime<FixedOffset>, offset: FixedOffset) -> i64 {
    ts.timestamp() + offset.local_minus_utc() as i64
}

/// Build a contiguous series covering every index between the smallest and
/// largest group key, with every class present in every bucket.
fn assemble(
    width_secs: i64,
    offset: FixedOffset,
    first_start: DateTime<FixedOffset>,
    groups: BTreeMap<i64, Accumulator>,
    classes: BTreeSet<StatusClass>,
) -> BucketSeries {
    let (first, last) = match (groups.keys().next(), groups.keys().next_back()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => return BucketSeries::empty(width_secs, offset),
    };

    let zero_classes: BTreeMap<StatusClass, u64> = classes.iter().map(|c| (*c, 0)).collect();
    let mut buckets = Vec::with_capacity((last - first + 1) as usize);

    for index in first..=last {
        let start = first_start + Duration::seconds((index - first) * width_secs);
        let mut status_counts = zero_classes.clone();
        let (requests, bytes) = match groups.get(&index) {
            Some(acc) => {
                status_counts.extend(acc.status_counts.iter().map(|(c, n)| (*c, *n)));
                (acc.requests, acc.bytes)
            }
            None => (0, 0),
        };
        buckets.push(TimeBucket {
            index,
            start,
            requests,
            bytes,
            status_counts,
        });
    }

    BucketSeries {
        width_secs,
        offset,
        buckets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::parse_line;
    use chrono::{Timelike, TimeZone};
    use proptest::prelude::*;

    fn record_at(offset_hours: i32, h: u32, m: u32, s: u32, status: u16, bytes: u64) -> LogRecord {
        let offset = FixedOffset::east_opt(offset_hours * 3600).unwrap();
        LogRecord {
            host: "host".to_string(),
            timestamp: offset.with_ymd_and_hms(1995, 8, 23, h, m, s).unwrap(),
            method: "GET".to_string(),
            path: "/".to_string(),
            protocol: "HTTP/1.0".to_string(),
            status,
            bytes,
        }
    }

    #[test]
    fn test_non_positive_width_rejected() {
        assert_eq!(BucketAggregator::new(0).unwrap_err(), ConfigError::NonPositiveWidth(0));
        assert!(BucketAggregator::new(-60).is_err());
    }

    #[test]
    fn test_empty_input_is_no_data() {
        let series = BucketAggregator::new(60).unwrap().aggregate(&[]);
        assert!(series.is_empty());
        assert_eq!(series.first_index(), None);
    }

    #[test]
    fn test_huge_byte_counts_saturate() {
        let line = r#"h - - [23/Aug/1995:00:00:01 +0000] "GET / HTTP/1.0" 200 18446744073709551615"#;
        let (records, report) = crate::ingest::parse_lines([line, line]);
        assert_eq!(report.parsed, 2);

        let series = BucketAggregator::new(300).unwrap().aggregate(&records);
        assert_eq!(series.buckets()[0].requests, 2);
        assert_eq!(series.buckets()[0].bytes, u64::MAX);
        assert_eq!(series.total_bytes(), u64::MAX);

        let coarse = series.rebucket(600).unwrap();
        assert_eq!(coarse.buckets()[0].bytes, u64::MAX);
    }

    #[test]
    fn test_gap_filling() {
        let records = vec![
            record_at(-4, 0, 0, 1, 200, 100),
            record_at(-4, 0, 0, 30, 404, 0),
            record_at(-4, 0, 3, 5, 503, 50),
        ];
        let series = BucketAggregator::new(60).unwrap().aggregate(&records);

        assert_eq!(series.len(), 4);
        let counts: Vec<u64> = series.buckets().iter().map(|b| b.requests).collect();
        assert_eq!(counts, vec![2, 0, 0, 1]);
        assert!(series.buckets()[1].is_zero());
        assert_eq!(series.buckets()[1].bytes, 0);

        // every class seen anywhere is present everywhere
        for bucket in series.buckets() {
            assert_eq!(bucket.status_counts.len(), 3);
        }
        assert_eq!(series.buckets()[0].status_count(StatusClass::SUCCESS), 1);
        assert_eq!(series.buckets()[0].status_count(StatusClass::CLIENT_ERROR), 1);
        assert_eq!(series.buckets()[3].status_count(StatusClass::SERVER_ERROR), 1);
        assert_eq!(series.buckets()[2].status_count(StatusClass::SERVER_ERROR), 0);
    }

    #[test]
    fn test_bucket_starts_aligned_in_local_time() {
        let records = vec![record_at(-4, 10, 7, 42, 200, 1), record_at(-4, 10, 13, 0, 200, 1)];
        let series = BucketAggregator::new(300).unwrap().aggregate(&records);

        let first = &series.buckets()[0];
        assert_eq!((first.start.hour(), first.start.minute(), first.start.second()), (10, 5, 0));
        assert_eq!(first.start.offset().local_minus_utc(), -4 * 3600);
        let last = series.buckets().last().unwrap();
        assert_eq!((last.start.hour(), last.start.minute()), (10, 10));
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn test_mixed_offsets_use_earliest_offset() {
        // 10:00 -0400 is 14:00 UTC; 16:01 +0200 is 14:01 UTC
        let records = vec![record_at(2, 16, 1, 0, 200, 1), record_at(-4, 10, 0, 0, 200, 1)];
        let series = BucketAggregator::new(60).unwrap().aggregate(&records);
        assert_eq!(series.offset().local_minus_utc(), -4 * 3600);
        assert_eq!(series.len(), 2);
        assert_eq!(series.buckets()[1].start.hour(), 10);
        assert_eq!(series.buckets()[1].start.minute(), 1);
    }

    #[test]
    fn test_order_independent() {
        let mut records = vec![
            record_at(-4, 0, 0, 1, 200, 10),
            record_at(-4, 0, 2, 0, 500, 20),
            record_at(-4, 0, 4, 59, 302, 30),
        ];
        let agg = BucketAggregator::new(60).unwrap();
        let forward = agg.aggregate(&records);
        records.reverse();
        assert_eq!(agg.aggregate(&records), forward);
    }

    #[test]
    fn test_rebucket_matches_direct() {
        let records = vec![
            record_at(-4, 0, 0, 1, 200, 10),
            record_at(-4, 0, 4, 59, 500, 20),
            record_at(-4, 0, 5, 0, 302, 30),
            record_at(-4, 0, 17, 0, 200, 40),
        ];
        let fine = BucketAggregator::new(60).unwrap().aggregate(&records);
        let direct = BucketAggregator::new(300).unwrap().aggregate(&records);
        assert_eq!(fine.rebucket(300).unwrap(), direct);
        assert_eq!(direct.len(), 4);
        assert_eq!(direct.buckets()[0].requests, 2);
        assert_eq!(direct.buckets()[2].requests, 0);
    }

    #[test]
    fn test_rebucket_rejects_incompatible_width() {
        let records = vec![record_at(0, 0, 0, 0, 200, 1)];
        let series = BucketAggregator::new(120).unwrap().aggregate(&records);
        assert_eq!(
            series.rebucket(300),
            Err(ConfigError::IncompatibleWidth { from: 120, to: 300 })
        );
        assert_eq!(series.rebucket(0), Err(ConfigError::NonPositiveWidth(0)));
    }

    #[test]
    fn test_concat_fills_gap() {
        let agg = BucketAggregator::new(60).unwrap();
        let july = agg.aggregate(&[record_at(-4, 0, 0, 0, 200, 1)]);
        let august = agg.aggregate(&[record_at(-4, 0, 3, 0, 404, 2)]);
        let joined = july.concat(&august).unwrap();
        assert_eq!(joined.len(), 4);
        assert_eq!(joined.total_requests(), 2);
        assert_eq!(joined.buckets()[0].status_count(StatusClass::CLIENT_ERROR), 0);
        assert_eq!(joined.buckets()[3].status_count(StatusClass::CLIENT_ERROR), 1);
        // order of arguments does not matter
        assert_eq!(august.concat(&july).unwrap(), joined);
    }

    #[test]
    fn test_concat_rejects_mismatched_width() {
        let a = BucketAggregator::new(60).unwrap().aggregate(&[record_at(0, 0, 0, 0, 200, 1)]);
        let b = BucketAggregator::new(300).unwrap().aggregate(&[record_at(0, 1, 0, 0, 200, 1)]);
        assert!(matches!(a.concat(&b), Err(ConfigError::SeriesMismatch(_))));
    }

    #[test]
    fn test_get_by_index() {
        let records = vec![record_at(0, 0, 0, 0, 200, 1), record_at(0, 0, 2, 0, 200, 1)];
        let series = BucketAggregator::new(60).unwrap().aggregate(&records);
        let first = series.first_index().unwrap();
        assert_eq!(series.get(first + 1).unwrap().requests, 0);
        assert!(series.get(first - 1).is_none());
        assert!(series.get(first + 3).is_none());
    }

    #[test]
    fn test_aggregate_parsed_lines() {
        let line = r#"in24.inetnebr.com - - [01/Aug/1995:00:00:01 -0400] "GET /shuttle/missions/sts-68/news/sts-68-mcc-05.txt HTTP/1.0" 200 1839"#;
        let record = parse_line(line).unwrap();
        let series = BucketAggregator::new(300).unwrap().aggregate(&[record]);
        assert_eq!(series.len(), 1);
        assert_eq!(series.total_bytes(), 1839);
    }

    fn arb_records() -> impl Strategy<Value = Vec<LogRecord>> {
        prop::collection::vec((0u32..3 * 3600, 1u16..6, 0u64..10_000), 1..60).prop_map(|raw| {
            raw.into_iter()
                .map(|(secs, class, bytes)| {
                    record_at(-4, secs / 3600, (secs / 60) % 60, secs % 60, class * 100 + 1, bytes)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_rebucket_is_equivalent_to_direct(records in arb_records()) {
            let fine = BucketAggregator::new(60).unwrap().aggregate(&records);
            let direct = BucketAggregator::new(300).unwrap().aggregate(&records);
            prop_assert_eq!(fine.rebucket(300).unwrap(), direct);
        }

        #[test]
        fn prop_rebucket_is_associative(records in arb_records()) {
            let fine = BucketAggregator::new(60).unwrap().aggregate(&records);
            let stepwise = fine.rebucket(300).unwrap().rebucket(900).unwrap();
            prop_assert_eq!(stepwise, fine.rebucket(900).unwrap());
        }

        #[test]
        fn prop_indices_are_contiguous(records in arb_records(), width in 1i64..1800) {
            let series = BucketAggregator::new(width).unwrap().aggregate(&records);
            prop_assert!(!series.is_empty());
            for pair in series.buckets().windows(2) {
                prop_assert_eq!(pair[1].index, pair[0].index + 1);
                prop_assert_eq!((pair[1].start - pair[0].start).num_seconds(), width);
            }
            prop_assert_eq!(series.total_requests(), records.len() as u64);
        }
    }
}
