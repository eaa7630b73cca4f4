//! Statistics aggregation
//!
//! Turns raw timing samples and classified error records into the flat
//! metric map printed at the end of a benchmark. Everything here is a pure
//! function of its inputs, so a report can be rebuilt any number of times.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::REPORT_FLOAT_PRECISION;
use crate::errors::ErrorRecord;

/// Suffixes of the aggregate metrics, in report order
pub const AGGREGATE_SUFFIXES: [&str; 6] = ["avg", "stddev", "med", "min", "max", "perc95"];

const MIB: f64 = (1u64 << 20) as f64;

/// One metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatValue::Int(v) => write!(f, "{}", v),
            StatValue::Float(v) => write!(f, "{:.*}", REPORT_FLOAT_PRECISION, v),
            StatValue::Text(v) => write!(f, "{}", v),
            StatValue::Null => write!(f, "None"),
        }
    }
}

impl From<i64> for StatValue {
    fn from(v: i64) -> Self {
        StatValue::Int(v)
    }
}

impl From<u64> for StatValue {
    fn from(v: u64) -> Self {
        StatValue::Int(v as i64)
    }
}

impl From<usize> for StatValue {
    fn from(v: usize) -> Self {
        StatValue::Int(v as i64)
    }
}

impl From<bool> for StatValue {
    fn from(v: bool) -> Self {
        StatValue::Int(v as i64)
    }
}

impl From<f64> for StatValue {
    fn from(v: f64) -> Self {
        StatValue::Float(v)
    }
}

impl From<&str> for StatValue {
    fn from(v: &str) -> Self {
        StatValue::Text(v.to_string())
    }
}

impl From<String> for StatValue {
    fn from(v: String) -> Self {
        StatValue::Text(v)
    }
}

impl<T: Into<StatValue>> From<Option<T>> for StatValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(StatValue::Null)
    }
}

/// Flat metric name -> value map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatsReport {
    metrics: BTreeMap<String, StatValue>,
}

impl StatsReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<StatValue>) {
        self.metrics.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&StatValue> {
        self.metrics.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.metrics.get(key)? {
            StatValue::Int(v) => Some(*v as f64),
            StatValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.metrics.get(key)? {
            StatValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.metrics.contains_key(key)
    }

    pub fn extend(&mut self, other: StatsReport) {
        self.metrics.extend(other.metrics);
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StatValue)> {
        self.metrics.iter()
    }

    /// `key<TAB><TAB>value` lines, floats at fixed precision.
    pub fn to_tsv(&self) -> String {
        self.metrics
            .iter()
            .map(|(k, v)| format!("{}\t\t{}\n", k, v))
            .collect()
    }
}

/// Aggregates over one sample list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub count: usize,
    pub avg: f64,
    pub stddev: f64,
    pub med: f64,
    pub min: f64,
    pub max: f64,
    pub perc95: f64,
}

impl Aggregate {
    fn values(&self) -> [f64; 6] {
        [self.avg, self.stddev, self.med, self.min, self.max, self.perc95]
    }
}

/// Compute the aggregates of `values`, `None` when empty.
///
/// A single sample is treated as two identical samples, so its standard
/// deviation is 0 instead of undefined.
pub fn summarize(values: &[f64]) -> Option<Aggregate> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    if sorted.len() == 1 {
        sorted.push(sorted[0]);
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let avg = sorted.iter().sum::<f64>() / n as f64;
    let var = sorted.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (n - 1) as f64;
    let med = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    };

    Some(Aggregate {
        count: values.len(),
        avg,
        stddev: var.sqrt(),
        med,
        min: sorted[0],
        max: sorted[n - 1],
        perc95: nearest_rank(&sorted, 0.95),
    })
}

/// Nearest-rank percentile of an ascending slice: the value at 1-indexed
/// rank `ceil(q * n)`.
fn nearest_rank(sorted: &[f64], q: f64) -> f64 {
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// 95th percentile (nearest rank) of unsorted samples, `None` when empty.
pub fn percentile95(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some(nearest_rank(&sorted, 0.95))
}

/// Aggregate metrics for `values` keyed `<name>_<suffix>` (or bare
/// `<suffix>` without a name).
///
/// `decimals`: `None` keeps raw floats, `Some(0)` truncates to integers,
/// `Some(d)` rounds to `d` places.
pub fn make_aggr(values: &[f64], name: Option<&str>, decimals: Option<u32>) -> StatsReport {
    let mut report = StatsReport::new();
    let Some(aggr) = summarize(values) else {
        return report;
    };
    for (suffix, value) in AGGREGATE_SUFFIXES.iter().zip(aggr.values()) {
        let key = match name {
            Some(n) => format!("{}_{}", n, suffix),
            None => suffix.to_string(),
        };
        let value = match decimals {
            None => StatValue::Float(value),
            Some(0) => StatValue::Int(value.trunc() as i64),
            Some(d) => {
                let factor = 10f64.powi(d as i32);
                StatValue::Float((value * factor).round() / factor)
            }
        };
        report.insert(key, value);
    }
    report
}

/// `errors` total plus one `error_count_<class>` per class seen in the run.
///
/// Every observed class is seeded at zero before counting, so a class
/// always reads as a number, never as missing, once it occurred anywhere in
/// the records.
pub fn error_counts(records: &[ErrorRecord]) -> StatsReport {
    let mut report = StatsReport::new();
    report.insert("errors", records.len());

    let classes: BTreeSet<String> = records.iter().map(|r| r.class_key()).collect();
    let mut counts: BTreeMap<String, u64> = classes.into_iter().map(|c| (c, 0)).collect();
    for record in records {
        if let Some(c) = counts.get_mut(&record.class_key()) {
            *c += 1;
        }
    }
    for (class, count) in counts {
        report.insert(format!("error_count_{}", class), count);
    }
    report
}

/// Bandwidth (MiB/s) and rate (ops/s) over the summed sample time, 0 when
/// no time was spent.
pub fn throughput(ops: usize, total_size: u64, test_time: f64) -> (f64, f64) {
    if test_time > 0.0 {
        (total_size as f64 / test_time / MIB, ops as f64 / test_time)
    } else {
        (0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_five_samples() {
        let a = summarize(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(a.count, 5);
        assert_eq!(a.avg, 3.0);
        assert_eq!(a.med, 3.0);
        assert_eq!(a.min, 1.0);
        assert_eq!(a.max, 5.0);
        assert!(approx(a.stddev, 1.5811), "stddev={}", a.stddev);
    }

    #[test]
    fn test_singleton_stddev_is_zero() {
        for x in [0.0, 1.5, 42.0, -3.0] {
            let a = summarize(&[x]).unwrap();
            assert_eq!(a.stddev, 0.0);
            assert_eq!(a.avg, x);
            assert_eq!(a.med, x);
            assert_eq!(a.perc95, x);
            assert_eq!(a.count, 1);
        }
    }

    #[test]
    fn test_perc95_nearest_rank() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        assert_eq!(percentile95(&values), Some(95.0));
        let mut reversed = values.clone();
        reversed.reverse();
        assert_eq!(summarize(&reversed).unwrap().perc95, 95.0);

        // n=10 -> rank ceil(9.5) = 10
        let ten: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        assert_eq!(percentile95(&ten), Some(10.0));
        assert_eq!(percentile95(&[]), None);
    }

    #[test]
    fn test_even_median() {
        assert_eq!(summarize(&[4.0, 1.0, 3.0, 2.0]).unwrap().med, 2.5);
    }

    #[test]
    fn test_make_aggr_keys() {
        let named = make_aggr(&[1.0, 2.0], Some("time"), None);
        for suffix in AGGREGATE_SUFFIXES {
            assert!(named.contains_key(&format!("time_{}", suffix)));
        }
        assert_eq!(named.len(), 6);

        let bare = make_aggr(&[1.0, 2.0], None, None);
        assert!(bare.contains_key("avg"));
        assert!(bare.contains_key("perc95"));

        assert!(make_aggr(&[], Some("time"), None).is_empty());
    }

    #[test]
    fn test_make_aggr_decimals() {
        let r = make_aggr(&[1.23456, 2.34567], Some("bw"), Some(3));
        assert_eq!(r.get("bw_min"), Some(&StatValue::Float(1.235)));
        let r = make_aggr(&[1.9, 2.9], Some("bw"), Some(0));
        assert_eq!(r.get("bw_max"), Some(&StatValue::Int(2)));
    }

    #[test]
    fn test_error_classes_do_not_mask_each_other() {
        let mut records = vec![ErrorRecord::new(ErrorKind::Connection, None, "a"); 3];
        records.push(ErrorRecord::new(ErrorKind::InvalidHttpCode, Some(404), "b"));

        let report = error_counts(&records);
        assert_eq!(report.get_i64("errors"), Some(4));
        assert_eq!(report.get_i64("error_count_connection"), Some(3));
        assert_eq!(report.get_i64("error_count_404"), Some(1));
    }

    #[test]
    fn test_no_errors_reports_zero_total_only() {
        let report = error_counts(&[]);
        assert_eq!(report.get_i64("errors"), Some(0));
        assert_eq!(report.len(), 1);
    }

    #[test]
    fn test_throughput() {
        let (bw, rate) = throughput(4, 4 << 20, 2.0);
        assert_eq!(bw, 2.0);
        assert_eq!(rate, 2.0);
        assert_eq!(throughput(0, 0, 0.0), (0.0, 0.0));
    }

    #[test]
    fn test_tsv_fixed_precision() {
        let mut r = StatsReport::new();
        r.insert("bw", 1.5f64);
        r.insert("ops", 3usize);
        r.insert("operation", "upload");
        r.insert("bucket_prefix", None::<String>);
        let tsv = r.to_tsv();
        assert!(tsv.contains("bw\t\t1.500000\n"));
        assert!(tsv.contains("ops\t\t3\n"));
        assert!(tsv.contains("operation\t\tupload\n"));
        assert!(tsv.contains("bucket_prefix\t\tNone\n"));
    }
}
