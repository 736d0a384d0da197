//! Metric definitions and latency summaries
//!
//! Every successful operation produces named, unit-tagged observations
//! (`time-to-provide-{i}`, `time-to-find-{i}`, `peers-found-{i}`). Summaries
//! fold those per-item records into HDR histograms per operation kind.

use std::collections::BTreeMap;
use std::fmt;

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

use crate::constants::{HIST_MAX_LATENCY_US, HIST_SIGFIGS, UNIT_NANOSECONDS, UNIT_PEERS};

/// Metric kind prefixes (the item index is appended)
pub const TIME_TO_PROVIDE: &str = "time-to-provide";
pub const TIME_TO_FIND: &str = "time-to-find";
pub const PEERS_FOUND: &str = "peers-found";

/// Whether smaller or larger values are an improvement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum ImprovementDir {
    LowerIsBetter,
    HigherIsBetter,
}

impl ImprovementDir {
    pub fn as_i8(&self) -> i8 {
        match self {
            ImprovementDir::LowerIsBetter => -1,
            ImprovementDir::HigherIsBetter => 1,
        }
    }
}

impl From<ImprovementDir> for i8 {
    fn from(dir: ImprovementDir) -> i8 {
        dir.as_i8()
    }
}

impl TryFrom<i8> for ImprovementDir {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(ImprovementDir::LowerIsBetter),
            1 => Ok(ImprovementDir::HigherIsBetter),
            other => Err(format!("improvement direction must be -1 or 1, got {}", other)),
        }
    }
}

impl fmt::Display for ImprovementDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i8())
    }
}

/// Name, unit and direction of an observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub unit: String,
    pub improvement_dir: ImprovementDir,
}

impl MetricDefinition {
    pub fn new(name: impl Into<String>, unit: impl Into<String>, improvement_dir: ImprovementDir) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            improvement_dir,
        }
    }

    pub fn time_to_provide(index: usize) -> Self {
        Self::new(
            format!("{}-{}", TIME_TO_PROVIDE, index),
            UNIT_NANOSECONDS,
            ImprovementDir::LowerIsBetter,
        )
    }

    pub fn time_to_find(index: usize) -> Self {
        Self::new(
            format!("{}-{}", TIME_TO_FIND, index),
            UNIT_NANOSECONDS,
            ImprovementDir::LowerIsBetter,
        )
    }

    pub fn peers_found(index: usize) -> Self {
        Self::new(
            format!("{}-{}", PEERS_FOUND, index),
            UNIT_PEERS,
            ImprovementDir::HigherIsBetter,
        )
    }
}

/// One recorded observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub name: String,
    pub unit: String,
    pub improvement_dir: ImprovementDir,
    pub value: f64,
}

impl MetricRecord {
    pub fn new(def: &MetricDefinition, value: f64) -> Self {
        Self {
            name: def.name.clone(),
            unit: def.unit.clone(),
            improvement_dir: def.improvement_dir,
            value,
        }
    }

    /// Metric kind with the trailing `-{index}` removed
    pub fn kind(&self) -> &str {
        split_kind(&self.name).0
    }

    /// Item index encoded in the name, if any
    pub fn item_index(&self) -> Option<usize> {
        split_kind(&self.name).1
    }
}

fn split_kind(name: &str) -> (&str, Option<usize>) {
    match name.rsplit_once('-') {
        Some((kind, idx)) => match idx.parse::<usize>() {
            Ok(i) => (kind, Some(i)),
            Err(_) => (name, None),
        },
        None => (name, None),
    }
}

fn new_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(1, HIST_MAX_LATENCY_US, HIST_SIGFIGS)
        .expect("histogram bounds are static and valid")
}

/// Statistics for one metric kind
#[derive(Debug, Clone, PartialEq)]
pub struct KindStats {
    pub kind: String,
    pub unit: String,
    pub count: u64,
    pub mean: f64,
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    pub max: u64,
}

/// Per-kind histograms built from metric records
///
/// Latencies are stored in microseconds, counts as-is.
#[derive(Debug, Clone, Default)]
pub struct LatencySummary {
    hists: BTreeMap<String, (String, Histogram<u64>)>,
}

impl LatencySummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a MetricRecord>) -> Self {
        let mut summary = Self::new();
        for record in records {
            summary.record(record);
        }
        summary
    }

    pub fn record(&mut self, record: &MetricRecord) {
        let (unit, value) = if record.unit == UNIT_NANOSECONDS {
            ("us".to_string(), (record.value / 1_000.0).round() as u64)
        } else {
            (record.unit.clone(), record.value.round() as u64)
        };
        let entry = self
            .hists
            .entry(record.kind().to_string())
            .or_insert_with(|| (unit, new_histogram()));
        // Values past the upper bound are clamped rather than dropped
        entry.1.saturating_record(value);
    }

    /// Merge another summary into this one (for combining workers)
    pub fn merge(&mut self, other: &LatencySummary) {
        for (kind, (unit, hist)) in &other.hists {
            let entry = self
                .hists
                .entry(kind.clone())
                .or_insert_with(|| (unit.clone(), new_histogram()));
            entry.1.add(hist).ok();
        }
    }

    pub fn count(&self, kind: &str) -> u64 {
        self.hists.get(kind).map(|(_, h)| h.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> Vec<KindStats> {
        self.hists
            .iter()
            .filter(|(_, (_, h))| !h.is_empty())
            .map(|(kind, (unit, h))| KindStats {
                kind: kind.clone(),
                unit: unit.clone(),
                count: h.len(),
                mean: h.mean(),
                p50: h.value_at_quantile(0.50),
                p90: h.value_at_quantile(0.90),
                p95: h.value_at_quantile(0.95),
                p99: h.value_at_quantile(0.99),
                max: h.max(),
            })
            .collect()
    }

    /// Print one line per metric kind
    pub fn print_summary(&self, title: &str) {
        println!("\n{}:", title);
        let stats = self.stats();
        if stats.is_empty() {
            println!("  (no successful operations)");
            return;
        }
        for s in stats {
            println!(
                "  [{:>15}] count={:<8} mean={:<10.1} p50={:<8} p95={:<8} p99={:<8} max={:<8} ({})",
                s.kind, s.count, s.mean, s.p50, s.p95, s.p99, s.max, s.unit
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definitions() {
        let d = MetricDefinition::time_to_provide(3);
        assert_eq!(d.name, "time-to-provide-3");
        assert_eq!(d.unit, "ns");
        assert_eq!(d.improvement_dir.as_i8(), -1);

        let d = MetricDefinition::time_to_find(0);
        assert_eq!(d.name, "time-to-find-0");
        assert_eq!(d.improvement_dir, ImprovementDir::LowerIsBetter);

        let d = MetricDefinition::peers_found(12);
        assert_eq!(d.name, "peers-found-12");
        assert_eq!(d.unit, "peers");
        assert_eq!(d.improvement_dir.as_i8(), 1);
    }

    #[test]
    fn test_record_kind_and_index() {
        let r = MetricRecord::new(&MetricDefinition::peers_found(7), 2.0);
        assert_eq!(r.kind(), "peers-found");
        assert_eq!(r.item_index(), Some(7));

        let r = MetricRecord::new(
            &MetricDefinition::new("wall-clock", "ns", ImprovementDir::LowerIsBetter),
            1.0,
        );
        assert_eq!(r.kind(), "wall-clock");
        assert_eq!(r.item_index(), None);
    }

    #[test]
    fn test_improvement_dir_serde() {
        let json = serde_json::to_string(&ImprovementDir::HigherIsBetter).unwrap();
        assert_eq!(json, "1");
        let back: ImprovementDir = serde_json::from_str("-1").unwrap();
        assert_eq!(back, ImprovementDir::LowerIsBetter);
        assert!(serde_json::from_str::<ImprovementDir>("0").is_err());
    }

    #[test]
    fn test_summary_groups_by_kind() {
        let records = vec![
            MetricRecord::new(&MetricDefinition::time_to_find(0), 2_000_000.0),
            MetricRecord::new(&MetricDefinition::time_to_find(1), 4_000_000.0),
            MetricRecord::new(&MetricDefinition::peers_found(0), 2.0),
            MetricRecord::new(&MetricDefinition::peers_found(1), 3.0),
        ];
        let summary = LatencySummary::from_records(&records);
        assert_eq!(summary.count(TIME_TO_FIND), 2);
        assert_eq!(summary.count(PEERS_FOUND), 2);
        assert_eq!(summary.count(TIME_TO_PROVIDE), 0);

        let stats = summary.stats();
        let find = stats.iter().find(|s| s.kind == TIME_TO_FIND).unwrap();
        assert_eq!(find.unit, "us");
        // 4ms recorded as 4000us, 3 significant digits
        assert!(find.max >= 3_990 && find.max <= 4_010, "max={}", find.max);
    }

    #[test]
    fn test_summary_merge() {
        let a = LatencySummary::from_records(&[MetricRecord::new(
            &MetricDefinition::time_to_provide(0),
            1_000.0,
        )]);
        let b = LatencySummary::from_records(&[MetricRecord::new(
            &MetricDefinition::time_to_provide(0),
            2_000.0,
        )]);
        let mut merged = a.clone();
        merged.merge(&b);
        assert_eq!(merged.count(TIME_TO_PROVIDE), 2);
    }
}
