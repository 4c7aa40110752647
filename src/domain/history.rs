// History query and result domain models
use super::range::{Resolution, TimeRange};
use super::telemetry::{Field, TimeSeriesPoint};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Value of a grid slot or bucket with no data. Distinct from a real zero.
pub const GAP_SENTINEL: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownsamplingStrategy {
    #[serde(rename = "minmax")]
    MinMax,
    Adaptive,
    #[default]
    TransitionPreserving,
}

impl DownsamplingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownsamplingStrategy::MinMax => "minmax",
            DownsamplingStrategy::Adaptive => "adaptive",
            DownsamplingStrategy::TransitionPreserving => "transition-preserving",
        }
    }
}

/// One chart request. Built per request and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub sensor_id: String,
    pub field: Field,
    pub range: TimeRange,
    /// `Auto` lets the planner pick from its table.
    pub resolution: Resolution,
    /// Optional cap on the per-plan point budget.
    pub max_points: Option<usize>,
    pub strategy: DownsamplingStrategy,
    pub timeout_ms: u64,
}

impl HistoryQuery {
    pub fn new(sensor_id: impl Into<String>, field: Field, range: TimeRange, timeout_ms: u64) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            field,
            range,
            resolution: Resolution::Auto,
            max_points: None,
            strategy: DownsamplingStrategy::default(),
            timeout_ms,
        }
    }

    pub fn with_strategy(mut self, strategy: DownsamplingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }
}

/// A bounded sub-query. Carries the budgets for both real tiers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpec {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub resolution: Resolution,
    pub max_points: usize,
    pub degraded_resolution: Resolution,
    pub degraded_max_points: usize,
}

/// Which tier produced a result. Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Cache,
    Live,
    Degraded,
    Synthetic,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Cache => "cache",
            Provenance::Live => "live",
            Provenance::Degraded => "degraded",
            Provenance::Synthetic => "synthetic",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesResult {
    pub points: Vec<TimeSeriesPoint>,
    pub provenance: Provenance,
    /// Caveat shown next to the chart when the result is not the full picture.
    pub message: Option<String>,
}

impl SeriesResult {
    pub fn is_synthetic(&self) -> bool {
        self.provenance == Provenance::Synthetic
    }
}

/// Points on a fixed `[start, end]` grid. Empty slots hold [`GAP_SENTINEL`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GapFilledSeries {
    pub start_ms: i64,
    pub end_ms: i64,
    pub interval_ms: i64,
    pub points: Vec<TimeSeriesPoint>,
}

/// Calendar day, optionally narrowed to an hour slot starting at `slot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    pub date: NaiveDate,
    pub slot: Option<u32>,
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot {
            Some(hour) => write!(f, "{} {:02}:00", self.date.format("%Y-%m-%d"), hour),
            None => write!(f, "{}", self.date.format("%Y-%m-%d")),
        }
    }
}

impl Serialize for BucketKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregatedBucket {
    #[serde(rename = "bucket")]
    pub key: BucketKey,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_provenance_wins() {
        let tiers = [Provenance::Live, Provenance::Synthetic, Provenance::Degraded];
        assert_eq!(tiers.iter().max(), Some(&Provenance::Synthetic));
        assert!(Provenance::Cache < Provenance::Live);
    }

    #[test]
    fn test_bucket_key_display() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(BucketKey { date, slot: None }.to_string(), "2024-05-01");
        assert_eq!(BucketKey { date, slot: Some(6) }.to_string(), "2024-05-01 06:00");
    }
}
