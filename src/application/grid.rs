// Fixed-interval grid fill and calendar bucket aggregation
use crate::application::error::HistoryError;
use crate::domain::history::{AggregatedBucket, BucketKey, GapFilledSeries, GAP_SENTINEL};
use crate::domain::telemetry::TimeSeriesPoint;
use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Snap points onto the grid `start, start + interval, ..., end`.
///
/// Each slot takes the first point within half an interval of it, or
/// [`GAP_SENTINEL`] when there is none.
pub fn fill_grid(
    points: &[TimeSeriesPoint],
    start_ms: i64,
    end_ms: i64,
    interval_ms: i64,
) -> Result<GapFilledSeries, HistoryError> {
    if interval_ms <= 0 {
        return Err(HistoryError::InvalidRange(format!(
            "grid interval must be positive, got {interval_ms} ms"
        )));
    }
    if end_ms < start_ms {
        return Err(HistoryError::InvalidRange(format!(
            "grid end {end_ms} is before start {start_ms}"
        )));
    }

    let points = sorted_by_time(points);
    let slots = ((end_ms - start_ms) / interval_ms) as usize + 1;
    let mut filled = Vec::with_capacity(slots);
    let mut cursor = 0;

    for n in 0..slots {
        let slot = start_ms + n as i64 * interval_ms;

        // Points more than half an interval behind this slot are behind every later slot too.
        while cursor < points.len() && 2 * (slot - points[cursor].time_ms) > interval_ms {
            cursor += 1;
        }

        let value = match points.get(cursor) {
            Some(p) if 2 * (p.time_ms - slot) <= interval_ms => p.value,
            _ => GAP_SENTINEL,
        };
        filled.push(TimeSeriesPoint::new(slot, value));
    }

    Ok(GapFilledSeries {
        start_ms,
        end_ms,
        interval_ms,
        points: filled,
    })
}

/// First-match semantics depend on ascending input; anything else is sorted (stably) first.
fn sorted_by_time(points: &[TimeSeriesPoint]) -> Cow<'_, [TimeSeriesPoint]> {
    if points.windows(2).all(|w| w[0].time_ms <= w[1].time_ms) {
        Cow::Borrowed(points)
    } else {
        tracing::warn!("Grid fill input of {} points was not time-ordered", points.len());
        let mut sorted = points.to_vec();
        sorted.sort_by_key(|p| p.time_ms);
        Cow::Owned(sorted)
    }
}

/// How raw points are grouped for heatmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketFn {
    Daily,
    /// N-hour wall-clock slots; N divides 24.
    HourSlot(u32),
}

impl BucketFn {
    pub fn parse(label: &str) -> Result<Self, HistoryError> {
        match label {
            "daily" | "day" => return Ok(BucketFn::Daily),
            "hourly" => return Self::hour_slot(1),
            _ => {}
        }

        label
            .strip_suffix('h')
            .and_then(|hours| hours.parse::<u32>().ok())
            .ok_or_else(|| HistoryError::InvalidBucket(label.to_string()))
            .and_then(Self::hour_slot)
    }

    pub fn hour_slot(hours: u32) -> Result<Self, HistoryError> {
        if hours == 0 || 24 % hours != 0 {
            return Err(HistoryError::InvalidBucket(format!(
                "{hours}h slots do not divide a day"
            )));
        }
        Ok(BucketFn::HourSlot(hours))
    }

    /// Bucket of an instant, in the given wall-clock zone.
    pub fn key_for(&self, time: DateTime<Utc>, zone: FixedOffset) -> BucketKey {
        let local = time.with_timezone(&zone);
        match self {
            BucketFn::Daily => BucketKey {
                date: local.date_naive(),
                slot: None,
            },
            BucketFn::HourSlot(hours) => BucketKey {
                date: local.date_naive(),
                slot: Some(local.hour() / hours * hours),
            },
        }
    }

    fn next_key(&self, key: BucketKey) -> Option<BucketKey> {
        match (self, key.slot) {
            (BucketFn::HourSlot(hours), Some(slot)) if slot + hours < 24 => Some(BucketKey {
                date: key.date,
                slot: Some(slot + hours),
            }),
            (BucketFn::HourSlot(_), _) => key.date.succ_opt().map(|date| BucketKey {
                date,
                slot: Some(0),
            }),
            (BucketFn::Daily, _) => key.date.succ_opt().map(|date| BucketKey { date, slot: None }),
        }
    }
}

/// Mean of non-sentinel values per bucket, ascending by key.
///
/// With a `window`, every bucket touching it is emitted (empty ones as
/// [`GAP_SENTINEL`]) and points outside it are ignored.
pub fn aggregate_buckets(
    points: &[TimeSeriesPoint],
    bucket: BucketFn,
    zone: FixedOffset,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> Vec<AggregatedBucket> {
    let mut sums: BTreeMap<BucketKey, (f64, usize)> = BTreeMap::new();

    if let Some((start, end)) = window {
        let last = bucket.key_for(end, zone);
        let mut key = Some(bucket.key_for(start, zone));
        while let Some(k) = key.filter(|k| *k <= last) {
            sums.insert(k, (0.0, 0));
            key = bucket.next_key(k);
        }
    }

    for point in points {
        let Some(time) = DateTime::from_timestamp_millis(point.time_ms) else {
            continue;
        };
        if let Some((start, end)) = window {
            if time < start || time > end {
                continue;
            }
        }

        let entry = sums.entry(bucket.key_for(time, zone)).or_insert((0.0, 0));
        if point.value != GAP_SENTINEL && point.value.is_finite() {
            entry.0 += point.value;
            entry.1 += 1;
        }
    }

    sums.into_iter()
        .map(|(key, (sum, count))| AggregatedBucket {
            key,
            value: if count == 0 {
                GAP_SENTINEL
            } else {
                sum / count as f64
            },
        })
        .collect()
}

/// Grid step for a chart: the resolution's interval, or an even split of the span.
pub fn grid_interval(resolution_interval: Option<Duration>, span: Duration, max_points: usize) -> i64 {
    resolution_interval
        .map(|i| i.num_milliseconds())
        .unwrap_or_else(|| span.num_milliseconds() / max_points.max(1) as i64)
        .max(1)
}
