// Placeholder uptime history for when every real query tier failed
use crate::application::error::HistoryError;
use crate::domain::telemetry::{RawPoint, Status};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Caveat paired with every synthetic series.
pub const SYNTHETIC_CAVEAT: &str =
    "History could not be loaded; showing an estimated uptime pattern. Try a shorter range or refresh.";

const MIN_POINTS: usize = 2;
/// Mean outage length, in points.
const MEAN_OUTAGE_POINTS: f64 = 2.5;

/// Generate a plausible status series over `[start, end]`.
///
/// Seeded from the sensor id and span so a refresh shows the same shape. The
/// first point sits on `start`, the last on `end` and carries `last_known`.
pub fn generate(
    sensor_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    points: usize,
    last_known: Status,
) -> Result<Vec<RawPoint>, HistoryError> {
    if end <= start {
        return Err(HistoryError::SyntheticFailed(format!(
            "empty window {start} .. {end}"
        )));
    }

    let span_ms = (end - start).num_milliseconds().max(1);
    // At most one point per millisecond of the window.
    let count = points
        .min(usize::try_from(span_ms).unwrap_or(usize::MAX).saturating_add(1))
        .max(MIN_POINTS);
    let step_ms = span_ms / (count as i64 - 1);

    let mut rng = StdRng::seed_from_u64(seed(sensor_id, span_ms));
    let uptime: f64 = rng.gen_range(0.85..=0.95);
    let outage_start = ((1.0 - uptime) / MEAN_OUTAGE_POINTS).clamp(0.0, 1.0);

    let mut series = Vec::with_capacity(count);
    let mut outage_left = 0u32;
    for i in 0..count {
        let time = if i == count - 1 {
            end
        } else {
            start + Duration::milliseconds(step_ms * i as i64)
        };

        if outage_left == 0 && rng.gen_bool(outage_start) {
            outage_left = rng.gen_range(1..=4);
        }
        let status = if outage_left > 0 {
            outage_left -= 1;
            Status::Offline
        } else {
            Status::Online
        };

        series.push(RawPoint::new(time, status, None));
    }

    if let Some(last) = series.last_mut() {
        last.status = last_known;
    }
    Ok(series)
}

/// FNV-1a over the sensor id, folded with the span.
fn seed(sensor_id: &str, span_ms: i64) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in sensor_id.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash ^ span_ms as u64
}
