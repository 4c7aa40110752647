// Point-count reduction for chart rendering
use crate::domain::history::DownsamplingStrategy;
use crate::domain::range::TimeRange;
use crate::domain::telemetry::{Field, TimeSeriesPoint};

/// Reduce `points` to at most `max_points`, keeping both endpoints and every
/// online/offline transition. Leftover budget is filled by an even stride.
///
/// If the transitions alone do not fit, they are thinned evenly so the cap
/// still holds.
pub fn reduce(points: &[TimeSeriesPoint], max_points: usize) -> Vec<TimeSeriesPoint> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    match max_points {
        0 => return Vec::new(),
        1 => return vec![points[0]],
        _ => {}
    }

    let last = points.len() - 1;
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[last] = true;

    let room = max_points - 2;
    let transitions: Vec<usize> = transition_indices(points)
        .into_iter()
        .filter(|&i| i != last)
        .collect();
    for i in thin(&transitions, room) {
        keep[i] = true;
    }

    let kept = keep.iter().filter(|k| **k).count();
    let mut remaining = max_points.saturating_sub(kept);
    if remaining > 0 {
        let step = points.len().div_ceil(remaining);
        let mut i = 0;
        while i < points.len() && remaining > 0 {
            if !keep[i] {
                keep[i] = true;
                remaining -= 1;
            }
            i += step;
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

/// Pre-render sampling to the range's fixed target count.
pub fn optimize_for_range(points: &[TimeSeriesPoint], range: &TimeRange) -> Vec<TimeSeriesPoint> {
    reduce(points, range.target_points())
}

/// Keep first, last and the minimum and maximum of each bucket, in time order.
///
/// Suited to measurement series where spikes matter more than state changes.
pub fn min_max(points: &[TimeSeriesPoint], max_points: usize) -> Vec<TimeSeriesPoint> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    if max_points < 4 {
        return reduce(points, max_points);
    }

    let last = points.len() - 1;
    let interior = &points[1..last];
    let buckets = (max_points - 2) / 2;
    let bucket_size = interior.len().div_ceil(buckets);

    let mut downsampled = Vec::with_capacity(max_points);
    downsampled.push(points[0]);

    for chunk_start in (0..interior.len()).step_by(bucket_size) {
        let chunk_end = std::cmp::min(chunk_start + bucket_size, interior.len());
        let chunk = &interior[chunk_start..chunk_end];

        let (mut lo, mut hi) = (0, 0);
        for (i, p) in chunk.iter().enumerate() {
            if p.value < chunk[lo].value {
                lo = i;
            }
            if p.value > chunk[hi].value {
                hi = i;
            }
        }

        let (first, second) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        downsampled.push(chunk[first]);
        if second != first {
            downsampled.push(chunk[second]);
        }
    }

    downsampled.push(points[last]);
    downsampled
}

/// Run the chosen strategy and then the hard render cap.
///
/// Transitions are re-detected at each stage, so stacking stages never
/// drops one that the previous stage kept. Status series always go through
/// `reduce`; bucket extremes would drop the transitions between them.
pub fn apply(
    points: &[TimeSeriesPoint],
    field: Field,
    strategy: DownsamplingStrategy,
    range: &TimeRange,
    render_cap: usize,
) -> Vec<TimeSeriesPoint> {
    match strategy {
        DownsamplingStrategy::MinMax if field != Field::Status => min_max(points, render_cap),
        DownsamplingStrategy::Adaptive => reduce(&optimize_for_range(points, range), render_cap),
        DownsamplingStrategy::TransitionPreserving | DownsamplingStrategy::MinMax => {
            reduce(points, render_cap)
        }
    }
}

/// Indices whose status differs from the previous point.
fn transition_indices(points: &[TimeSeriesPoint]) -> Vec<usize> {
    points
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[0].status() != pair[1].status())
        .map(|(i, _)| i + 1)
        .collect()
}

fn thin(indices: &[usize], budget: usize) -> Vec<usize> {
    if indices.len() <= budget {
        return indices.to_vec();
    }
    tracing::debug!(
        "Thinning {} transitions to fit a budget of {}",
        indices.len(),
        budget
    );
    (0..budget).map(|k| indices[k * indices.len() / budget]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn status_series(levels: &[u8]) -> Vec<TimeSeriesPoint> {
        levels
            .iter()
            .enumerate()
            .map(|(i, l)| TimeSeriesPoint::new(i as i64 * 1_000, *l as f64))
            .collect()
    }

    fn random_status_series(rng: &mut StdRng, len: usize, flip: f64) -> Vec<TimeSeriesPoint> {
        let mut level = 1u8;
        let levels: Vec<u8> = (0..len)
            .map(|_| {
                if rng.gen_bool(flip) {
                    level = 1 - level;
                }
                level
            })
            .collect();
        status_series(&levels)
    }

    fn transition_points(points: &[TimeSeriesPoint]) -> Vec<TimeSeriesPoint> {
        transition_indices(points).into_iter().map(|i| points[i]).collect()
    }

    #[test]
    fn test_short_input_unchanged() {
        let points = status_series(&[1, 0, 1]);
        assert_eq!(reduce(&points, 3), points);
        assert_eq!(reduce(&points, 10), points);
    }

    #[test]
    fn test_bounds_and_endpoints() {
        let mut rng = StdRng::seed_from_u64(7);
        for len in [10, 100, 1_000, 5_000] {
            let points = random_status_series(&mut rng, len, 0.05);
            for cap in [2, 3, 10, 60, 288, 500] {
                let reduced = reduce(&points, cap);
                assert!(reduced.len() <= cap, "len {len} cap {cap}");
                assert_eq!(reduced.first(), points.first());
                assert_eq!(reduced.last(), points.last());
            }
        }
    }

    #[test]
    fn test_transitions_survive_when_budget_allows() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let points = random_status_series(&mut rng, 2_000, 0.01);
            let transitions = transition_points(&points);
            let cap = 2 + transitions.len() + rng.gen_range(0..50);

            let reduced = reduce(&points, cap);
            assert!(reduced.len() <= cap);
            for t in &transitions {
                assert!(reduced.contains(t), "lost transition at {}", t.time_ms);
            }
        }
    }

    #[test]
    fn test_lone_outage_is_kept() {
        let mut levels = vec![1u8; 10_000];
        levels[4_321] = 0;
        let points = status_series(&levels);

        let reduced = reduce(&points, 60);
        assert!(reduced.len() <= 60);
        assert!(reduced.contains(&points[4_321]));
        assert!(reduced.contains(&points[4_322]));
    }

    #[test]
    fn test_too_many_transitions_still_capped() {
        let levels: Vec<u8> = (0..1_000).map(|i| (i % 2) as u8).collect();
        let points = status_series(&levels);

        let reduced = reduce(&points, 100);
        assert_eq!(reduced.len(), 100);
        assert_eq!(reduced.first(), points.first());
        assert_eq!(reduced.last(), points.last());
    }

    #[test]
    fn test_output_stays_in_time_order() {
        let mut rng = StdRng::seed_from_u64(3);
        let points = random_status_series(&mut rng, 3_000, 0.02);
        let reduced = reduce(&points, 120);
        assert!(reduced.windows(2).all(|w| w[0].time_ms < w[1].time_ms));
    }

    #[test]
    fn test_adaptive_then_cap_keeps_transitions() {
        let mut levels = vec![1u8; 8_640];
        for i in 2_000..2_010 {
            levels[i] = 0;
        }
        levels[7_000] = 0;
        let points = status_series(&levels);
        let transitions = transition_points(&points);

        let optimized = optimize_for_range(&points, &TimeRange::Month);
        assert!(optimized.len() <= 120);

        let capped = apply(&points, Field::Status, DownsamplingStrategy::Adaptive, &TimeRange::Month, 60);
        assert!(capped.len() <= 60);
        for t in &transitions {
            assert!(capped.contains(t));
        }
    }

    #[test]
    fn test_min_max_request_on_status_keeps_transitions() {
        let mut levels = vec![1u8; 1_000];
        for k in 0..20 {
            let at = 20 + k * 48;
            levels[at] = 0;
            levels[at + 1] = 0;
        }
        let points = status_series(&levels);
        let transitions = transition_points(&points);
        assert_eq!(transitions.len(), 40);

        let capped = apply(&points, Field::Status, DownsamplingStrategy::MinMax, &TimeRange::Day, 60);
        assert!(capped.len() <= 60);
        for t in &transitions {
            assert!(capped.contains(t), "lost transition at {}", t.time_ms);
        }
    }

    #[test]
    fn test_min_max_applies_to_measurements() {
        let mut points: Vec<TimeSeriesPoint> = (0..1_000)
            .map(|i| TimeSeriesPoint::new(i * 1_000, 1_013.0))
            .collect();
        points[700].value = 980.0;

        let capped = apply(&points, Field::Pressure, DownsamplingStrategy::MinMax, &TimeRange::Day, 60);
        assert_eq!(capped, min_max(&points, 60));
        assert!(capped.contains(&points[700]));
    }

    #[test]
    fn test_min_max_keeps_extremes() {
        let mut points: Vec<TimeSeriesPoint> = (0..1_000)
            .map(|i| TimeSeriesPoint::new(i * 1_000, 21.0))
            .collect();
        points[500].value = 35.0;
        points[501].value = -5.0;

        let reduced = min_max(&points, 50);
        assert!(reduced.len() <= 50);
        assert!(reduced.contains(&points[500]));
        assert!(reduced.contains(&points[501]));
        assert_eq!(reduced.first(), points.first());
        assert_eq!(reduced.last(), points.last());
        assert!(reduced.windows(2).all(|w| w[0].time_ms < w[1].time_ms));
    }
}
