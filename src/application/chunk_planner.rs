// Splits a history query into bounded sub-queries
use crate::domain::history::{ChunkSpec, HistoryQuery};
use crate::domain::range::{Resolution, TimeRange};
use chrono::{DateTime, Duration, Utc};

/// Point budget bounds for custom ranges.
const CUSTOM_MIN_POINTS: usize = 60;
const CUSTOM_MAX_POINTS: usize = 500;
/// Ceiling of the degraded tier when nothing tighter applies.
const DEGRADED_MAX_POINTS: usize = 48;
/// Upper bound when the caller pins the resolution.
const MAX_EXPLICIT_POINTS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Budget {
    resolution: Resolution,
    max_points: usize,
    degraded_resolution: Resolution,
    degraded_max_points: usize,
}

/// Plans the sub-queries for a request.
///
/// Without a `max_chunk_span` every plan is a single chunk covering the whole
/// window. With one, the window is cut into consecutive pieces no longer than
/// that span, each taking its share of the point budget.
#[derive(Debug, Clone, Default)]
pub struct ChunkPlanner {
    max_chunk_span: Option<Duration>,
}

impl ChunkPlanner {
    pub fn new(max_chunk_span: Option<Duration>) -> Self {
        Self {
            max_chunk_span: max_chunk_span.filter(|span| *span > Duration::zero()),
        }
    }

    pub fn plan(&self, query: &HistoryQuery, now: DateTime<Utc>) -> Vec<ChunkSpec> {
        let (start, end) = query.range.window(now);
        let mut budget = budget_for(&query.range);

        if query.resolution != Resolution::Auto {
            budget.resolution = query.resolution;
            budget.max_points = query
                .resolution
                .points_in(end - start)
                .min(MAX_EXPLICIT_POINTS);
            budget.degraded_resolution = query.resolution.coarser();
            budget.degraded_max_points = budget.degraded_max_points.min(budget.max_points);
        }
        if let Some(max) = query.max_points {
            budget.max_points = budget.max_points.min(max.max(1));
            budget.degraded_max_points = budget.degraded_max_points.min(budget.max_points);
        }

        let chunks = self.split(start, end, budget);
        tracing::debug!(
            "Planned {} chunk(s) for {} {} at {}",
            chunks.len(),
            query.sensor_id,
            query.range.label(),
            budget.resolution.label()
        );
        chunks
    }

    fn split(&self, start: DateTime<Utc>, end: DateTime<Utc>, budget: Budget) -> Vec<ChunkSpec> {
        let whole = ChunkSpec {
            start,
            end,
            resolution: budget.resolution,
            max_points: budget.max_points,
            degraded_resolution: budget.degraded_resolution,
            degraded_max_points: budget.degraded_max_points,
        };

        let span = end - start;
        let Some(max_span) = self.max_chunk_span.filter(|max| span > *max) else {
            return vec![whole];
        };

        let total_ms = span.num_milliseconds().max(1) as f64;
        let share = |points: usize, piece: Duration, floor: usize| {
            ((points as f64 * piece.num_milliseconds() as f64 / total_ms).ceil() as usize).max(floor)
        };

        let mut chunks = Vec::new();
        let mut chunk_start = start;
        while chunk_start < end {
            let chunk_end = std::cmp::min(chunk_start + max_span, end);
            let piece = chunk_end - chunk_start;
            chunks.push(ChunkSpec {
                start: chunk_start,
                end: chunk_end,
                max_points: share(budget.max_points, piece, 1),
                degraded_max_points: share(budget.degraded_max_points, piece, 2),
                ..whole.clone()
            });
            chunk_start = chunk_end;
        }
        chunks
    }
}

fn budget_for(range: &TimeRange) -> Budget {
    match range {
        TimeRange::Day => Budget {
            resolution: Resolution::Auto,
            max_points: 288,
            degraded_resolution: Resolution::ThirtyMinutes,
            degraded_max_points: DEGRADED_MAX_POINTS,
        },
        TimeRange::Week => Budget {
            resolution: Resolution::Hourly,
            max_points: 168,
            degraded_resolution: Resolution::SixHours,
            degraded_max_points: 42,
        },
        TimeRange::Month => Budget {
            resolution: Resolution::Daily,
            max_points: 60,
            degraded_resolution: Resolution::Weekly,
            degraded_max_points: 30,
        },
        // Weekly is the coarsest grouping, so the degraded tier only shrinks the budget.
        TimeRange::Year => Budget {
            resolution: Resolution::Weekly,
            max_points: 52,
            degraded_resolution: Resolution::Weekly,
            degraded_max_points: 30,
        },
        TimeRange::Custom { .. } => {
            let span = range.span();
            let resolution = Resolution::for_span(span);
            let max_points = resolution
                .points_in(span)
                .clamp(CUSTOM_MIN_POINTS, CUSTOM_MAX_POINTS);
            Budget {
                resolution,
                max_points,
                degraded_resolution: resolution.coarser(),
                degraded_max_points: DEGRADED_MAX_POINTS.min(max_points),
            }
        }
    }
}
