// History service - Chart data pipeline: cache, plan, fetch, merge, downsample
use crate::application::cache::{CacheKey, SeriesCache};
use crate::application::chunk_planner::ChunkPlanner;
use crate::application::downsampler;
use crate::application::error::HistoryError;
use crate::application::grid::{self, BucketFn};
use crate::application::history_repository::HistoryRepository;
use crate::application::resilient_fetcher::{ChunkOutcome, Fallback, ResilientFetcher};
use crate::application::synthetic::SYNTHETIC_CAVEAT;
use crate::domain::history::{
    AggregatedBucket, ChunkSpec, DownsamplingStrategy, GapFilledSeries, HistoryQuery, Provenance,
    SeriesResult,
};
use crate::domain::range::{Resolution, TimeRange};
use crate::domain::telemetry::{Field, RawPoint, Status, TimeSeriesPoint};
use crate::infrastructure::config::PipelineSettings;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const DEGRADED_CAVEAT: &str =
    "The full history query did not finish; showing reduced-resolution data.";

#[derive(Clone)]
pub struct HistoryService {
    cache: Arc<SeriesCache>,
    planner: ChunkPlanner,
    fetcher: ResilientFetcher,
    settings: PipelineSettings,
}

impl HistoryService {
    pub fn new(
        repository: Arc<dyn HistoryRepository>,
        cache: Arc<SeriesCache>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            cache,
            planner: ChunkPlanner::new(settings.max_chunk_span()),
            fetcher: ResilientFetcher::new(repository, settings.degraded_timeout()),
            settings,
        }
    }

    pub fn query(&self, sensor_id: &str, field: Field, range: TimeRange) -> HistoryQuery {
        HistoryQuery::new(sensor_id, field, range, self.settings.normal_timeout_ms)
    }

    /// Status series for line/uptime charts.
    pub async fn get_series(
        &self,
        sensor_id: &str,
        range: TimeRange,
    ) -> Result<SeriesResult, HistoryError> {
        let query = self.query(sensor_id, Field::Status, range);
        self.get_series_with(query, &CancellationToken::new()).await
    }

    /// Full pipeline for one query. Status queries never fail outright while
    /// placeholder data can still be generated.
    pub async fn get_series_with(
        &self,
        query: HistoryQuery,
        cancel: &CancellationToken,
    ) -> Result<SeriesResult, HistoryError> {
        let started = Instant::now();
        let key = CacheKey::new(&query.sensor_id, query.range);
        let cacheable =
            query.field == Field::Status && query.strategy == DownsamplingStrategy::default();

        if cacheable {
            if let Some(points) = self.cache.get(&key) {
                tracing::debug!("Cache hit for {} {}", query.sensor_id, query.range.label());
                return Ok(SeriesResult {
                    points,
                    provenance: Provenance::Cache,
                    message: None,
                });
            }
        }

        let chunks = self.planner.plan(&query, Utc::now());
        let fallback = match query.field {
            Field::Status => Fallback::Synthetic {
                last_known: self
                    .cache
                    .last_known_status(&query.sensor_id)
                    .unwrap_or(Status::Online),
            },
            _ => Fallback::Fail,
        };

        let outcomes = self.fetch_chunks(&query, &chunks, fallback, cancel).await?;
        let provenance = worst_provenance(&outcomes);
        let dropped: usize = outcomes.iter().map(|o| o.dropped).sum();
        let series = to_series(RawPoint::merge(outcomes.into_iter().map(|o| o.points)), query.field);

        let points = downsampler::apply(
            &series,
            query.field,
            query.strategy,
            &query.range,
            self.settings.render_cap(),
        );

        if cacheable && provenance != Provenance::Synthetic {
            self.cache.put(key, points.clone());
        }

        tracing::info!(
            "Served {} {} ({} of {} points, {} dropped, {}, {}) in {} ms",
            query.sensor_id,
            query.range.label(),
            points.len(),
            series.len(),
            dropped,
            query.strategy.as_str(),
            provenance.as_str(),
            started.elapsed().as_millis()
        );

        Ok(SeriesResult {
            points,
            provenance,
            message: caveat_for(provenance),
        })
    }

    /// Measurement series on a fixed grid for the historical chart.
    pub async fn get_historical_series(
        &self,
        sensor_id: &str,
        field: Field,
        range: TimeRange,
        cancel: &CancellationToken,
    ) -> Result<GapFilledSeries, HistoryError> {
        let query = self.query(sensor_id, field, range);
        let chunks = self.planner.plan(&query, Utc::now());
        let (first, last) = bounds(&chunks, &range)?;

        let outcomes = self
            .fetch_chunks(&query, &chunks, Fallback::Fail, cancel)
            .await?;
        let resolution = if worst_provenance(&outcomes) >= Provenance::Degraded {
            first.degraded_resolution
        } else {
            first.resolution
        };
        let budget: usize = chunks.iter().map(|c| c.max_points).sum();
        let series = to_series(RawPoint::merge(outcomes.into_iter().map(|o| o.points)), field);

        let interval_ms = grid::grid_interval(resolution.interval(), last.end - first.start, budget);
        grid::fill_grid(
            &series,
            first.start.timestamp_millis(),
            last.end.timestamp_millis(),
            interval_ms,
        )
    }

    /// Hourly data folded into day or hour-slot buckets for heatmaps.
    pub async fn get_heatmap_series(
        &self,
        sensor_id: &str,
        field: Field,
        range: TimeRange,
        bucket: BucketFn,
        cancel: &CancellationToken,
    ) -> Result<Vec<AggregatedBucket>, HistoryError> {
        let query = self
            .query(sensor_id, field, range)
            .with_resolution(Resolution::Hourly);
        let chunks = self.planner.plan(&query, Utc::now());
        let (first, last) = bounds(&chunks, &range)?;

        let outcomes = self
            .fetch_chunks(&query, &chunks, Fallback::Fail, cancel)
            .await?;
        let series = to_series(RawPoint::merge(outcomes.into_iter().map(|o| o.points)), field);

        Ok(grid::aggregate_buckets(
            &series,
            bucket,
            self.settings.local_zone(),
            Some((first.start, last.end)),
        ))
    }

    async fn fetch_chunks(
        &self,
        query: &HistoryQuery,
        chunks: &[ChunkSpec],
        fallback: Fallback,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChunkOutcome>, HistoryError> {
        if self.settings.concurrent_chunks {
            return futures::future::try_join_all(
                chunks
                    .iter()
                    .map(|chunk| self.fetcher.fetch(query, chunk, fallback, cancel)),
            )
            .await;
        }

        let mut outcomes = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            outcomes.push(self.fetcher.fetch(query, chunk, fallback, cancel).await?);
        }
        Ok(outcomes)
    }
}

fn bounds<'a>(
    chunks: &'a [ChunkSpec],
    range: &TimeRange,
) -> Result<(&'a ChunkSpec, &'a ChunkSpec), HistoryError> {
    match (chunks.first(), chunks.last()) {
        (Some(first), Some(last)) => Ok((first, last)),
        _ => Err(HistoryError::InvalidRange(format!(
            "nothing to query for {}",
            range.label()
        ))),
    }
}

fn worst_provenance(outcomes: &[ChunkOutcome]) -> Provenance {
    outcomes
        .iter()
        .map(|o| o.provenance)
        .max()
        .unwrap_or(Provenance::Live)
}

fn to_series(points: Vec<RawPoint>, field: Field) -> Vec<TimeSeriesPoint> {
    match field {
        Field::Status => points.iter().map(RawPoint::to_status_point).collect(),
        _ => points.iter().filter_map(RawPoint::to_measurement_point).collect(),
    }
}

fn caveat_for(provenance: Provenance) -> Option<String> {
    match provenance {
        Provenance::Degraded => Some(DEGRADED_CAVEAT.to_string()),
        Provenance::Synthetic => Some(SYNTHETIC_CAVEAT.to_string()),
        Provenance::Cache | Provenance::Live => None,
    }
}
