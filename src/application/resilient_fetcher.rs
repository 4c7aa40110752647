// Chunk fetching with timeout, cancellation and a three-tier fallback ladder
use crate::application::error::{HistoryError, QueryError};
use crate::application::history_repository::{HistoryRepository, QueryOptions};
use crate::application::synthetic;
use crate::domain::history::{ChunkSpec, HistoryQuery, Provenance};
use crate::domain::telemetry::{Field, RawPoint, RawRecord, Status};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Normal,
    Degraded,
}

impl Tier {
    fn provenance(self) -> Provenance {
        match self {
            Tier::Normal => Provenance::Live,
            Tier::Degraded => Provenance::Degraded,
        }
    }
}

/// What to do once both real tiers are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Fabricate an uptime pattern ending on the sensor's last known state.
    Synthetic { last_known: Status },
    /// Report [`HistoryError::Exhausted`].
    Fail,
}

#[derive(Debug)]
enum FetchState {
    Fetching(Tier),
    TimedOut(Tier),
    Failed(Tier),
    Exhausted,
    SyntheticFallback(Status),
    Done(Provenance),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkOutcome {
    /// Ascending, one point per timestamp.
    pub points: Vec<RawPoint>,
    pub provenance: Provenance,
    /// Records dropped at ingestion.
    pub dropped: usize,
}

#[derive(Clone)]
pub struct ResilientFetcher {
    repository: Arc<dyn HistoryRepository>,
    degraded_timeout: Duration,
}

impl ResilientFetcher {
    pub fn new(repository: Arc<dyn HistoryRepository>, degraded_timeout: Duration) -> Self {
        Self {
            repository,
            degraded_timeout,
        }
    }

    /// Fetch one chunk, walking normal → degraded → fallback.
    ///
    /// Each tier is tried once. A timed-out tier is abandoned and whatever it
    /// was doing is not awaited. Rows salvaged from a failed tier are merged
    /// with later tiers. Only `cancel` (the caller going away) stops the ladder.
    pub async fn fetch(
        &self,
        query: &HistoryQuery,
        chunk: &ChunkSpec,
        fallback: Fallback,
        cancel: &CancellationToken,
    ) -> Result<ChunkOutcome, HistoryError> {
        let mut gathered: Vec<Vec<RawPoint>> = Vec::new();
        let mut dropped = 0;
        let mut state = FetchState::Fetching(Tier::Normal);

        loop {
            state = match state {
                FetchState::Fetching(tier) => {
                    match self.attempt(query, chunk, tier, cancel).await {
                        Ok(records) => {
                            let (points, skipped) = ingest_records(&records, query.field);
                            dropped += skipped;
                            if points.is_empty() && tier == Tier::Normal {
                                tracing::warn!(
                                    "Empty result for {} {} on the normal tier",
                                    query.sensor_id,
                                    query.range.label()
                                );
                                FetchState::Failed(tier)
                            } else {
                                gathered.push(points);
                                FetchState::Done(tier.provenance())
                            }
                        }
                        Err(QueryError::Cancelled) if cancel.is_cancelled() => {
                            return Err(HistoryError::Cancelled);
                        }
                        Err(QueryError::Timeout { after_ms }) => {
                            tracing::warn!(
                                "{:?} tier for {} {} timed out after {} ms",
                                tier,
                                query.sensor_id,
                                query.range.label(),
                                after_ms
                            );
                            FetchState::TimedOut(tier)
                        }
                        Err(QueryError::Cancelled) => FetchState::TimedOut(tier),
                        Err(QueryError::Transport { message, partial }) => {
                            tracing::warn!(
                                "{:?} tier for {} {} failed: {}",
                                tier,
                                query.sensor_id,
                                query.range.label(),
                                message
                            );
                            if !partial.is_empty() {
                                let (points, skipped) = ingest_records(&partial, query.field);
                                tracing::info!(
                                    "Keeping {} partial points from the failed {:?} tier",
                                    points.len(),
                                    tier
                                );
                                dropped += skipped;
                                gathered.push(points);
                            }
                            FetchState::Failed(tier)
                        }
                    }
                }
                FetchState::TimedOut(Tier::Normal) | FetchState::Failed(Tier::Normal) => {
                    FetchState::Fetching(Tier::Degraded)
                }
                FetchState::TimedOut(Tier::Degraded) | FetchState::Failed(Tier::Degraded) => {
                    FetchState::Exhausted
                }
                FetchState::Exhausted => {
                    if gathered.iter().any(|batch| !batch.is_empty()) {
                        // Partial real data beats a placeholder.
                        FetchState::Done(Provenance::Degraded)
                    } else {
                        match fallback {
                            Fallback::Synthetic { last_known } => {
                                FetchState::SyntheticFallback(last_known)
                            }
                            Fallback::Fail => {
                                return Err(HistoryError::Exhausted {
                                    sensor_id: query.sensor_id.clone(),
                                });
                            }
                        }
                    }
                }
                FetchState::SyntheticFallback(last_known) => {
                    tracing::warn!(
                        "Serving synthetic history for {} {}",
                        query.sensor_id,
                        query.range.label()
                    );
                    let points = synthetic::generate(
                        &query.sensor_id,
                        chunk.start,
                        chunk.end,
                        chunk.degraded_max_points,
                        last_known,
                    )?;
                    return Ok(ChunkOutcome {
                        points,
                        provenance: Provenance::Synthetic,
                        dropped,
                    });
                }
                FetchState::Done(provenance) => {
                    return Ok(ChunkOutcome {
                        points: RawPoint::merge(gathered),
                        provenance,
                        dropped,
                    });
                }
            };
        }
    }

    async fn attempt(
        &self,
        query: &HistoryQuery,
        chunk: &ChunkSpec,
        tier: Tier,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawRecord>, QueryError> {
        let (resolution, max_points, timeout) = match tier {
            Tier::Normal => (
                chunk.resolution,
                chunk.max_points,
                Duration::from_millis(query.timeout_ms),
            ),
            Tier::Degraded => (
                chunk.degraded_resolution,
                chunk.degraded_max_points,
                self.degraded_timeout,
            ),
        };
        let after_ms = timeout.as_millis() as u64;

        let options = QueryOptions {
            field: query.field,
            resolution,
            max_points,
            downsampling: query.strategy,
            timeout_ms: after_ms,
            start_time: Some(chunk.start),
            end_time: Some(chunk.end),
        };

        tracing::debug!(
            "Fetching {} {} ({:?} tier, {} points at {})",
            query.sensor_id,
            query.range.label(),
            tier,
            max_points,
            resolution.label()
        );

        let token = cancel.child_token();
        let request =
            self.repository
                .query_history(&query.sensor_id, query.range.label(), &options, token.clone());

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueryError::Cancelled),
            outcome = tokio::time::timeout(timeout, request) => match outcome {
                Ok(result) => result.map(|response| response.data),
                Err(_) => Err(QueryError::Timeout { after_ms }),
            },
        };

        if result.is_err() {
            token.cancel();
        }
        result
    }
}

/// Normalize records into typed points, dropping (and counting) the bad ones.
pub fn ingest_records(records: &[RawRecord], field: Field) -> (Vec<RawPoint>, usize) {
    let mut points = Vec::with_capacity(records.len());
    let mut dropped = 0;

    for record in records {
        match RawPoint::from_record(record, field) {
            Ok(point) => points.push(point),
            Err(e) => {
                tracing::debug!("Dropping record: {}", e);
                dropped += 1;
            }
        }
    }

    if dropped > 0 {
        tracing::warn!("Dropped {} of {} records at ingestion", dropped, records.len());
    }
    (points, dropped)
}


#[cfg(test)]
mod tests {
    use super::testing::{status_records, Reply, ScriptedRepository};
    use super::*;
    use crate::application::chunk_planner::ChunkPlanner;
    use crate::domain::range::TimeRange;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    const SHORT: Duration = Duration::from_millis(30);

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn setup(replies: Vec<Reply>) -> (Arc<ScriptedRepository>, ResilientFetcher, HistoryQuery, ChunkSpec) {
        let repo = Arc::new(ScriptedRepository::new(replies));
        let fetcher = ResilientFetcher::new(repo.clone(), SHORT);
        let query = HistoryQuery::new("bme280-office", Field::Status, TimeRange::Month, 30);
        let chunk = ChunkPlanner::default().plan(&query, now()).remove(0);
        (repo, fetcher, query, chunk)
    }

    fn synthetic() -> Fallback {
        Fallback::Synthetic {
            last_known: Status::Online,
        }
    }

    #[tokio::test]
    async fn test_normal_tier_success() {
        let (repo, fetcher, query, chunk) = setup(vec![Reply::Records(status_records(0, &[1, 1, 0]))]);
        let outcome = fetcher
            .fetch(&query, &chunk, synthetic(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.provenance, Provenance::Live);
        assert_eq!(outcome.points.len(), 3);
        assert_eq!(repo.call_count(), 1);

        let calls = repo.calls.lock();
        assert_eq!(calls[0].max_points, chunk.max_points);
        assert_eq!(calls[0].resolution, chunk.resolution);
        assert_eq!(calls[0].start_time, Some(chunk.start));
    }

    #[tokio::test]
    async fn test_timeout_falls_to_degraded_tier() {
        let (repo, fetcher, query, chunk) = setup(vec![
            Reply::Hang,
            Reply::Records(status_records(0, &[1, 0])),
        ]);
        let outcome = fetcher
            .fetch(&query, &chunk, synthetic(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.provenance, Provenance::Degraded);
        assert_eq!(outcome.points.len(), 2);

        let calls = repo.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].max_points, chunk.degraded_max_points);
        assert_eq!(calls[1].resolution, chunk.degraded_resolution);
        assert!(calls[1].max_points < calls[0].max_points);
    }

    #[tokio::test]
    async fn test_empty_degraded_result_is_success() {
        let (_, fetcher, query, chunk) = setup(vec![
            Reply::Records(Vec::new()),
            Reply::Records(Vec::new()),
        ]);
        let outcome = fetcher
            .fetch(&query, &chunk, synthetic(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.provenance, Provenance::Degraded);
        assert!(outcome.points.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_tiers_go_synthetic() {
        let (repo, fetcher, query, chunk) = setup(vec![Reply::Hang, Reply::Fail("boom".into())]);
        let outcome = fetcher
            .fetch(
                &query,
                &chunk,
                Fallback::Synthetic {
                    last_known: Status::Offline,
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.provenance, Provenance::Synthetic);
        assert_eq!(repo.call_count(), 2);
        assert_eq!(outcome.points.first().map(|p| p.time), Some(chunk.start));
        assert_eq!(outcome.points.last().map(|p| p.time), Some(chunk.end));
        assert_eq!(outcome.points.last().map(|p| p.status), Some(Status::Offline));
    }

    #[tokio::test]
    async fn test_exhausted_without_fallback_errors() {
        let (_, fetcher, query, chunk) = setup(vec![Reply::Fail("down".into())]);
        let result = fetcher
            .fetch(&query, &chunk, Fallback::Fail, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(HistoryError::Exhausted { .. })));
    }

    #[tokio::test]
    async fn test_partial_rows_are_merged_with_degraded_tier() {
        let (_, fetcher, query, chunk) = setup(vec![
            Reply::Partial(status_records(0, &[1, 1]), "stream reset".into()),
            Reply::Records(status_records(60, &[0, 0])),
        ]);
        let outcome = fetcher
            .fetch(&query, &chunk, synthetic(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.provenance, Provenance::Degraded);
        // Second partial row and first degraded row share a timestamp; the first seen wins.
        let levels: Vec<Status> = outcome.points.iter().map(|p| p.status).collect();
        assert_eq!(levels, vec![Status::Online, Status::Online, Status::Offline]);
    }

    #[tokio::test]
    async fn test_partial_rows_beat_synthetic() {
        let (_, fetcher, query, chunk) = setup(vec![
            Reply::Partial(status_records(0, &[1, 0]), "reset".into()),
            Reply::Hang,
        ]);
        let outcome = fetcher
            .fetch(&query, &chunk, synthetic(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.provenance, Provenance::Degraded);
        assert_eq!(outcome.points.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_timestamps_are_dropped_not_fatal() {
        let mut records = status_records(0, &[1, 0, 1]);
        records[1].time = Some(json!("garbage"));
        let (_, fetcher, query, chunk) = setup(vec![Reply::Records(records)]);

        let outcome = fetcher
            .fetch(&query, &chunk, synthetic(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.provenance, Provenance::Live);
        assert_eq!(outcome.points.len(), 2);
        assert_eq!(outcome.dropped, 1);
    }

    #[tokio::test]
    async fn test_caller_cancellation_stops_ladder() {
        let (repo, fetcher, query, chunk) = setup(vec![Reply::Hang]);
        let query = HistoryQuery {
            timeout_ms: 60_000,
            ..query
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = fetcher.fetch(&query, &chunk, synthetic(), &cancel).await;
        assert!(matches!(result, Err(HistoryError::Cancelled)));
        assert_eq!(repo.call_count(), 1);
    }
}
