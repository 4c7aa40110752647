// HTTP request handlers
use crate::application::export;
use crate::application::grid::BucketFn;
use crate::domain::history::{DownsamplingStrategy, Provenance};
use crate::domain::range::TimeRange;
use crate::domain::telemetry::{Field, TimeSeriesPoint};
use crate::infrastructure::http_response::{accepts_brotli, csv_response, json_response};
use crate::presentation::app_state::AppState;
use crate::presentation::error::AppError;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub range: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub strategy: Option<DownsamplingStrategy>,
    pub field: Option<Field>,
    pub bucket: Option<String>,
}

impl HistoryParams {
    fn time_range(&self, default: &str) -> Result<TimeRange, AppError> {
        let label = self.range.as_deref().unwrap_or(default);
        TimeRange::parse(label, self.start, self.end).ok_or_else(|| {
            AppError::BadRequest(format!(
                "unknown range '{label}' (expected 24h, 7d, 30d, 365d or custom with start < end)"
            ))
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryPayload<'a> {
    sensor_id: &'a str,
    range: &'static str,
    provenance: Provenance,
    synthetic: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    points: Vec<TimeSeriesPoint>,
}

/// Cancels in-flight queries when the client goes away and the handler is dropped.
fn request_token() -> (CancellationToken, tokio_util::sync::DropGuard) {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    (cancel, guard)
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Downsampled series for the history chart
pub async fn sensor_history(
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    let range = params.time_range("24h")?;
    let query = state
        .history_service
        .query(&id, params.field.unwrap_or_default(), range)
        .with_strategy(params.strategy.unwrap_or_default());

    let (cancel, _guard) = request_token();
    let result = state.history_service.get_series_with(query, &cancel).await?;

    let payload = HistoryPayload {
        sensor_id: &id,
        range: range.label(),
        provenance: result.provenance,
        synthetic: result.is_synthetic(),
        message: result.message,
        points: result.points,
    };
    json_response(&payload, accepts_brotli(&headers))
        .await
        .map_err(AppError::Encoding)
}

/// The same series as `sensor_history`, as a CSV download
pub async fn sensor_history_csv(
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    let range = params.time_range("24h")?;
    let field = params.field.unwrap_or_default();
    let query = state
        .history_service
        .query(&id, field, range)
        .with_strategy(params.strategy.unwrap_or_default());

    let (cancel, _guard) = request_token();
    let result = state.history_service.get_series_with(query, &cancel).await?;
    if result.is_synthetic() {
        return Err(AppError::BadRequest(
            "no recorded history to export for this range".to_string(),
        ));
    }

    let body = export::to_csv(&result.points, field)?;
    let filename = format!(
        "{}-{}-{}.csv",
        sanitize(&id),
        field.as_str(),
        range.label()
    );
    csv_response(body, &filename, accepts_brotli(&headers))
        .await
        .map_err(AppError::Encoding)
}

/// Gap-filled measurement series on a fixed grid
pub async fn sensor_chart(
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    let range = params.time_range("24h")?;
    let field = params.field.unwrap_or(Field::Temperature);

    let (cancel, _guard) = request_token();
    let series = state
        .history_service
        .get_historical_series(&id, field, range, &cancel)
        .await?;

    json_response(&series, accepts_brotli(&headers))
        .await
        .map_err(AppError::Encoding)
}

/// Per-day or per-hour-slot means for the heatmap
pub async fn sensor_heatmap(
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    let range = params.time_range("7d")?;
    let field = params.field.unwrap_or(Field::Temperature);
    let bucket = BucketFn::parse(params.bucket.as_deref().unwrap_or("daily"))?;

    let (cancel, _guard) = request_token();
    let buckets = state
        .history_service
        .get_heatmap_series(&id, field, range, bucket, &cancel)
        .await?;

    json_response(&buckets, accepts_brotli(&headers))
        .await
        .map_err(AppError::Encoding)
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::cache::SeriesCache;
    use crate::application::history_service::HistoryService;
    use crate::application::resilient_fetcher::testing::{status_records, Reply, ScriptedRepository};
    use crate::infrastructure::config::PipelineSettings;
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;

    fn state(replies: Vec<Reply>) -> State<Arc<AppState>> {
        let settings = PipelineSettings {
            normal_timeout_ms: 30,
            degraded_timeout_ms: 30,
            ..PipelineSettings::default()
        };
        let history_service = HistoryService::new(
            Arc::new(ScriptedRepository::new(replies)),
            Arc::new(SeriesCache::default()),
            settings,
        );
        State(Arc::new(AppState { history_service }))
    }

    fn params(range: &str) -> Query<HistoryParams> {
        Query(HistoryParams {
            range: Some(range.to_string()),
            ..HistoryParams::default()
        })
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_history_payload() {
        let response = sensor_history(
            Path("IT OFFICE".to_string()),
            params("24h"),
            HeaderMap::new(),
            state(vec![Reply::Records(status_records(0, &[1, 0]))]),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["sensorId"], "IT OFFICE");
        assert_eq!(body["range"], "24h");
        assert_eq!(body["provenance"], "live");
        assert_eq!(body["synthetic"], false);
        assert!(body.get("message").is_none());
        assert_eq!(body["points"][1]["y"], 0.0);
    }

    #[tokio::test]
    async fn test_history_synthetic_payload() {
        let response = sensor_history(
            Path("IT OFFICE".to_string()),
            params("7d"),
            HeaderMap::new(),
            state(vec![Reply::Fail("down".into())]),
        )
        .await
        .unwrap();

        let body = json_body(response).await;
        assert_eq!(body["provenance"], "synthetic");
        assert_eq!(body["synthetic"], true);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_minmax_strategy_on_status_history() {
        let uri: axum::http::Uri = "/sensors/lab/history?range=24h&strategy=minmax".parse().unwrap();
        let query: Query<HistoryParams> = Query::try_from_uri(&uri).unwrap();
        assert_eq!(query.strategy, Some(DownsamplingStrategy::MinMax));

        let mut levels = vec![1u8; 1_000];
        for k in 0..20 {
            levels[20 + k * 48] = 0;
            levels[21 + k * 48] = 0;
        }
        let response = sensor_history(
            Path("lab".to_string()),
            query,
            HeaderMap::new(),
            state(vec![Reply::Records(status_records(0, &levels))]),
        )
        .await
        .unwrap();

        let body = json_body(response).await;
        let points = body["points"].as_array().unwrap();
        assert!(points.len() <= 300);
        let value_at = |index: usize| {
            let x = index as i64 * 60_000;
            points.iter().find(|p| p["x"] == x).map(|p| p["y"].clone())
        };
        for k in 0..20 {
            assert_eq!(value_at(20 + k * 48), Some(0.0.into()), "outage {k} lost");
            assert_eq!(value_at(22 + k * 48), Some(1.0.into()), "recovery {k} lost");
        }
    }

    #[test]
    fn test_strategy_labels() {
        for (label, strategy) in [
            ("minmax", DownsamplingStrategy::MinMax),
            ("adaptive", DownsamplingStrategy::Adaptive),
            ("transition-preserving", DownsamplingStrategy::TransitionPreserving),
        ] {
            let uri: axum::http::Uri = format!("/x?strategy={label}").parse().unwrap();
            let query: Query<HistoryParams> = Query::try_from_uri(&uri).unwrap();
            assert_eq!(query.strategy, Some(strategy));
            assert_eq!(strategy.as_str(), label);
        }
    }

    #[tokio::test]
    async fn test_unknown_range_is_bad_request() {
        let result = sensor_history(
            Path("IT OFFICE".to_string()),
            params("2w"),
            HeaderMap::new(),
            state(Vec::new()),
        )
        .await;

        let response = result.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_csv_download() {
        let response = sensor_history_csv(
            Path("IT OFFICE".to_string()),
            params("24h"),
            HeaderMap::new(),
            state(vec![Reply::Records(status_records(1_714_521_600, &[1, 0]))]),
        )
        .await
        .unwrap();

        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"IT_OFFICE-status-24h.csv\""
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(
            &bytes[..],
            b"timestamp,status\n2024-05-01T00:00:00Z,online\n2024-05-01T00:01:00Z,offline\n"
        );
    }

    #[tokio::test]
    async fn test_heatmap_rejects_uneven_slots() {
        let query = Query(HistoryParams {
            bucket: Some("5h".to_string()),
            ..HistoryParams::default()
        });
        let result = sensor_heatmap(
            Path("IT OFFICE".to_string()),
            query,
            HeaderMap::new(),
            state(Vec::new()),
        )
        .await;

        assert_eq!(result.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize("IT OFFICE/2"), "IT_OFFICE_2");
    }
}
