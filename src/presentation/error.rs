// HTTP error mapping
use crate::application::error::{ExportError, HistoryError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Shown to the user whenever a render fails for reasons they cannot fix in the request.
pub const USER_MESSAGE: &str = "Could not load history. Try a shorter range or refresh.";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("Response encoding failed")]
    Encoding(StatusCode),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::History(HistoryError::InvalidRange(_) | HistoryError::InvalidBucket(_)) => {
                StatusCode::BAD_REQUEST
            }
            AppError::History(HistoryError::Exhausted { .. } | HistoryError::Cancelled) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::History(HistoryError::SyntheticFailed(_)) | AppError::Export(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Encoding(status) => *status,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_client_error() {
            self.to_string()
        } else {
            tracing::error!("History request failed: {}", self);
            USER_MESSAGE.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::BadRequest("range".into()), StatusCode::BAD_REQUEST),
            (HistoryError::InvalidBucket("5h".into()).into(), StatusCode::BAD_REQUEST),
            (
                HistoryError::Exhausted { sensor_id: "IT OFFICE".into() }.into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                HistoryError::SyntheticFailed("empty window".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_server_errors_hide_details() {
        let response = AppError::from(HistoryError::Exhausted {
            sensor_id: "IT OFFICE".into(),
        })
        .into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], USER_MESSAGE);
    }
}
