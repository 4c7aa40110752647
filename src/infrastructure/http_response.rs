// HTTP response utilities for JSON/CSV bodies with optional Brotli encoding
use async_compression::tokio::bufread::BrotliEncoder;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Response, StatusCode},
};
use serde::Serialize;
use tokio::io::AsyncReadExt;

/// Whether the client advertised Brotli in `Accept-Encoding`.
pub fn accepts_brotli(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.contains("br"))
        .unwrap_or(false)
}

/// Serialize `data` as JSON, Brotli-compressed when `compress` is set.
pub async fn json_response<T: Serialize>(
    data: &T,
    compress: bool,
) -> Result<Response<Body>, StatusCode> {
    let bytes = serde_json::to_vec(data).map_err(|e| {
        tracing::error!("JSON serialization error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    encoded_response(bytes, "application/json", compress, None).await
}

/// CSV download, offered as an attachment named `filename`.
pub async fn csv_response(
    body: String,
    filename: &str,
    compress: bool,
) -> Result<Response<Body>, StatusCode> {
    let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', ""));
    encoded_response(
        body.into_bytes(),
        "text/csv; charset=utf-8",
        compress,
        Some(disposition),
    )
    .await
}

async fn encoded_response(
    bytes: Vec<u8>,
    content_type: &'static str,
    compress: bool,
    disposition: Option<String>,
) -> Result<Response<Body>, StatusCode> {
    let (body_bytes, content_encoding) = if compress {
        let original = bytes.len();
        let mut encoder = BrotliEncoder::new(std::io::Cursor::new(bytes));
        let mut compressed = Vec::new();
        encoder.read_to_end(&mut compressed).await.map_err(|e| {
            tracing::error!("Brotli compression error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        tracing::debug!("Compressed {} -> {} bytes", original, compressed.len());
        (compressed, Some("br"))
    } else {
        (bytes, None)
    };

    let mut response_builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, body_bytes.len())
        .header(header::VARY, "accept-encoding");

    if let Some(encoding) = content_encoding {
        response_builder = response_builder.header(header::CONTENT_ENCODING, encoding);
    }
    if let Some(disposition) = disposition {
        let value = HeaderValue::from_str(&disposition).map_err(|e| {
            tracing::error!("Invalid Content-Disposition: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        response_builder = response_builder.header(header::CONTENT_DISPOSITION, value);
    }

    response_builder.body(Body::from(body_bytes)).map_err(|e| {
        tracing::error!("Response build error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
