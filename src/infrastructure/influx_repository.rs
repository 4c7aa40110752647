// InfluxDB repository implementation
use crate::application::error::QueryError;
use crate::application::history_repository::{HistoryRepository, QueryOptions, QueryResponse};
use crate::domain::range::{Resolution, TimeRange};
use crate::domain::telemetry::{Field, RawRecord};
use crate::infrastructure::config::{prepare_query, InfluxSettings};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct InfluxRepository {
    client: reqwest::Client,
    settings: InfluxSettings,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResponse {
    #[serde(default)]
    results: Vec<InfluxQLResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResult {
    #[serde(default)]
    series: Option<Vec<InfluxQLSeries>>,
    #[serde(default)]
    error: Option<String>,
    /// Set when the server truncated the result.
    #[serde(default)]
    partial: bool,
}

#[derive(Debug, Deserialize)]
struct InfluxQLSeries {
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl InfluxRepository {
    pub fn new(settings: InfluxSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings: InfluxSettings {
                host: settings.host.trim_end_matches('/').to_string(),
                ..settings
            },
        }
    }

    fn build_query_url(&self, query: &str) -> String {
        let encoded_query = urlencoding::encode(query);
        format!(
            "{}/query?db={}&rp={}&epoch=ms&q={}",
            self.settings.host, self.settings.database, self.settings.retention_policy, encoded_query
        )
    }

    /// Render the InfluxQL text for one tier of one chunk.
    fn build_query(
        &self,
        sensor_id: &str,
        range: &str,
        options: &QueryOptions,
    ) -> Result<String, QueryError> {
        let (start, end) = match (options.start_time, options.end_time) {
            (Some(start), Some(end)) => (start, end),
            _ => TimeRange::parse(range, options.start_time, options.end_time)
                .map(|r| r.window(Utc::now()))
                .ok_or_else(|| QueryError::transport(format!("unknown range '{range}'")))?,
        };

        let column = match options.field {
            Field::Status => self.settings.status_column.as_str(),
            field => field.as_str(),
        };
        let (select, group_by) = match options.resolution.as_influx() {
            Some(interval) => {
                let aggregate = match options.field {
                    Field::Status => "last",
                    _ => "mean",
                };
                (
                    format!("{aggregate}(\"{column}\") AS value"),
                    format!(" GROUP BY time({interval}) fill(none)"),
                )
            }
            None => (format!("\"{column}\" AS value"), String::new()),
        };

        let mut vars = HashMap::new();
        vars.insert("select".to_string(), select);
        vars.insert("measurement".to_string(), self.settings.measurement.clone());
        vars.insert("sensor".to_string(), escape_literal(sensor_id));
        vars.insert(
            "start".to_string(),
            start.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        vars.insert(
            "end".to_string(),
            end.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        vars.insert("group_by".to_string(), group_by);
        vars.insert("limit".to_string(), limit_for(options).to_string());

        Ok(prepare_query(&self.settings.query_template, &vars))
    }

    async fn execute_query(&self, query: &str, timeout: Duration) -> Result<InfluxQLResponse, QueryError> {
        let url = self.build_query_url(query);
        let after_ms = timeout.as_millis() as u64;

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Token {}", self.settings.token))
            .header("Accept", "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(e, after_ms))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::transport(format!(
                "InfluxDB query failed with status {status}: {body}"
            )));
        }

        response
            .json::<InfluxQLResponse>()
            .await
            .map_err(|e| request_error(e, after_ms))
    }
}

#[async_trait]
impl HistoryRepository for InfluxRepository {
    async fn query_history(
        &self,
        sensor_id: &str,
        range: &str,
        options: &QueryOptions,
        cancel: CancellationToken,
    ) -> Result<QueryResponse, QueryError> {
        let query = self.build_query(sensor_id, range, options)?;
        tracing::debug!("Executing history query: {}", query);

        let timeout = Duration::from_millis(options.timeout_ms.max(1));
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            response = self.execute_query(&query, timeout) => response?,
        };

        into_records(response, options.field)
    }
}

/// Row cap: the tier's budget, or for raw selects a generous ceiling on the span.
fn limit_for(options: &QueryOptions) -> usize {
    let limit = match (options.resolution, options.start_time, options.end_time) {
        (Resolution::Auto, Some(start), Some(end)) => Resolution::ThirtySeconds
            .points_in(end - start)
            .max(options.max_points),
        _ => options.max_points,
    };
    limit.max(1)
}

fn request_error(e: reqwest::Error, after_ms: u64) -> QueryError {
    if e.is_timeout() {
        QueryError::Timeout { after_ms }
    } else {
        QueryError::transport(format!("InfluxDB request failed: {e}"))
    }
}

/// Flatten every series into records, keeping rows that arrived alongside an error.
fn into_records(response: InfluxQLResponse, field: Field) -> Result<QueryResponse, QueryError> {
    let mut data = Vec::new();
    let mut failure = response.error;
    let mut truncated = false;

    for result in response.results {
        if let Some(error) = result.error {
            failure.get_or_insert(error);
        }
        truncated |= result.partial;

        for series in result.series.unwrap_or_default() {
            let time_idx = series.columns.iter().position(|c| c == "time").unwrap_or(0);
            let value_idx = series.columns.iter().position(|c| c == "value").unwrap_or(1);

            for row in series.values {
                let (Some(time), Some(value)) = (row.get(time_idx), row.get(value_idx)) else {
                    continue;
                };
                if value.is_null() {
                    continue;
                }
                let mut record = RawRecord {
                    time: Some(time.clone()),
                    ..RawRecord::default()
                };
                match field {
                    Field::Status => record.online = Some(value.clone()),
                    _ => record.value = Some(value.clone()),
                }
                data.push(record);
            }
        }
    }

    match failure {
        Some(message) => Err(QueryError::Transport {
            message: format!("InfluxDB query error: {message}"),
            partial: data,
        }),
        None if truncated => Err(QueryError::Transport {
            message: "InfluxDB truncated the result".to_string(),
            partial: data,
        }),
        None => Ok(QueryResponse { data }),
    }
}

/// Escape a value for a single-quoted InfluxQL string literal.
fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
