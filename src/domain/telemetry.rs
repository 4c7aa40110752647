// Telemetry data domain models
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Literal the sensors publish on their status topic when they go down.
pub const OFFLINE_MARKER: &str = "offline";

/// Timestamp layout used by the sensor publisher (always UTC).
const PUBLISHER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single rendered point. Status series carry `1.0` / `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    #[serde(rename = "x")]
    pub time_ms: i64,
    #[serde(rename = "y")]
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self { time_ms, value }
    }

    pub fn status(&self) -> Status {
        Status::from_level(self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Offline,
}

impl Status {
    /// Level rule shared by ingestion and every downsampling stage: non-zero is online.
    pub fn from_level(value: f64) -> Self {
        if value != 0.0 {
            Status::Online
        } else {
            Status::Offline
        }
    }

    pub fn level(self) -> f64 {
        match self {
            Status::Online => 1.0,
            Status::Offline => 0.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Online => "online",
            Status::Offline => "offline",
        }
    }

    /// Normalize the loosely typed status columns of a record.
    ///
    /// An explicit `online` flag wins. Otherwise the point is online unless
    /// `status` carries the offline marker (or a numeric zero).
    pub fn from_record(record: &RawRecord) -> Self {
        if let Some(status) = record.online.as_ref().and_then(status_from_flag) {
            return status;
        }

        match &record.status {
            Some(Value::String(s)) if s.trim().eq_ignore_ascii_case(OFFLINE_MARKER) => {
                Status::Offline
            }
            Some(Value::Number(n)) if n.as_f64() == Some(0.0) => Status::Offline,
            _ => Status::Online,
        }
    }
}

fn status_from_flag(value: &Value) -> Option<Status> {
    match value {
        Value::Bool(true) => Some(Status::Online),
        Value::Bool(false) => Some(Status::Offline),
        Value::Number(n) => n.as_f64().map(Status::from_level),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "online" | "true" | "1" => Some(Status::Online),
            "offline" | "false" | "0" => Some(Status::Offline),
            _ => None,
        },
        _ => None,
    }
}

/// Which column of a sensor a query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    #[default]
    Status,
    Temperature,
    Humidity,
    Pressure,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Status => "status",
            Field::Temperature => "temperature",
            Field::Humidity => "humidity",
            Field::Pressure => "pressure",
        }
    }

    /// Physical range of the BME280 readings; anything outside is a bad sample.
    pub fn valid_range(&self) -> Option<RangeInclusive<f64>> {
        match self {
            Field::Status => None,
            Field::Temperature => Some(-40.0..=85.0),
            Field::Humidity => Some(0.0..=100.0),
            Field::Pressure => Some(300.0..=1100.0),
        }
    }
}

/// A row as the time-series store hands it over, before any interpretation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default, alias = "timestamp")]
    pub time: Option<Value>,
    #[serde(default)]
    pub online: Option<Value>,
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default, alias = "temperature", alias = "humidity", alias = "pressure")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("{field} reading {value} outside plausible range")]
    ImplausibleValue { field: &'static str, value: f64 },

    #[error("record has no {0} reading")]
    MissingValue(&'static str),
}

/// A typed point. Produced once per record at ingestion and never re-interpreted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPoint {
    pub time: DateTime<Utc>,
    pub status: Status,
    pub value: Option<f64>,
}

impl RawPoint {
    pub fn new(time: DateTime<Utc>, status: Status, value: Option<f64>) -> Self {
        Self {
            time,
            status,
            value,
        }
    }

    pub fn from_record(record: &RawRecord, field: Field) -> Result<Self, IngestError> {
        let time = record
            .time
            .as_ref()
            .and_then(parse_timestamp)
            .ok_or_else(|| {
                IngestError::InvalidTimestamp(
                    record
                        .time
                        .as_ref()
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "<missing>".to_string()),
                )
            })?;

        let status = Status::from_record(record);
        let value = record.value.as_ref().and_then(numeric);

        if let Some(range) = field.valid_range() {
            let reading = value.ok_or(IngestError::MissingValue(field.as_str()))?;
            if !range.contains(&reading) {
                return Err(IngestError::ImplausibleValue {
                    field: field.as_str(),
                    value: reading,
                });
            }
        }

        Ok(Self::new(time, status, value))
    }

    pub fn time_ms(&self) -> i64 {
        self.time.timestamp_millis()
    }

    pub fn to_status_point(&self) -> TimeSeriesPoint {
        TimeSeriesPoint::new(self.time_ms(), self.status.level())
    }

    pub fn to_measurement_point(&self) -> Option<TimeSeriesPoint> {
        self.value.map(|v| TimeSeriesPoint::new(self.time_ms(), v))
    }

    /// Flatten batches, stable-sort by time and keep the first point seen per timestamp.
    pub fn merge<I>(batches: I) -> Vec<RawPoint>
    where
        I: IntoIterator<Item = Vec<RawPoint>>,
    {
        let mut merged: Vec<RawPoint> = batches.into_iter().flatten().collect();
        merged.sort_by_key(|p| p.time);
        merged.dedup_by_key(|p| p.time);
        merged
    }
}

/// Accepts RFC 3339, the publisher's `YYYY-MM-DD HH:MM:SS` (UTC) and epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, PUBLISHER_TIME_FORMAT)
                        .ok()
                        .map(|t| t.and_utc())
                })
        }
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
