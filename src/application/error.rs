// Error taxonomy for the history pipeline
use crate::domain::telemetry::RawRecord;
use thiserror::Error;

/// Failures of the external time-series query contract.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("query timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("query cancelled")]
    Cancelled,

    /// Non-timeout failure. `partial` holds whatever rows arrived before it.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        partial: Vec<RawRecord>,
    },
}

impl QueryError {
    pub fn transport(message: impl Into<String>) -> Self {
        QueryError::Transport {
            message: message.into(),
            partial: Vec::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("invalid bucket: {0}")]
    InvalidBucket(String),

    #[error("all query tiers failed for sensor {sensor_id}")]
    Exhausted { sensor_id: String },

    #[error("could not generate placeholder history: {0}")]
    SyntheticFailed(String),

    #[error("request cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV output is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}
