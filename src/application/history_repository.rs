// Repository trait for sensor history access
use crate::application::error::QueryError;
use crate::domain::history::DownsamplingStrategy;
use crate::domain::range::Resolution;
use crate::domain::telemetry::{Field, RawRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Per-call knobs passed through to the time-series store.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub field: Field,
    pub resolution: Resolution,
    pub max_points: usize,
    pub downsampling: DownsamplingStrategy,
    pub timeout_ms: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    pub data: Vec<RawRecord>,
}

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Fetch raw rows for one sensor and range.
    ///
    /// Implementations should stop work once `cancel` fires. Callers enforce
    /// their own timeout and drop the future when it expires.
    async fn query_history(
        &self,
        sensor_id: &str,
        range: &str,
        options: &QueryOptions,
        cancel: CancellationToken,
    ) -> Result<QueryResponse, QueryError>;
}
