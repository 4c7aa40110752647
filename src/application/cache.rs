// In-memory TTL cache of rendered history series
use crate::domain::range::TimeRange;
use crate::domain::telemetry::{Status, TimeSeriesPoint};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default time-to-live of a cached series.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub sensor_id: String,
    pub range: TimeRange,
}

impl CacheKey {
    pub fn new(sensor_id: impl Into<String>, range: TimeRange) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            range,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    series: Vec<TimeSeriesPoint>,
    fetched_at: Instant,
}

/// Process-wide series cache, constructed once in `main` and shared by handle.
///
/// Entries are all-or-nothing and expire `ttl` after they were stored. With
/// `max_entries` set, inserting into a full cache evicts the stalest entry.
#[derive(Debug)]
pub struct SeriesCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    max_entries: Option<usize>,
}

impl SeriesCache {
    pub fn new(ttl: Duration, max_entries: Option<usize>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<TimeSeriesPoint>> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &CacheKey, now: Instant) -> Option<Vec<TimeSeriesPoint>> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|entry| !self.is_expired(entry, now))
            .map(|entry| entry.series.clone())
    }

    pub fn put(&self, key: CacheKey, series: Vec<TimeSeriesPoint>) {
        self.put_at(key, series, Instant::now());
    }

    pub fn put_at(&self, key: CacheKey, series: Vec<TimeSeriesPoint>, now: Instant) {
        let mut entries = self.entries.write();
        entries.retain(|_, entry| !self.is_expired(entry, now));

        if let Some(max) = self.max_entries {
            if !entries.contains_key(&key) && entries.len() >= max {
                let stalest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.fetched_at)
                    .map(|(k, _)| k.clone());
                if let Some(stalest) = stalest {
                    tracing::debug!("Evicting cached series for {}", stalest.sensor_id);
                    entries.remove(&stalest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                series,
                fetched_at: now,
            },
        );
    }

    /// Status at the end of the freshest live entry for this sensor, any range.
    pub fn last_known_status(&self, sensor_id: &str) -> Option<Status> {
        self.last_known_status_at(sensor_id, Instant::now())
    }

    pub fn last_known_status_at(&self, sensor_id: &str, now: Instant) -> Option<Status> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|(key, entry)| key.sensor_id == sensor_id && !self.is_expired(entry, now))
            .max_by_key(|(_, entry)| entry.fetched_at)
            .and_then(|(_, entry)| entry.series.last())
            .map(TimeSeriesPoint::status)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.fetched_at) > self.ttl
    }
}

impl Default for SeriesCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, None)
    }
}
