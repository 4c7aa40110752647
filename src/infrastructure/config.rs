use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const MIN_RENDER_CAP: usize = 60;
const MAX_RENDER_CAP: usize = 500;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    pub influx: InfluxSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InfluxSettings {
    pub host: String,
    pub token: String,
    pub database: String,
    #[serde(default = "default_retention_policy")]
    pub retention_policy: String,
    #[serde(default = "default_measurement")]
    pub measurement: String,
    /// Column holding the online flag.
    #[serde(default = "default_status_column")]
    pub status_column: String,
    #[serde(default = "default_query_template")]
    pub query_template: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineSettings {
    #[serde(default = "default_normal_timeout_ms")]
    pub normal_timeout_ms: u64,
    #[serde(default = "default_degraded_timeout_ms")]
    pub degraded_timeout_ms: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default)]
    pub cache_max_entries: Option<usize>,
    #[serde(default)]
    pub max_chunk_span_hours: Option<i64>,
    #[serde(default)]
    pub concurrent_chunks: bool,
    #[serde(default = "default_render_cap")]
    pub render_cap: usize,
    /// Wall-clock zone of hour-slot heatmap buckets.
    #[serde(default = "default_local_utc_offset_minutes")]
    pub local_utc_offset_minutes: i32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            normal_timeout_ms: default_normal_timeout_ms(),
            degraded_timeout_ms: default_degraded_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: None,
            max_chunk_span_hours: None,
            concurrent_chunks: false,
            render_cap: default_render_cap(),
            local_utc_offset_minutes: default_local_utc_offset_minutes(),
        }
    }
}

impl PipelineSettings {
    pub fn render_cap(&self) -> usize {
        self.render_cap.clamp(MIN_RENDER_CAP, MAX_RENDER_CAP)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn degraded_timeout(&self) -> Duration {
        Duration::from_millis(self.degraded_timeout_ms)
    }

    pub fn max_chunk_span(&self) -> Option<chrono::Duration> {
        self.max_chunk_span_hours
            .filter(|hours| *hours > 0)
            .map(chrono::Duration::hours)
    }

    pub fn local_zone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.local_utc_offset_minutes * 60).unwrap_or_else(|| {
            tracing::warn!(
                "Invalid local UTC offset {} min, using UTC",
                self.local_utc_offset_minutes
            );
            Utc.fix()
        })
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_retention_policy() -> String {
    "autogen".to_string()
}

fn default_measurement() -> String {
    "bme280".to_string()
}

fn default_status_column() -> String {
    "online".to_string()
}

fn default_query_template() -> String {
    "SELECT ${select} FROM \"${measurement}\" WHERE \"location\" = '${sensor}' \
     AND time >= '${start}' AND time <= '${end}'${group_by} ORDER BY time ASC LIMIT ${limit}"
        .to_string()
}

fn default_normal_timeout_ms() -> u64 {
    20_000
}

fn default_degraded_timeout_ms() -> u64 {
    15_000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_render_cap() -> usize {
    300
}

fn default_local_utc_offset_minutes() -> i32 {
    60
}

/// Layered config: optional `config/history.*` file, then `SENSOR_HISTORY__*` env vars.
pub fn load_config() -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/history").required(false))
        .add_source(
            config::Environment::with_prefix("SENSOR_HISTORY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Replace template variables in a query string
pub fn prepare_query(query: &str, vars: &HashMap<String, String>) -> String {
    let mut result = query.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_query() {
        let mut vars = HashMap::new();
        vars.insert("sensor".to_string(), "IT OFFICE".to_string());
        vars.insert("limit".to_string(), "288".to_string());

        let query = "SELECT * FROM bme280 WHERE \"location\" = '${sensor}' LIMIT ${limit}";
        let result = prepare_query(query, &vars);

        assert_eq!(result, "SELECT * FROM bme280 WHERE \"location\" = 'IT OFFICE' LIMIT 288");
    }

    #[test]
    fn test_pipeline_defaults_from_partial_file() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [influx]
                host = "http://localhost:8086"
                token = "t"
                database = "sensors"

                [pipeline]
                render_cap = 5000
                max_chunk_span_hours = 744
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: AppConfig = settings.try_deserialize().unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.influx.retention_policy, "autogen");
        assert_eq!(config.pipeline.normal_timeout_ms, 20_000);
        assert_eq!(config.pipeline.degraded_timeout(), Duration::from_secs(15));
        assert_eq!(config.pipeline.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.pipeline.render_cap(), 500);
        assert_eq!(
            config.pipeline.max_chunk_span(),
            Some(chrono::Duration::days(31))
        );
        assert_eq!(
            config.pipeline.local_zone(),
            FixedOffset::east_opt(3600).unwrap()
        );
    }
}
