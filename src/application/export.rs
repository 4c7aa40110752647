// CSV export of rendered series
use crate::application::error::ExportError;
use crate::domain::history::GAP_SENTINEL;
use crate::domain::telemetry::{Field, TimeSeriesPoint};
use chrono::{DateTime, SecondsFormat};

/// Serialize a series as `timestamp,<field>` rows.
///
/// Status series write `online` / `offline`. Gap slots are skipped.
pub fn to_csv(points: &[TimeSeriesPoint], field: Field) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["timestamp", field.as_str()])?;

    for point in points {
        if field != Field::Status && point.value == GAP_SENTINEL {
            continue;
        }
        let Some(time) = DateTime::from_timestamp_millis(point.time_ms) else {
            continue;
        };
        let timestamp = time.to_rfc3339_opts(SecondsFormat::Secs, true);
        let value = match field {
            Field::Status => point.status().as_str().to_string(),
            _ => point.value.to_string(),
        };
        writer.write_record([timestamp.as_str(), value.as_str()])?;
    }

    let bytes = writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8(bytes)?)
}
