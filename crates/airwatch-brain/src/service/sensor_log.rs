use std::path::{Path, PathBuf};

use airwatch_core::error::{AirwatchError, Result};
use airwatch_core::types::SensorReading;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::service::time::TimeWindow;

const TIMESTAMP_KEYS: &[&str] = &["timestamp", "time", "datetime"];
const TEMPERATURE_KEYS: &[&str] = &["temperature", "temp", "hourtemp", "mintemp"];
const HUMIDITY_KEYS: &[&str] = &["humidity", "hum", "hourhum", "minhum"];
const GAS_KEYS: &[&str] = &["gas", "co2", "hourgas", "mingas"];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Read access to the indoor sensor log.
#[async_trait]
pub trait SensorStore: Send + Sync {
    /// The reading nearest to `at`, if one lies within `tolerance`.
    async fn closest(&self, at: NaiveDateTime, tolerance: Duration)
        -> Result<Option<SensorReading>>;

    async fn latest(&self) -> Result<Option<SensorReading>>;

    /// Readings inside `window`, oldest first.
    async fn readings_between(&self, window: TimeWindow) -> Result<Vec<SensorReading>>;
}

/// Sensor log stored as JSON/JSONL files in one directory. Loaded once per
/// process and kept sorted by timestamp.
pub struct JsonlSensorLog {
    dir: PathBuf,
    max_files: usize,
    tz_offset: i32,
    readings: OnceCell<Vec<SensorReading>>,
}

impl JsonlSensorLog {
    pub fn new(dir: impl Into<PathBuf>, max_files: usize, tz_offset: i32) -> Self {
        Self {
            dir: dir.into(),
            max_files,
            tz_offset,
            readings: OnceCell::new(),
        }
    }

    async fn all(&self) -> Result<&[SensorReading]> {
        let readings = self.readings.get_or_try_init(|| self.load()).await?;
        Ok(readings.as_slice())
    }

    async fn load(&self) -> Result<Vec<SensorReading>> {
        let mut files = match list_log_files(&self.dir).await {
            Ok(files) => files,
            Err(e) if is_not_found(&e) => {
                warn!("[sensor] log directory {} does not exist", self.dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        // newest first by file name (date-stamped), then cap
        files.sort();
        files.reverse();
        files.truncate(self.max_files);

        let mut readings = Vec::new();
        for path in &files {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                AirwatchError::SensorStore(format!("cannot read {}: {e}", path.display()))
            })?;
            let before = readings.len();
            for record in parse_records(&content) {
                if let Some(reading) = reading_from_record(&record, self.tz_offset) {
                    readings.push(reading);
                }
            }
            debug!(
                "[sensor] {} -> {} readings",
                path.display(),
                readings.len() - before
            );
        }

        readings.sort_by_key(|r| r.timestamp);
        info!(
            "[sensor] loaded {} readings from {} file(s)",
            readings.len(),
            files.len()
        );
        Ok(readings)
    }
}

fn is_not_found(e: &AirwatchError) -> bool {
    matches!(e, AirwatchError::Io(io) if io.kind() == std::io::ErrorKind::NotFound)
}

async fn list_log_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if matches!(ext, "json" | "jsonl") {
            files.push(path);
        }
    }
    Ok(files)
}

/// A file is either a JSON array of objects or one object per line.
fn parse_records(content: &str) -> Vec<Value> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
            return items;
        }
    }
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}

fn first_number(record: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| match record.get(*k)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Parse a log timestamp into local sensor time. Offset-bearing timestamps are
/// shifted to `tz_offset`; naive ones are taken as already local.
pub fn parse_log_timestamp(raw: &str, tz_offset: i32) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt
            .naive_utc()
            .checked_add_signed(Duration::try_hours(tz_offset as i64)?);
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

fn reading_from_record(record: &Value, tz_offset: i32) -> Option<SensorReading> {
    let timestamp = TIMESTAMP_KEYS.iter().find_map(|k| match record.get(*k)? {
        Value::String(s) => parse_log_timestamp(s, tz_offset),
        Value::Number(n) => DateTime::from_timestamp(n.as_i64()?, 0)?
            .naive_utc()
            .checked_add_signed(Duration::try_hours(tz_offset as i64)?),
        _ => None,
    })?;

    let reading = SensorReading {
        timestamp,
        temperature: first_number(record, TEMPERATURE_KEYS),
        humidity: first_number(record, HUMIDITY_KEYS),
        gas: first_number(record, GAS_KEYS),
        age_minutes: None,
    };
    (!reading.present_fields().is_empty()).then_some(reading)
}

#[async_trait]
impl SensorStore for JsonlSensorLog {
    async fn closest(
        &self,
        at: NaiveDateTime,
        tolerance: Duration,
    ) -> Result<Option<SensorReading>> {
        let readings = self.all().await?;
        let best = readings
            .iter()
            .min_by_key(|r| (r.timestamp - at).num_seconds().abs())
            .filter(|r| (r.timestamp - at).abs() <= tolerance)
            .cloned();
        if best.is_none() {
            debug!("[sensor] nothing within {}m of {at}", tolerance.num_minutes());
        }
        Ok(best)
    }

    async fn latest(&self) -> Result<Option<SensorReading>> {
        Ok(self.all().await?.last().cloned())
    }

    async fn readings_between(&self, window: TimeWindow) -> Result<Vec<SensorReading>> {
        Ok(self
            .all()
            .await?
            .iter()
            .filter(|r| window.contains(r.timestamp))
            .cloned()
            .collect())
    }
}
