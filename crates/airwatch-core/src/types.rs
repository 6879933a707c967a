use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Timestamp layout used in sensor logs, answers and turn records.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Generate a fresh random identifier (sessions, turn records).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// One of the three measured quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Temperature,
    Humidity,
    Gas,
}

impl Field {
    pub const ALL: [Field; 3] = [Field::Temperature, Field::Humidity, Field::Gas];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Temperature => "temperature",
            Field::Humidity => "humidity",
            Field::Gas => "gas",
        }
    }

    /// Korean display label.
    pub fn label(self) -> &'static str {
        match self {
            Field::Temperature => "온도",
            Field::Humidity => "습도",
            Field::Gas => "CO2",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Field::Temperature => "℃",
            Field::Humidity => "%",
            Field::Gas => "ppm",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subset of {temperature, humidity, gas}. Serialized as a list of field names
/// in canonical order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<Field>", from = "Vec<Field>")]
pub struct FieldSet {
    pub temperature: bool,
    pub humidity: bool,
    pub gas: bool,
}

impl FieldSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            temperature: true,
            humidity: true,
            gas: true,
        }
    }

    pub fn only(field: Field) -> Self {
        let mut set = Self::empty();
        set.insert(field);
        set
    }

    pub fn insert(&mut self, field: Field) {
        match field {
            Field::Temperature => self.temperature = true,
            Field::Humidity => self.humidity = true,
            Field::Gas => self.gas = true,
        }
    }

    pub fn contains(&self, field: Field) -> bool {
        match field {
            Field::Temperature => self.temperature,
            Field::Humidity => self.humidity,
            Field::Gas => self.gas,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.temperature || self.humidity || self.gas)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn intersection(&self, other: &FieldSet) -> FieldSet {
        FieldSet {
            temperature: self.temperature && other.temperature,
            humidity: self.humidity && other.humidity,
            gas: self.gas && other.gas,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Field> + '_ {
        Field::ALL.into_iter().filter(|f| self.contains(*f))
    }
}

impl From<FieldSet> for Vec<Field> {
    fn from(set: FieldSet) -> Self {
        set.iter().collect()
    }
}

impl From<Vec<Field>> for FieldSet {
    fn from(fields: Vec<Field>) -> Self {
        let mut set = FieldSet::empty();
        for f in fields {
            set.insert(f);
        }
        set
    }
}

/// A sensor snapshot. `age_minutes` is only filled by lookups made relative to "now".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub timestamp: NaiveDateTime,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub gas: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_minutes: Option<i64>,
}

impl SensorReading {
    pub fn value(&self, field: Field) -> Option<f64> {
        match field {
            Field::Temperature => self.temperature,
            Field::Humidity => self.humidity,
            Field::Gas => self.gas,
        }
    }

    /// Fields that carry a value in this reading.
    pub fn present_fields(&self) -> FieldSet {
        let mut set = FieldSet::empty();
        for f in Field::ALL {
            if self.value(f).is_some() {
                set.insert(f);
            }
        }
        set
    }

    pub fn timestamp_str(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// "온도 24.5℃, 습도 60%" for the requested fields that are present.
    /// Returns `None` when the intersection is empty.
    pub fn describe(&self, requested: &FieldSet) -> Option<String> {
        let parts: Vec<String> = requested
            .iter()
            .filter_map(|f| {
                self.value(f)
                    .map(|v| format!("{} {v}{}", f.label(), f.unit()))
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// Route tag: which cascade branch produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    General,
    SensorDailyTemp,
    SensorDailyAll,
    SensorTodayAll,
    SensorExtrema,
    SensorCache,
    SensorLatest,
    Sensor,
    Error,
}

impl Route {
    pub fn as_str(self) -> &'static str {
        match self {
            Route::General => "general",
            Route::SensorDailyTemp => "sensor_daily_temp",
            Route::SensorDailyAll => "sensor_daily_all",
            Route::SensorTodayAll => "sensor_today_all",
            Route::SensorExtrema => "sensor_extrema",
            Route::SensorCache => "sensor_cache",
            Route::SensorLatest => "sensor_latest",
            Route::Sensor => "sensor",
            Route::Error => "error",
        }
    }

    pub fn mode(self) -> Mode {
        match self {
            Route::General => Mode::GeneralLlm,
            Route::SensorDailyTemp | Route::SensorDailyAll => Mode::DailyStatistics,
            Route::SensorTodayAll => Mode::TodayStatistics,
            Route::SensorExtrema => Mode::ExtremaAnalysis,
            Route::SensorCache => Mode::CachedData,
            Route::SensorLatest => Mode::LatestData,
            Route::Sensor => Mode::Rag,
            Route::Error => Mode::Error,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    GeneralLlm,
    DailyStatistics,
    TodayStatistics,
    ExtremaAnalysis,
    CachedData,
    LatestData,
    Rag,
    RecommendBot,
    Error,
}

/// Chatbot output for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub answer: String,
    pub route: Route,
    pub session_id: String,
    pub turn_id: u64,
    pub processing_time: f64,
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_found: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Recommend-bot output for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendEnvelope {
    pub answer: String,
    pub status: Status,
    pub processing_time: f64,
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// Per-session context carried between turns to resolve follow-up queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorContext {
    #[serde(default)]
    pub last_timestamp: Option<NaiveDateTime>,
    #[serde(default)]
    pub last_fields: FieldSet,
    /// Keyed follow-up context, e.g. `time_range` → `{"start": .., "end": ..}`.
    #[serde(default)]
    pub followup: BTreeMap<String, serde_json::Value>,
}

impl SensorContext {
    pub fn is_empty(&self) -> bool {
        self.last_timestamp.is_none() && self.last_fields.is_empty() && self.followup.is_empty()
    }
}

/// A retrieval candidate with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub id: String,
    pub schema: String,
    pub score: f64,
}

/// One persisted conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub session_id: String,
    pub turn_id: u64,
    pub ts_kst: String,
    pub route: Route,
    pub query: String,
    pub answer: String,
    #[serde(default)]
    pub docs: Vec<ScoredDocument>,
    #[serde(default)]
    pub last_sensor_ctx: SensorContext,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn text(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}
