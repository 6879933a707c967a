//! In-process fakes that record every call, for cascade and recommend tests.

use std::sync::{Arc, Mutex};

use airwatch_core::config::Config;
use airwatch_core::error::{AirwatchError, Result};
use airwatch_core::types::{ScoredDocument, SensorReading};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};

use super::{Brain, BrainParts};
use crate::service::chatlog::TurnLogger;
use crate::service::intent::KeywordIntentDetector;
use crate::service::llm::Generator;
use crate::service::query::Query;
use crate::service::retrieval::{DocumentRetriever, Retrieval};
use crate::service::sensor_log::SensorStore;
use crate::service::session::MemorySessionStore;
use crate::service::statistics::Statistics;
use crate::service::time::{fixed_clock, TimeWindow};

pub type Calls = Arc<Mutex<Vec<String>>>;

fn record(calls: &Calls, name: impl Into<String>) {
    calls.lock().unwrap().push(name.into());
}

pub fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 8, 14)
        .unwrap()
        .and_hms_opt(15, 30, 0)
        .unwrap()
}

pub fn reading(
    ts: &str,
    temperature: Option<f64>,
    humidity: Option<f64>,
    gas: Option<f64>,
) -> SensorReading {
    SensorReading {
        timestamp: NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S").unwrap(),
        temperature,
        humidity,
        gas,
        age_minutes: None,
    }
}

#[derive(Default)]
pub struct FakeStats {
    pub daily_temperature: Option<String>,
    pub daily_all: Option<String>,
    pub today_all: Option<String>,
    pub extrema: Option<String>,
    pub calls: Calls,
}

#[async_trait]
impl Statistics for FakeStats {
    async fn daily_average_temperature(&self, _: &Query) -> Result<Option<String>> {
        record(&self.calls, "daily_temperature");
        Ok(self.daily_temperature.clone())
    }

    async fn daily_average_all(&self, _: &Query) -> Result<Option<String>> {
        record(&self.calls, "daily_all");
        Ok(self.daily_all.clone())
    }

    async fn today_average_all(&self) -> Result<Option<String>> {
        record(&self.calls, "today_all");
        Ok(self.today_all.clone())
    }

    async fn extrema_time(&self, _: &Query) -> Result<Option<String>> {
        record(&self.calls, "extrema");
        Ok(self.extrema.clone())
    }
}

/// Returns `readings` for every lookup, ignoring tolerance.
#[derive(Default)]
pub struct FakeSensors {
    pub readings: Vec<SensorReading>,
    pub calls: Calls,
}

#[async_trait]
impl SensorStore for FakeSensors {
    async fn closest(&self, _: NaiveDateTime, _: Duration) -> Result<Option<SensorReading>> {
        record(&self.calls, "closest");
        Ok(self.readings.first().cloned())
    }

    async fn latest(&self) -> Result<Option<SensorReading>> {
        record(&self.calls, "latest");
        Ok(self.readings.last().cloned())
    }

    async fn readings_between(&self, window: TimeWindow) -> Result<Vec<SensorReading>> {
        record(&self.calls, "between");
        Ok(self
            .readings
            .iter()
            .filter(|r| window.contains(r.timestamp))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakeRetriever {
    pub docs: Vec<ScoredDocument>,
    pub fail: bool,
    pub calls: Calls,
}

#[async_trait]
impl DocumentRetriever for FakeRetriever {
    async fn retrieve(&self, query: &str) -> Result<Retrieval> {
        record(&self.calls, query);
        if self.fail {
            return Err(AirwatchError::Retrieval("index unavailable".to_string()));
        }
        Ok(Retrieval {
            docs: self.docs.clone(),
            context: "[rawdata.json]\n...".to_string(),
        })
    }
}

/// Answers the route classifier with `route_reply` and everything else with
/// "generated".
pub struct FakeGenerator {
    pub route_reply: String,
    pub calls: Calls,
}

impl Default for FakeGenerator {
    fn default() -> Self {
        Self {
            route_reply: r#"{"route":"general"}"#.to_string(),
            calls: Calls::default(),
        }
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        record(&self.calls, prompt);
        if prompt.starts_with("Classify") {
            Ok(self.route_reply.clone())
        } else {
            Ok("generated".to_string())
        }
    }
}

#[derive(Default)]
pub struct FakeTurnLog {
    pub calls: Calls,
}

#[async_trait]
impl TurnLogger for FakeTurnLog {
    async fn append(&self, turn: &airwatch_core::types::TurnRecord) -> Result<()> {
        record(
            &self.calls,
            format!("{}:{}:{}", turn.session_id, turn.turn_id, turn.route),
        );
        Ok(())
    }
}

pub struct Fakes {
    pub stats: FakeStats,
    pub sensors: FakeSensors,
    pub retriever: FakeRetriever,
    pub generator: FakeGenerator,
    pub chatlog: Option<FakeTurnLog>,
    pub max_history: usize,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            stats: FakeStats::default(),
            sensors: FakeSensors::default(),
            retriever: FakeRetriever::default(),
            generator: FakeGenerator::default(),
            chatlog: None,
            max_history: 10,
        }
    }
}

impl Fakes {
    pub fn build(self) -> Brain {
        let sessions = Arc::new(MemorySessionStore::new(Duration::hours(1), self.max_history));
        let chatlog: Option<Arc<dyn TurnLogger>> = match self.chatlog {
            Some(log) => Some(Arc::new(log)),
            None => None,
        };
        Brain::from_parts(
            Config::default(),
            BrainParts {
                sessions,
                sensors: Arc::new(self.sensors),
                stats: Arc::new(self.stats),
                retriever: Arc::new(self.retriever),
                generator: Arc::new(self.generator),
                chatlog,
                detector: Arc::new(KeywordIntentDetector),
                clock: fixed_clock(now()),
            },
        )
    }
}
