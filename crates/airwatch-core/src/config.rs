use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AirwatchError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub chatlog: ChatlogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
}

fn default_llm_provider() -> String {
    "anthropic".to_string()
}

fn default_llm_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_llm_max_tokens() -> u32 {
    512
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: String::new(),
            max_tokens: default_llm_max_tokens(),
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    #[serde(default = "default_sensor_dir")]
    pub data_dir: String,
    #[serde(default = "default_max_files")]
    pub max_files_to_scan: usize,
    /// UTC offset in hours of the sensor timestamps (9 for KST).
    #[serde(default = "default_timezone_offset")]
    pub timezone_offset: i32,
    /// How far a cached reading may be from the requested time point.
    #[serde(default = "default_cache_tolerance")]
    pub cache_tolerance_minutes: i64,
    /// Oldest reading the recommend pipeline accepts as "current".
    #[serde(default = "default_max_reading_age")]
    pub max_reading_age_hours: i64,
}

fn default_sensor_dir() -> String {
    "data/sensor".to_string()
}

fn default_max_files() -> usize {
    50
}

fn default_timezone_offset() -> i32 {
    9 // KST (UTC+9)
}

fn default_cache_tolerance() -> i64 {
    30
}

fn default_max_reading_age() -> i64 {
    48
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            data_dir: default_sensor_dir(),
            max_files_to_scan: default_max_files(),
            timezone_offset: default_timezone_offset(),
            cache_tolerance_minutes: default_cache_tolerance(),
            max_reading_age_hours: default_max_reading_age(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_docs_dir")]
    pub docs_dir: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f64,
    #[serde(default = "default_limit_context_chars")]
    pub limit_context_chars: usize,
}

fn default_docs_dir() -> String {
    "data/docs".to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_relevance_threshold() -> f64 {
    0.7
}

fn default_limit_context_chars() -> usize {
    6000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            docs_dir: default_docs_dir(),
            top_k: default_top_k(),
            relevance_threshold: default_relevance_threshold(),
            limit_context_chars: default_limit_context_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_dir")]
    pub dir: String,
    #[serde(default = "default_session_timeout")]
    pub timeout_secs: i64,
    #[serde(default = "default_max_history")]
    pub max_history_turns: usize,
}

fn default_session_dir() -> String {
    "data/sessions".to_string()
}

fn default_session_timeout() -> i64 {
    3600
}

fn default_max_history() -> usize {
    10
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dir: default_session_dir(),
            timeout_secs: default_session_timeout(),
            max_history_turns: default_max_history(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatlogConfig {
    #[serde(default = "default_chatlog_enabled")]
    pub enabled: bool,
    #[serde(default = "default_chatlog_dir")]
    pub dir: String,
}

fn default_chatlog_enabled() -> bool {
    true
}

fn default_chatlog_dir() -> String {
    "data/chatlogs".to_string()
}

impl Default for ChatlogConfig {
    fn default() -> Self {
        Self {
            enabled: default_chatlog_enabled(),
            dir: default_chatlog_dir(),
        }
    }
}

impl Config {
    /// Load config: defaults → airwatch.toml → env vars (env wins).
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| AirwatchError::Config(format!("failed to read config: {e}")))?;
            Self::parse(&content)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| AirwatchError::Config(format!("failed to parse config: {e}")))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var("AIRWATCH_LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Some(v) = var("AIRWATCH_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = var("AIRWATCH_LLM_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = var("AIRWATCH_SENSOR_DIR") {
            self.sensor.data_dir = v;
        }
        if let Some(v) = var("AIRWATCH_DOCS_DIR") {
            self.retrieval.docs_dir = v;
        }
        if let Some(v) = var("AIRWATCH_SESSION_DIR") {
            self.session.dir = v;
        }
        if let Some(v) = var("AIRWATCH_CHATLOG_ENABLED") {
            self.chatlog.enabled = match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(AirwatchError::Config(format!(
                        "AIRWATCH_CHATLOG_ENABLED must be a boolean, got '{other}'"
                    )))
                }
            };
        }

        if self.session.max_history_turns == 0 {
            return Err(AirwatchError::Config(
                "session.max_history_turns must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
