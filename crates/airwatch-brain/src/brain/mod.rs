use std::sync::Arc;

use airwatch_core::config::Config;
use airwatch_core::error::{AirwatchError, Result};
use chrono::Duration;
use tracing::info;

use crate::service::chatlog::{JsonlChatLog, TurnLogger};
use crate::service::intent::{IntentDetector, KeywordIntentDetector};
use crate::service::llm::{Generator, LlmDispatch};
use crate::service::retrieval::{DocumentRetriever, LocalDocumentIndex};
use crate::service::sensor_log::{JsonlSensorLog, SensorStore};
use crate::service::session::{FileSessionStore, SessionStore};
use crate::service::statistics::{LogStatistics, Statistics};
use crate::service::time::{system_clock, Clock};

mod compose;
mod recommend;
mod router;

#[cfg(test)]
pub(crate) mod testing;

/// Ties the collaborators together and answers queries.
///
/// Every collaborator sits behind a trait object so tests can swap in fakes
/// through [`Brain::from_parts`].
pub struct Brain {
    pub(crate) config: Config,
    pub(crate) sessions: Arc<dyn SessionStore>,
    pub(crate) sensors: Arc<dyn SensorStore>,
    pub(crate) stats: Arc<dyn Statistics>,
    pub(crate) retriever: Arc<dyn DocumentRetriever>,
    pub(crate) generator: Arc<dyn Generator>,
    pub(crate) chatlog: Option<Arc<dyn TurnLogger>>,
    pub(crate) detector: Arc<dyn IntentDetector>,
    pub(crate) clock: Clock,
}

/// Collaborators for [`Brain::from_parts`].
pub struct BrainParts {
    pub sessions: Arc<dyn SessionStore>,
    pub sensors: Arc<dyn SensorStore>,
    pub stats: Arc<dyn Statistics>,
    pub retriever: Arc<dyn DocumentRetriever>,
    pub generator: Arc<dyn Generator>,
    pub chatlog: Option<Arc<dyn TurnLogger>>,
    pub detector: Arc<dyn IntentDetector>,
    pub clock: Clock,
}

impl Brain {
    /// Wire the file-backed collaborators described by `config`.
    pub fn new(config: Config) -> Result<Self> {
        let clock = system_clock(config.sensor.timezone_offset);

        let sensors: Arc<dyn SensorStore> = Arc::new(JsonlSensorLog::new(
            &config.sensor.data_dir,
            config.sensor.max_files_to_scan,
            config.sensor.timezone_offset,
        ));
        let stats = Arc::new(LogStatistics::new(Arc::clone(&sensors), Arc::clone(&clock)));
        let retriever = Arc::new(LocalDocumentIndex::new(
            &config.retrieval.docs_dir,
            config.retrieval.top_k,
            config.retrieval.limit_context_chars,
        ));
        let timeout_secs = config.session.timeout_secs;
        let timeout = Duration::try_seconds(timeout_secs).ok_or_else(|| {
            AirwatchError::Config(format!("session.timeout_secs out of range: {timeout_secs}"))
        })?;
        let sessions = Arc::new(FileSessionStore::new(
            &config.session.dir,
            timeout,
            config.session.max_history_turns,
        ));
        let chatlog: Option<Arc<dyn TurnLogger>> = if config.chatlog.enabled {
            Some(Arc::new(JsonlChatLog::new(&config.chatlog.dir)))
        } else {
            None
        };

        info!(
            "[brain] llm={}/{} sensor_dir={} docs_dir={} chatlog={}",
            config.llm.provider,
            config.llm.model,
            config.sensor.data_dir,
            config.retrieval.docs_dir,
            config.chatlog.enabled
        );

        let parts = BrainParts {
            sessions,
            sensors,
            stats,
            retriever,
            generator: Arc::new(LlmDispatch::new(config.clone())),
            chatlog,
            detector: Arc::new(KeywordIntentDetector),
            clock,
        };
        Ok(Self::from_parts(config, parts))
    }

    pub fn from_parts(config: Config, parts: BrainParts) -> Self {
        Self {
            config,
            sessions: parts.sessions,
            sensors: parts.sensors,
            stats: parts.stats,
            retriever: parts.retriever,
            generator: parts.generator,
            chatlog: parts.chatlog,
            detector: parts.detector,
            clock: parts.clock,
        }
    }

    /// Drop sessions idle past the timeout. Run once at startup.
    pub async fn purge_expired_sessions(&self) -> Result<usize> {
        self.sessions.purge_expired().await
    }
}
