use std::path::PathBuf;

use airwatch_core::error::{AirwatchError, Result};
use airwatch_core::types::TurnRecord;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Persists answered turns.
#[async_trait]
pub trait TurnLogger: Send + Sync {
    async fn append(&self, record: &TurnRecord) -> Result<()>;
}

/// One JSON line per turn in `<dir>/<session_id>.jsonl`.
pub struct JsonlChatLog {
    dir: PathBuf,
}

impl JsonlChatLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl TurnLogger for JsonlChatLog {
    async fn append(&self, record: &TurnRecord) -> Result<()> {
        let safe = record
            .session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe || record.session_id.is_empty() {
            return Err(AirwatchError::Session(format!(
                "refusing to log turn for session id '{}'",
                record.session_id
            )));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.jsonl", record.session_id));
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!("[chatlog] {} turn {}", record.session_id, record.turn_id);
        Ok(())
    }
}
