use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use airwatch_core::error::{AirwatchError, Result};
use airwatch_core::types::{new_id, FieldSet, Route, SensorContext};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::service::time::TimeWindow;

/// Follow-up context key holding the last explicit time range.
pub const TIME_RANGE_KEY: &str = "time_range";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub query: String,
    pub answer: String,
    pub route: Route,
}

/// One conversation: bounded history, turn counter and follow-up context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub history: VecDeque<HistoryTurn>,
    pub max_history: usize,
    pub turn_id: u64,
    #[serde(default)]
    pub last_ctx: SensorContext,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, max_history: usize) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            history: VecDeque::new(),
            max_history: max_history.max(1),
            turn_id: 0,
            last_ctx: SensorContext::default(),
            created_at: now,
            last_active: now,
        }
    }

    pub fn increment_turn(&mut self) -> u64 {
        self.turn_id += 1;
        self.last_active = Utc::now();
        self.turn_id
    }

    /// Append a turn, evicting the oldest beyond `max_history`.
    pub fn add_to_history(&mut self, query: &str, answer: &str, route: Route) {
        self.history.push_back(HistoryTurn {
            query: query.to_string(),
            answer: answer.to_string(),
            route,
        });
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_active > timeout
    }

    pub fn set_followup_timestamp(&mut self, ts: NaiveDateTime) {
        self.last_ctx.last_timestamp = Some(ts);
    }

    pub fn get_followup_timestamp(&self) -> Option<NaiveDateTime> {
        self.last_ctx.last_timestamp
    }

    pub fn clear_followup_timestamp(&mut self) {
        self.last_ctx.last_timestamp = None;
    }

    pub fn set_followup_fields(&mut self, fields: FieldSet) {
        self.last_ctx.last_fields = fields;
    }

    pub fn set_followup_context(&mut self, key: &str, value: serde_json::Value) {
        self.last_ctx.followup.insert(key.to_string(), value);
    }

    pub fn get_followup_context(&self, key: &str) -> Option<&serde_json::Value> {
        self.last_ctx.followup.get(key)
    }

    /// The last recorded time range, if any.
    pub fn followup_window(&self) -> Option<TimeWindow> {
        self.get_followup_context(TIME_RANGE_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Forget everything the previous sensor turn established.
    pub fn reset_last_ctx(&mut self) {
        self.last_ctx = SensorContext::default();
    }
}

/// Owner of all sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session, with the caller's id when given.
    async fn create(&self, session_id: Option<&str>) -> Result<Session>;
    async fn lookup(&self, session_id: &str) -> Result<Option<Session>>;
    async fn save(&self, session: &Session) -> Result<()>;
    /// Remove sessions inactive beyond the timeout. Returns how many went.
    async fn purge_expired(&self) -> Result<usize>;
}

/// Fetch a live session by id, or start a new one (reusing the id if given).
pub async fn get_or_create(store: &dyn SessionStore, session_id: Option<&str>) -> Result<Session> {
    if let Some(id) = session_id {
        if let Some(session) = store.lookup(id).await? {
            return Ok(session);
        }
    }
    store.create(session_id).await
}

fn validate_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(AirwatchError::Session(format!("invalid session id: '{id}'")))
    }
}

/// Process-local registry.
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    timeout: Duration,
    max_history: usize,
}

impl MemorySessionStore {
    pub fn new(timeout: Duration, max_history: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timeout,
            max_history,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Session>>> {
        self.sessions
            .lock()
            .map_err(|_| AirwatchError::Session("session registry poisoned".to_string()))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session_id: Option<&str>) -> Result<Session> {
        let id = match session_id {
            Some(id) => {
                validate_id(id)?;
                id.to_string()
            }
            None => new_id(),
        };
        let session = Session::new(id, self.max_history);
        self.lock()?
            .insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    async fn lookup(&self, session_id: &str) -> Result<Option<Session>> {
        let sessions = self.lock()?;
        Ok(sessions
            .get(session_id)
            .filter(|s| !s.is_expired(Utc::now(), self.timeout))
            .cloned())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        self.lock()?
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut sessions = self.lock()?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now, self.timeout));
        Ok(before - sessions.len())
    }
}

/// One JSON file per session under `dir`.
pub struct FileSessionStore {
    dir: PathBuf,
    timeout: Duration,
    max_history: usize,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration, max_history: usize) -> Self {
        Self {
            dir: dir.into(),
            timeout,
            max_history,
        }
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf> {
        validate_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}.json")))
    }

    async fn read(&self, path: &std::path::Path) -> Result<Option<Session>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create(&self, session_id: Option<&str>) -> Result<Session> {
        let id = session_id.map(str::to_string).unwrap_or_else(new_id);
        let session = Session::new(id, self.max_history);
        self.save(&session).await?;
        info!("[session] created {}", session.session_id);
        Ok(session)
    }

    async fn lookup(&self, session_id: &str) -> Result<Option<Session>> {
        let path = self.path_for(session_id)?;
        let session = self.read(&path).await?;
        Ok(session.filter(|s| !s.is_expired(Utc::now(), self.timeout)))
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let path = self.path_for(&session.session_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&path, body).await?;
        debug!("[session] saved {} (turn {})", session.session_id, session.turn_id);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        let mut purged = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let session = match self.read(&path).await {
                Ok(Some(s)) => s,
                Ok(None) => continue,
                Err(e) => {
                    warn!("[session] skipping unreadable {}: {e}", path.display());
                    continue;
                }
            };
            if session.is_expired(now, self.timeout) {
                tokio::fs::remove_file(&path).await?;
                purged += 1;
            }
        }
        if purged > 0 {
            info!("[session] purged {purged} expired session(s)");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stale(session: &mut Session) {
        session.last_active = Utc::now() - Duration::hours(2);
    }

    #[test]
    fn test_history_is_bounded_fifo() {
        let mut session = Session::new("s1", 3);
        for i in 0..10 {
            session.add_to_history(&format!("q{i}"), &format!("a{i}"), Route::General);
        }
        assert_eq!(session.history.len(), 3);
        assert_eq!(session.history.front().unwrap().query, "q7");
        assert_eq!(session.history.back().unwrap().query, "q9");
    }

    #[test]
    fn test_turn_counter_increments_by_one() {
        let mut session = Session::new("s1", 3);
        assert_eq!(session.increment_turn(), 1);
        assert_eq!(session.increment_turn(), 2);
        assert_eq!(session.turn_id, 2);
    }

    #[test]
    fn test_followup_state_roundtrip() {
        let mut session = Session::new("s1", 3);
        let ts = chrono::NaiveDate::from_ymd_opt(2025, 8, 14)
            .unwrap()
            .and_hms_opt(13, 0, 0)
            .unwrap();
        session.set_followup_timestamp(ts);
        assert_eq!(session.get_followup_timestamp(), Some(ts));
        session.clear_followup_timestamp();
        assert_eq!(session.get_followup_timestamp(), None);

        let window = TimeWindow { start: ts, end: ts + Duration::hours(2) };
        session.set_followup_context(TIME_RANGE_KEY, serde_json::to_value(window).unwrap());
        assert_eq!(session.followup_window(), Some(window));

        session.reset_last_ctx();
        assert!(session.last_ctx.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_sessions_are_isolated() {
        let store = MemorySessionStore::new(Duration::hours(1), 5);
        let mut a = store.create(None).await.unwrap();
        let b = store.create(None).await.unwrap();
        assert_ne!(a.session_id, b.session_id);

        a.set_followup_context("time_range", serde_json::json!({"start": "x"}));
        store.save(&a).await.unwrap();

        let b = store.lookup(&b.session_id).await.unwrap().unwrap();
        assert!(b.get_followup_context("time_range").is_none());
    }

    #[tokio::test]
    async fn test_memory_purge_spares_new_sessions() {
        let store = MemorySessionStore::new(Duration::hours(1), 5);
        let mut old = store.create(Some("old")).await.unwrap();
        stale(&mut old);
        store.save(&old).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        let fresh = store.create(Some("fresh")).await.unwrap();
        assert_eq!(store.purge_expired().await.unwrap(), 0);
        assert!(store.lookup(&fresh.session_id).await.unwrap().is_some());
        assert!(store.lookup("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_given_id() {
        let store = MemorySessionStore::new(Duration::hours(1), 5);
        let created = get_or_create(&store, Some("user-42")).await.unwrap();
        assert_eq!(created.session_id, "user-42");
        let mut s = created;
        s.increment_turn();
        store.save(&s).await.unwrap();
        let again = get_or_create(&store, Some("user-42")).await.unwrap();
        assert_eq!(again.turn_id, 1);
    }

    #[tokio::test]
    async fn test_file_store_roundtrip_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path(), Duration::hours(1), 5);

        let mut s = store.create(Some("abc")).await.unwrap();
        s.increment_turn();
        s.add_to_history("온도?", "24도", Route::SensorCache);
        store.save(&s).await.unwrap();

        let loaded = store.lookup("abc").await.unwrap().unwrap();
        assert_eq!(loaded.turn_id, 1);
        assert_eq!(loaded.history[0].route, Route::SensorCache);

        let mut old = store.create(Some("old")).await.unwrap();
        stale(&mut old);
        store.save(&old).await.unwrap();
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(!dir.path().join("old.json").exists());
        assert!(dir.path().join("abc.json").exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path(), Duration::hours(1), 5);
        assert!(store.lookup("../etc/passwd").await.is_err());
        assert!(store.create(Some("a/b")).await.is_err());
    }
}
