use std::time::Instant;

use airwatch_core::error::{AirwatchError, Result};
use airwatch_core::types::{
    FieldSet, Mode, ResultEnvelope, Route, ScoredDocument, TurnRecord, TIMESTAMP_FORMAT,
};
use tracing::{info, warn};

use super::Brain;
use crate::service::session::{get_or_create, Session};

/// A branch's answer before the epilogue turns it into an envelope.
#[derive(Debug, Clone)]
pub(crate) struct Outcome {
    pub answer: String,
    pub route: Route,
    pub fields: Option<FieldSet>,
    pub docs: Vec<ScoredDocument>,
    /// Retrieval statistics, only on the retrieval path.
    pub retrieval: Option<(usize, f64)>,
}

impl Outcome {
    pub fn new(route: Route, answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            route,
            fields: None,
            docs: Vec::new(),
            retrieval: None,
        }
    }

    pub fn with_fields(mut self, fields: FieldSet) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_docs(mut self, docs: Vec<ScoredDocument>, top_score: f64) -> Self {
        self.retrieval = Some((docs.len(), top_score));
        self.docs = docs;
        self
    }
}

impl Brain {
    /// Epilogue shared by every answering branch: bump the turn, append to
    /// history, log the turn, persist the session.
    pub(crate) async fn finalize(
        &self,
        session: &mut Session,
        query: &str,
        outcome: Outcome,
        started: Instant,
    ) -> Result<ResultEnvelope> {
        let turn_id = session.increment_turn();
        session.add_to_history(query, &outcome.answer, outcome.route);

        if let Some(chatlog) = &self.chatlog {
            let record = TurnRecord {
                session_id: session.session_id.clone(),
                turn_id,
                ts_kst: (self.clock)().format(TIMESTAMP_FORMAT).to_string(),
                route: outcome.route,
                query: query.to_string(),
                answer: outcome.answer.clone(),
                docs: outcome.docs.clone(),
                last_sensor_ctx: session.last_ctx.clone(),
            };
            if let Err(e) = chatlog.append(&record).await {
                warn!("[chatlog] failed to save turn {turn_id}: {e}");
            }
        }

        self.sessions.save(session).await?;

        let processing_time = started.elapsed().as_secs_f64();
        info!(
            "[route] {} -> {} (turn {turn_id}, {processing_time:.3}s)",
            session.session_id, outcome.route
        );

        Ok(ResultEnvelope {
            answer: outcome.answer,
            route: outcome.route,
            session_id: session.session_id.clone(),
            turn_id,
            processing_time,
            mode: outcome.route.mode(),
            fields: outcome.fields,
            docs_found: outcome.retrieval.map(|(n, _)| n),
            top_score: outcome.retrieval.map(|(_, s)| s),
            error: None,
            traceback: None,
        })
    }

    /// Session id and turn for an error report. The session is obtained
    /// best-effort; otherwise `"error"` and turn 0.
    pub async fn session_identity(&self, session_id: Option<&str>) -> (String, u64) {
        match get_or_create(self.sessions.as_ref(), session_id).await {
            Ok(session) => (session.session_id, session.turn_id),
            Err(e) => {
                warn!("[session] unavailable while reporting error: {e}");
                ("error".to_string(), 0)
            }
        }
    }

    /// Error-shaped envelope carrying the best-effort session identity.
    pub(crate) async fn error_envelope(
        &self,
        error: &AirwatchError,
        session_id: Option<&str>,
        started: Instant,
    ) -> ResultEnvelope {
        warn!("[route] failed: {error}");
        let (session_id, turn_id) = self.session_identity(session_id).await;

        ResultEnvelope {
            answer: format!("챗봇 처리 중 오류가 발생했습니다: {error}"),
            route: Route::Error,
            session_id,
            turn_id,
            processing_time: started.elapsed().as_secs_f64(),
            mode: Mode::Error,
            fields: None,
            docs_found: None,
            top_score: None,
            error: Some(error.to_string()),
            traceback: Some(error.traceback()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::testing::{FakeTurnLog, Fakes};

    #[tokio::test]
    async fn test_finalize_builds_envelope_and_logs() {
        let log = FakeTurnLog::default();
        let calls = log.calls.clone();
        let brain = Fakes {
            chatlog: Some(log),
            ..Default::default()
        }
        .build();

        let mut session = brain.sessions.create(Some("s1")).await.unwrap();
        let outcome = Outcome::new(Route::Sensor, "answer")
            .with_docs(Vec::new(), 0.0)
            .with_fields(FieldSet::all());
        let env = brain
            .finalize(&mut session, "q", outcome, Instant::now())
            .await
            .unwrap();

        assert_eq!(env.turn_id, 1);
        assert_eq!(env.mode, Mode::Rag);
        assert_eq!(env.docs_found, Some(0));
        assert_eq!(env.top_score, Some(0.0));
        assert_eq!(env.fields, Some(FieldSet::all()));
        assert_eq!(calls.lock().unwrap().as_slice(), ["s1:1:sensor"]);

        let stored = brain.sessions.lookup("s1").await.unwrap().unwrap();
        assert_eq!(stored.turn_id, 1);
        assert_eq!(stored.history.len(), 1);
    }

    #[tokio::test]
    async fn test_error_envelope_falls_back_to_sentinel() {
        let brain = Fakes::default().build();
        let err = AirwatchError::Retrieval("boom".to_string());

        // invalid id: the session store refuses it, so the sentinel is used
        let env = brain.error_envelope(&err, Some("bad/id"), Instant::now()).await;
        assert_eq!(env.session_id, "error");
        assert_eq!(env.turn_id, 0);
        assert_eq!(env.route, Route::Error);
        assert_eq!(env.mode, Mode::Error);
        assert!(env.answer.starts_with("챗봇 처리 중 오류가 발생했습니다: "));
        assert!(env.traceback.is_some());

        let env = brain.error_envelope(&err, Some("ok-id"), Instant::now()).await;
        assert_eq!(env.session_id, "ok-id");
    }

    #[tokio::test]
    async fn test_session_identity_reports_existing_turn() {
        let brain = Fakes::default().build();
        brain.process_query("안녕하세요", Some("s1")).await;

        assert_eq!(brain.session_identity(Some("s1")).await, ("s1".to_string(), 1));
        assert_eq!(brain.session_identity(Some("../x")).await, ("error".to_string(), 0));

        let (fresh, turn) = brain.session_identity(None).await;
        assert!(!fresh.is_empty() && fresh != "error");
        assert_eq!(turn, 0);
    }
}
