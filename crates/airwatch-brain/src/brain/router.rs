use std::time::Instant;

use airwatch_core::error::{AirwatchError, Result};
use airwatch_core::types::{ResultEnvelope, Route};
use chrono::Duration;
use tracing::{debug, info};

use super::compose::Outcome;
use super::Brain;
use crate::service::followup::resolve_followup;
use crate::service::intent::{parse_route, RouteDecision};
use crate::service::prompt::{build_general_prompt, build_prompt, build_route_prompt};
use crate::service::query::Query;
use crate::service::retrieval::use_rag;
use crate::service::session::{get_or_create, Session, TIME_RANGE_KEY};
use crate::service::time::{extract_datetime_strings, parse_dt};

/// One step of the sensor cascade. Predicates overlap, so order matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    DailyTemperature,
    DailyAll,
    TodayAll,
    Extrema,
    TimeRange,
    Cache,
    Latest,
}

const CASCADE: [Branch; 7] = [
    Branch::DailyTemperature,
    Branch::DailyAll,
    Branch::TodayAll,
    Branch::Extrema,
    Branch::TimeRange,
    Branch::Cache,
    Branch::Latest,
];

impl Branch {
    fn matches(self, q: &Query) -> bool {
        match self {
            Branch::DailyTemperature => q.intent.daily_summary && q.intent.temperature_keyword,
            Branch::DailyAll => q.intent.daily_summary,
            Branch::TodayAll => q.intent.today && q.intent.aggregate,
            Branch::Extrema => q.intent.extrema,
            Branch::TimeRange => q.time_range.is_some(),
            Branch::Cache => q.time_point.is_some(),
            Branch::Latest => q.intent.recent,
        }
    }
}

fn non_empty(answer: Option<String>) -> Option<String> {
    answer.filter(|a| !a.trim().is_empty())
}

impl Brain {
    /// Answer one query. Never fails: errors become an error envelope.
    pub async fn process_query(&self, query: &str, session_id: Option<&str>) -> ResultEnvelope {
        let started = Instant::now();
        let result = async {
            let mut session = get_or_create(self.sessions.as_ref(), session_id).await?;
            self.classify_and_dispatch(query, &mut session, started).await
        }
        .await;

        match result {
            Ok(envelope) => envelope,
            Err(e) => self.error_envelope(&e, session_id, started).await,
        }
    }

    /// Expand follow-ups, pick the route, and run the first branch that
    /// produces an answer.
    pub async fn classify_and_dispatch(
        &self,
        query: &str,
        session: &mut Session,
        started: Instant,
    ) -> Result<ResultEnvelope> {
        let now = (self.clock)();
        let text = resolve_followup(query, session, self.detector.as_ref(), now);
        let q = Query::analyze(&text, self.detector.as_ref(), now);

        if self.decide_route(&q).await? == RouteDecision::General {
            info!("[route] general");
            let prompt = build_general_prompt(&q.text, &session.history);
            let answer = self.generator.generate(&prompt).await?;
            let outcome = Outcome::new(Route::General, answer);
            return self.finalize(session, &q.text, outcome, started).await;
        }

        session.reset_last_ctx();

        for branch in CASCADE {
            if !branch.matches(&q) {
                continue;
            }
            match self.run_branch(branch, &q, session).await? {
                Some(outcome) => {
                    info!("[cascade] {branch:?} answered");
                    return self.finalize(session, &q.text, outcome, started).await;
                }
                None => debug!("[cascade] {branch:?} matched, no answer"),
            }
        }

        let outcome = self.retrieval_answer(&q, session).await?;
        self.finalize(session, &q.text, outcome, started).await
    }

    /// Deterministic sensor signal first, then the classifier.
    async fn decide_route(&self, q: &Query) -> Result<RouteDecision> {
        if q.has_sensor_signal() {
            return Ok(RouteDecision::Sensor);
        }
        let reply = self.generator.generate(&build_route_prompt(&q.text)).await?;
        let decision = parse_route(&reply);
        debug!("[route] classifier said {decision:?}");
        Ok(decision)
    }

    async fn run_branch(
        &self,
        branch: Branch,
        q: &Query,
        session: &mut Session,
    ) -> Result<Option<Outcome>> {
        let answer = match branch {
            Branch::DailyTemperature => non_empty(self.stats.daily_average_temperature(q).await?)
                .map(|a| Outcome::new(Route::SensorDailyTemp, a)),
            Branch::DailyAll => non_empty(self.stats.daily_average_all(q).await?)
                .map(|a| Outcome::new(Route::SensorDailyAll, a)),
            Branch::TodayAll => non_empty(self.stats.today_average_all().await?)
                .map(|a| Outcome::new(Route::SensorTodayAll, a)),
            Branch::Extrema => non_empty(self.stats.extrema_time(q).await?)
                .map(|a| Outcome::new(Route::SensorExtrema, a)),
            Branch::TimeRange => {
                if let Some(window) = q.time_range {
                    session.set_followup_context(TIME_RANGE_KEY, serde_json::to_value(window)?);
                    debug!("[cascade] recorded range {} ~ {}", window.start, window.end);
                }
                None
            }
            Branch::Cache => self.cached_answer(q, session).await?,
            Branch::Latest => self.latest_answer(q, session).await?,
        };
        Ok(answer)
    }

    /// Reading near the query's time point, restricted to the fields asked
    /// for. No overlap between asked and measured fields is a miss.
    async fn cached_answer(&self, q: &Query, session: &mut Session) -> Result<Option<Outcome>> {
        let Some(at) = q.time_point else {
            return Ok(None);
        };
        let minutes = self.config.sensor.cache_tolerance_minutes;
        let tolerance = Duration::try_minutes(minutes).ok_or_else(|| {
            AirwatchError::Config(format!("sensor.cache_tolerance_minutes out of range: {minutes}"))
        })?;
        let Some(reading) = self.sensors.closest(at, tolerance).await? else {
            return Ok(None);
        };

        session.set_followup_timestamp(reading.timestamp);
        session.set_followup_fields(q.fields);

        Ok(reading.describe(&q.fields).map(|parts| {
            Outcome::new(
                Route::SensorCache,
                format!("{}: {parts}", reading.timestamp_str()),
            )
            .with_fields(q.fields)
        }))
    }

    async fn latest_answer(&self, q: &Query, session: &mut Session) -> Result<Option<Outcome>> {
        let Some(reading) = self.sensors.latest().await? else {
            return Ok(None);
        };
        let Some(parts) = reading.describe(&q.fields) else {
            return Ok(None);
        };
        session.set_followup_timestamp(reading.timestamp);
        session.set_followup_fields(q.fields);
        Ok(Some(Outcome::new(
            Route::SensorLatest,
            format!("최신 측정값 ({}): {parts}", reading.timestamp_str()),
        )))
    }

    /// Last resort: retrieval, then the RAG gate picks between a grounded
    /// answer and plain generation.
    async fn retrieval_answer(&self, q: &Query, session: &mut Session) -> Result<Outcome> {
        let retrieval = self.retriever.retrieve(&q.text).await?;
        let top_score = retrieval.top_score();
        let grounded = use_rag(&retrieval.docs, self.config.retrieval.relevance_threshold);
        info!(
            "[rag] {} doc(s), top {top_score:.2}, use_rag={grounded}",
            retrieval.docs.len()
        );

        let prompt = if grounded {
            if let Some(ts) = extract_datetime_strings(&q.text)
                .iter()
                .find_map(|s| parse_dt(s))
            {
                session.set_followup_timestamp(ts);
            }
            build_prompt(&q.text, &retrieval.context, &session.history)
        } else {
            build_general_prompt(&q.text, &session.history)
        };

        let answer = self.generator.generate(&prompt).await?;
        let route = if grounded { Route::Sensor } else { Route::General };
        Ok(Outcome::new(route, answer).with_docs(retrieval.docs, top_score))
    }
}

#[cfg(test)]
mod tests {
    use airwatch_core::types::{Field, FieldSet, Mode, ScoredDocument};

    use crate::brain::testing::{reading, Calls, FakeSensors, FakeStats, Fakes, FakeRetriever};

    fn calls(c: &Calls) -> Vec<String> {
        c.lock().unwrap().clone()
    }

    fn raw_doc(score: f64) -> ScoredDocument {
        ScoredDocument {
            id: "2025-08-14_rawdata.jsonl".to_string(),
            schema: "raw_list".to_string(),
            score,
        }
    }

    #[tokio::test]
    async fn test_daily_temperature_dispatches_once() {
        let stats = FakeStats {
            daily_temperature: Some("일별 평균 온도\n2025-08-14: 온도 25℃".to_string()),
            daily_all: Some("should not be used".to_string()),
            ..Default::default()
        };
        let stat_calls = stats.calls.clone();
        let sensors = FakeSensors::default();
        let sensor_calls = sensors.calls.clone();
        let retriever = FakeRetriever::default();
        let retriever_calls = retriever.calls.clone();
        let brain = Fakes {
            stats,
            sensors,
            retriever,
            ..Default::default()
        }
        .build();

        let env = brain.process_query("8월 14일 일별 평균 온도 알려줘", None).await;
        assert_eq!(env.route.as_str(), "sensor_daily_temp");
        assert_eq!(env.mode, Mode::DailyStatistics);
        assert_eq!(env.turn_id, 1);
        assert_eq!(calls(&stat_calls), vec!["daily_temperature"]);
        assert!(calls(&sensor_calls).is_empty());
        assert!(calls(&retriever_calls).is_empty());
    }

    #[tokio::test]
    async fn test_empty_statistic_falls_through() {
        let stats = FakeStats {
            daily_temperature: Some("   ".to_string()),
            daily_all: Some("일별 평균\n...".to_string()),
            ..Default::default()
        };
        let stat_calls = stats.calls.clone();
        let brain = Fakes {
            stats,
            ..Default::default()
        }
        .build();

        let env = brain.process_query("8월 14일 일별 평균 온도", None).await;
        assert_eq!(env.route.as_str(), "sensor_daily_all");
        assert_eq!(calls(&stat_calls), vec!["daily_temperature", "daily_all"]);
    }

    #[tokio::test]
    async fn test_all_misses_reach_rag_gate() {
        let stats = FakeStats::default();
        let stat_calls = stats.calls.clone();
        let retriever = FakeRetriever {
            docs: vec![raw_doc(0.9)],
            ..Default::default()
        };
        let brain = Fakes {
            stats,
            retriever,
            ..Default::default()
        }
        .build();

        let env = brain.process_query("8월 14일 일별 평균 온도", None).await;
        assert_eq!(calls(&stat_calls), vec!["daily_temperature", "daily_all"]);
        assert_eq!(env.route.as_str(), "sensor");
        assert_eq!(env.mode, Mode::Rag);
        assert_eq!(env.docs_found, Some(1));
        assert_eq!(env.top_score, Some(0.9));
        assert_eq!(env.answer, "generated");
    }

    #[tokio::test]
    async fn test_low_score_uses_general_generation() {
        let retriever = FakeRetriever {
            docs: vec![raw_doc(0.5)],
            ..Default::default()
        };
        let brain = Fakes {
            retriever,
            ..Default::default()
        }
        .build();

        let env = brain.process_query("실내 공기 상태 어때", None).await;
        assert_eq!(env.route.as_str(), "general");
        assert_eq!(env.mode, Mode::GeneralLlm);
        assert_eq!(env.docs_found, Some(1));
        assert_eq!(env.top_score, Some(0.5));
    }

    #[tokio::test]
    async fn test_cache_answer_only_mentions_requested_present_fields() {
        let sensors = FakeSensors {
            readings: vec![reading("2025-08-14 13:00:00", Some(24.5), Some(60.0), None)],
            ..Default::default()
        };
        let brain = Fakes {
            sensors,
            ..Default::default()
        }
        .build();

        let env = brain.process_query("2025-08-14 13:00 온도랑 CO2 알려줘", None).await;
        assert_eq!(env.route.as_str(), "sensor_cache");
        assert_eq!(env.mode, Mode::CachedData);
        assert_eq!(env.answer, "2025-08-14 13:00:00: 온도 24.5℃");
        assert!(!env.answer.contains("습도"));
        assert!(!env.answer.contains("CO2"));
        let mut expected = FieldSet::only(Field::Temperature);
        expected.insert(Field::Gas);
        assert_eq!(env.fields, Some(expected));
    }

    #[tokio::test]
    async fn test_cache_without_overlap_falls_through() {
        let sensors = FakeSensors {
            readings: vec![reading("2025-08-14 13:00:00", None, Some(60.0), None)],
            ..Default::default()
        };
        let sensor_calls = sensors.calls.clone();
        let retriever = FakeRetriever::default();
        let retriever_calls = retriever.calls.clone();
        let brain = Fakes {
            sensors,
            retriever,
            ..Default::default()
        }
        .build();

        let env = brain.process_query("2025-08-14 13:00 온도", Some("s1")).await;
        assert_eq!(env.route.as_str(), "general");
        assert_eq!(calls(&sensor_calls), vec!["closest"]);
        assert_eq!(calls(&retriever_calls).len(), 1);
    }

    #[tokio::test]
    async fn test_latest_branch() {
        let sensors = FakeSensors {
            readings: vec![reading("2025-08-14 15:20:00", Some(25.1), Some(48.0), Some(610.0))],
            ..Default::default()
        };
        let brain = Fakes {
            sensors,
            ..Default::default()
        }
        .build();

        let env = brain.process_query("지금 습도 어때?", None).await;
        assert_eq!(env.route.as_str(), "sensor_latest");
        assert_eq!(env.mode, Mode::LatestData);
        assert_eq!(env.answer, "최신 측정값 (2025-08-14 15:20:00): 습도 48%");
    }

    #[tokio::test]
    async fn test_followup_reuses_previous_timestamp() {
        let sensors = FakeSensors {
            readings: vec![reading("2025-08-14 13:00:00", Some(24.5), Some(60.0), None)],
            ..Default::default()
        };
        let brain = Fakes {
            sensors,
            ..Default::default()
        }
        .build();

        let first = brain.process_query("2025-08-14 13:00 온도", Some("s1")).await;
        assert_eq!(first.answer, "2025-08-14 13:00:00: 온도 24.5℃");

        let second = brain.process_query("그럼 습도는?", Some("s1")).await;
        assert_eq!(second.route.as_str(), "sensor_cache");
        assert_eq!(second.answer, "2025-08-14 13:00:00: 습도 60%");
        assert_eq!(second.turn_id, 2);
    }

    #[tokio::test]
    async fn test_general_route_skips_cascade() {
        let stats = FakeStats::default();
        let stat_calls = stats.calls.clone();
        let retriever = FakeRetriever::default();
        let retriever_calls = retriever.calls.clone();
        let brain = Fakes {
            stats,
            retriever,
            ..Default::default()
        }
        .build();

        let env = brain.process_query("안녕하세요 반가워요", None).await;
        assert_eq!(env.route.as_str(), "general");
        assert_eq!(env.mode, Mode::GeneralLlm);
        assert_eq!(env.answer, "generated");
        assert!(env.docs_found.is_none());
        assert!(calls(&stat_calls).is_empty());
        assert!(calls(&retriever_calls).is_empty());
    }

    #[tokio::test]
    async fn test_turns_increase_and_history_is_capped() {
        let brain = Fakes {
            max_history: 3,
            ..Default::default()
        }
        .build();

        for expected in 1..=6u64 {
            let env = brain.process_query("안녕하세요", Some("s1")).await;
            assert_eq!(env.turn_id, expected);
        }
        let session = brain.sessions.lookup("s1").await.unwrap().unwrap();
        assert_eq!(session.turn_id, 6);
        assert_eq!(session.history.len(), 3);
    }

    #[tokio::test]
    async fn test_collaborator_failure_becomes_error_envelope() {
        let retriever = FakeRetriever {
            fail: true,
            ..Default::default()
        };
        let brain = Fakes {
            retriever,
            ..Default::default()
        }
        .build();

        let ok = brain.process_query("안녕하세요", Some("s1")).await;
        assert_eq!(ok.turn_id, 1);

        let env = brain.process_query("실내 환경 알려줘", Some("s1")).await;
        assert_eq!(env.route.as_str(), "error");
        assert_eq!(env.mode, Mode::Error);
        assert_eq!(env.session_id, "s1");
        assert_eq!(env.turn_id, 1);
        assert!(env.error.as_deref().unwrap().contains("index unavailable"));
        assert!(env.answer.starts_with("챗봇 처리 중 오류가 발생했습니다"));
    }

    #[tokio::test]
    async fn test_recency_question_after_cached_turn_reads_latest() {
        let sensors = FakeSensors {
            readings: vec![
                reading("2025-08-14 13:00:00", Some(24.5), Some(60.0), None),
                reading("2025-08-14 15:20:00", Some(25.1), Some(48.0), None),
            ],
            ..Default::default()
        };
        let brain = Fakes {
            sensors,
            ..Default::default()
        }
        .build();

        let first = brain.process_query("2025-08-14 13:00 온도", Some("s1")).await;
        assert_eq!(first.route.as_str(), "sensor_cache");

        let second = brain.process_query("지금 온도는?", Some("s1")).await;
        assert_eq!(second.route.as_str(), "sensor_latest");
        assert_eq!(second.answer, "최신 측정값 (2025-08-14 15:20:00): 온도 25.1℃");
    }

    #[tokio::test]
    async fn test_huge_duration_does_not_panic() {
        let sensors = FakeSensors {
            readings: vec![reading("2025-08-14 15:20:00", Some(25.1), None, None)],
            ..Default::default()
        };
        let brain = Fakes {
            sensors,
            ..Default::default()
        }
        .build();

        let env = brain.process_query("최근 100000000000일 온도", Some("s2")).await;
        assert_eq!(env.route.as_str(), "sensor_latest");
        assert_eq!(env.turn_id, 1);
    }

    #[tokio::test]
    async fn test_today_average_dispatch() {
        let stats = FakeStats {
            today_all: Some("오늘 평균: 온도 25℃, 습도 50%, CO2 600ppm".to_string()),
            ..Default::default()
        };
        let stat_calls = stats.calls.clone();
        let brain = Fakes {
            stats,
            ..Default::default()
        }
        .build();

        let env = brain.process_query("오늘 전체 평균", None).await;
        assert_eq!(env.route.as_str(), "sensor_today_all");
        assert_eq!(env.mode, Mode::TodayStatistics);
        assert_eq!(calls(&stat_calls), vec!["today_all"]);
    }

    #[tokio::test]
    async fn test_extrema_dispatch() {
        let stats = FakeStats {
            extrema: Some("2025-08-13 가장 더운 시간: 14:00 (29.5℃)".to_string()),
            ..Default::default()
        };
        let stat_calls = stats.calls.clone();
        let brain = Fakes {
            stats,
            ..Default::default()
        }
        .build();

        let env = brain.process_query("어제 가장 더운 시간", None).await;
        assert_eq!(env.route.as_str(), "sensor_extrema");
        assert_eq!(env.mode, Mode::ExtremaAnalysis);
        assert_eq!(calls(&stat_calls), vec!["extrema"]);
    }

    #[tokio::test]
    async fn test_empty_extrema_falls_through_to_cache() {
        let stats = FakeStats::default();
        let stat_calls = stats.calls.clone();
        let sensors = FakeSensors {
            readings: vec![reading("2025-08-13 13:00:00", Some(28.0), None, None)],
            ..Default::default()
        };
        let sensor_calls = sensors.calls.clone();
        let brain = Fakes {
            stats,
            sensors,
            ..Default::default()
        }
        .build();

        let env = brain.process_query("어제 13시 가장 높은 온도", None).await;
        assert_eq!(calls(&stat_calls), vec!["extrema"]);
        assert_eq!(calls(&sensor_calls), vec!["closest"]);
        assert_eq!(env.route.as_str(), "sensor_cache");
        assert_eq!(env.answer, "2025-08-13 13:00:00: 온도 28℃");
    }

    #[tokio::test]
    async fn test_recorded_range_anchors_next_followup() {
        let brain = Fakes::default().build();

        let first = brain.process_query("13시부터 15시까지 온도", Some("s1")).await;
        assert_eq!(first.route.as_str(), "general");

        brain.process_query("습도는?", Some("s1")).await;
        let session = brain.sessions.lookup("s1").await.unwrap().unwrap();
        let last = session.history.back().unwrap();
        assert_eq!(
            last.query,
            "2025-08-14 13:00:00 ~ 2025-08-14 15:00:00 습도는?"
        );
    }
}
