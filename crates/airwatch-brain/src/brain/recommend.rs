use std::time::Instant;

use airwatch_core::error::{AirwatchError, Result};
use airwatch_core::types::{Mode, RecommendEnvelope, SensorReading, Status};
use chrono::{Duration, NaiveDateTime};
use tracing::{info, warn};

use super::Brain;
use crate::optimizer::{compute_optimum, Conditions};
use crate::service::external::extract_external_conditions;
use crate::service::intent::mentioned_fields;
use crate::service::time::TimeWindow;
use crate::template::{detect_ask_mode, relevant_fields, render, select_template};

impl Brain {
    /// Indoor reading nearest to now that carries a temperature, within the
    /// configured age limit.
    async fn current_indoor_reading(&self) -> Result<SensorReading> {
        let now = (self.clock)();
        let hours = self.config.sensor.max_reading_age_hours;
        let max_age = Duration::try_hours(hours).ok_or_else(|| {
            AirwatchError::Config(format!("sensor.max_reading_age_hours out of range: {hours}"))
        })?;
        let window = TimeWindow {
            start: now.checked_sub_signed(max_age).unwrap_or(NaiveDateTime::MIN),
            end: now.checked_add_signed(max_age).unwrap_or(NaiveDateTime::MAX),
        };

        let mut reading = self
            .sensors
            .readings_between(window)
            .await?
            .into_iter()
            .filter(|r| r.temperature.is_some())
            .min_by_key(|r| (r.timestamp - now).num_seconds().abs())
            .ok_or(AirwatchError::NoSensorData)?;
        reading.age_minutes = Some((now - reading.timestamp).num_minutes().abs());
        Ok(reading)
    }

    /// Recommended setpoints for the current indoor reading, phrased by the
    /// template the question calls for.
    pub async fn answer_recommendation(&self, query: &str) -> Result<String> {
        let external = extract_external_conditions(query);
        let reading = self.current_indoor_reading().await?;

        let current = Conditions::from(&reading);
        let optimum = compute_optimum(&current, external.as_ref());
        let present = current.present();
        let asked = mentioned_fields(query);
        let template = select_template(
            present,
            external.map(|e| e.present()).unwrap_or_default(),
            asked,
            detect_ask_mode(query),
        );
        info!(
            "[recommend] reading {} ({}m old), template {template:?}",
            reading.timestamp_str(),
            reading.age_minutes.unwrap_or(0)
        );

        Ok(render(
            template,
            relevant_fields(present, asked),
            &current,
            &optimum,
            external.as_ref(),
        ))
    }

    /// Recommend-bot entry point. Never fails: errors become an error envelope.
    pub async fn process_recommendation(&self, query: &str) -> RecommendEnvelope {
        let started = Instant::now();
        match self.answer_recommendation(query).await {
            Ok(answer) => RecommendEnvelope {
                answer,
                status: Status::Success,
                processing_time: started.elapsed().as_secs_f64(),
                mode: Mode::RecommendBot,
                error: None,
                traceback: None,
            },
            Err(e) => {
                warn!("[recommend] failed: {e}");
                RecommendEnvelope {
                    answer: format!("추천봇 처리 중 오류가 발생했습니다: {e}"),
                    status: Status::Error,
                    processing_time: started.elapsed().as_secs_f64(),
                    mode: Mode::Error,
                    error: Some(e.to_string()),
                    traceback: Some(e.traceback()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use airwatch_core::types::{Mode, Status};

    use crate::brain::testing::{reading, FakeSensors, Fakes};

    fn brain_with(readings: Vec<airwatch_core::types::SensorReading>) -> crate::brain::Brain {
        Fakes {
            sensors: FakeSensors {
                readings,
                ..Default::default()
            },
            ..Default::default()
        }
        .build()
    }

    #[tokio::test]
    async fn test_external_temperature_template() {
        let brain = brain_with(vec![reading(
            "2025-08-14 15:00:00",
            Some(27.0),
            Some(55.0),
            None,
        )]);
        let env = brain
            .process_recommendation("외부 온도 31도일 때 추천 온도는?")
            .await;
        assert_eq!(env.status, Status::Success);
        assert_eq!(env.mode, Mode::RecommendBot);
        assert_eq!(
            env.answer,
            "현재 실내온도 27도, 외부온도 31도 기준으로 최적온도는 23도입니다."
        );
    }

    #[tokio::test]
    async fn test_picks_reading_nearest_now_with_temperature() {
        let brain = brain_with(vec![
            reading("2025-08-14 10:00:00", Some(22.0), None, None),
            reading("2025-08-14 15:20:00", None, Some(70.0), None),
            reading("2025-08-14 15:00:00", Some(26.0), Some(58.0), Some(950.0)),
        ]);
        assert_eq!(
            brain.answer_recommendation("지금 온도 몇 도야").await.unwrap(),
            "26도"
        );
        assert_eq!(
            brain.answer_recommendation("최적 습도 알려줘").await.unwrap(),
            "48%"
        );
        assert_eq!(
            brain.answer_recommendation("최적 환경 추천해줘").await.unwrap(),
            "현재 실내온도 26도, 실내습도 58%, 실내CO2 950ppm 기준으로 최적온도는 23도, 최적습도는 48%, 최적CO2는 550ppm입니다."
        );
    }

    #[tokio::test]
    async fn test_no_indoor_data_is_error_envelope() {
        let brain = brain_with(vec![
            // older than the 48h limit
            reading("2025-08-10 09:00:00", Some(25.0), None, None),
            reading("2025-08-14 15:00:00", None, Some(50.0), None),
        ]);
        let env = brain.process_recommendation("최적 온도?").await;
        assert_eq!(env.status, Status::Error);
        assert_eq!(env.mode, Mode::Error);
        assert_eq!(
            env.answer,
            "추천봇 처리 중 오류가 발생했습니다: 실내 센서 데이터를 찾을 수 없습니다."
        );
        assert!(env.traceback.is_some());
    }

    #[tokio::test]
    async fn test_external_humidity_does_not_change_optimum() {
        let brain = brain_with(vec![reading(
            "2025-08-14 15:00:00",
            Some(24.0),
            Some(60.0),
            None,
        )]);
        let answer = brain
            .answer_recommendation("외부 습도 80%일 때 최적 습도는?")
            .await
            .unwrap();
        assert_eq!(
            answer,
            "현재 실내습도 60%, 외부습도 80% 기준으로 최적습도는 50%입니다."
        );
    }

    #[tokio::test]
    async fn test_out_of_range_age_limit_is_error_envelope() {
        let mut brain = brain_with(vec![reading(
            "2025-08-14 15:00:00",
            Some(25.0),
            None,
            None,
        )]);
        brain.config.sensor.max_reading_age_hours = i64::MAX;
        let env = brain.process_recommendation("최적 온도?").await;
        assert_eq!(env.status, Status::Error);
        assert!(env.error.unwrap().contains("max_reading_age_hours"));
    }
}
