use std::collections::BTreeMap;
use std::sync::Arc;

use airwatch_core::error::Result;
use airwatch_core::types::{round1, Field, FieldSet, SensorReading};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use tracing::debug;

use crate::service::intent::{extrema_direction, Extreme};
use crate::service::query::Query;
use crate::service::sensor_log::SensorStore;
use crate::service::time::{Clock, TimeWindow};

/// Days covered by a daily summary when the query names no date.
const DEFAULT_SUMMARY_DAYS: i64 = 7;

/// Statistic answers. `Ok(None)` means "not applicable here", which the
/// cascade treats as a miss.
#[async_trait]
pub trait Statistics: Send + Sync {
    async fn daily_average_temperature(&self, query: &Query) -> Result<Option<String>>;
    async fn daily_average_all(&self, query: &Query) -> Result<Option<String>>;
    async fn today_average_all(&self) -> Result<Option<String>>;
    async fn extrema_time(&self, query: &Query) -> Result<Option<String>>;
}

/// Statistics computed directly over the sensor log.
pub struct LogStatistics {
    store: Arc<dyn SensorStore>,
    clock: Clock,
}

impl LogStatistics {
    pub fn new(store: Arc<dyn SensorStore>, clock: Clock) -> Self {
        Self { store, clock }
    }

    fn day_window(date: NaiveDate) -> Option<TimeWindow> {
        Some(TimeWindow {
            start: date.and_hms_opt(0, 0, 0)?,
            end: date.and_hms_opt(23, 59, 59)?,
        })
    }

    /// Readings for the query's date, or for the trailing week.
    async fn readings_by_day(
        &self,
        query: &Query,
    ) -> Result<BTreeMap<NaiveDate, Vec<SensorReading>>> {
        let window = match query.date {
            Some(date) => Self::day_window(date),
            None => {
                let today = (self.clock)().date();
                let first = today - Duration::days(DEFAULT_SUMMARY_DAYS - 1);
                first.and_hms_opt(0, 0, 0).zip(today.and_hms_opt(23, 59, 59)).map(
                    |(start, end)| TimeWindow { start, end },
                )
            }
        };
        let Some(window) = window else {
            return Ok(BTreeMap::new());
        };

        let mut by_day: BTreeMap<NaiveDate, Vec<SensorReading>> = BTreeMap::new();
        for reading in self.store.readings_between(window).await? {
            by_day.entry(reading.timestamp.date()).or_default().push(reading);
        }
        Ok(by_day)
    }
}

fn average(readings: &[SensorReading], field: Field) -> Option<f64> {
    let values: Vec<f64> = readings.iter().filter_map(|r| r.value(field)).collect();
    if values.is_empty() {
        return None;
    }
    Some(round1(values.iter().sum::<f64>() / values.len() as f64))
}

/// "온도 24.3℃, 습도 51.2%" for the fields that have data.
fn averages_line(readings: &[SensorReading], fields: FieldSet) -> Option<String> {
    let parts: Vec<String> = fields
        .iter()
        .filter_map(|f| average(readings, f).map(|v| format!("{} {v}{}", f.label(), f.unit())))
        .collect();
    (!parts.is_empty()).then(|| parts.join(", "))
}

fn daily_lines(
    by_day: &BTreeMap<NaiveDate, Vec<SensorReading>>,
    fields: FieldSet,
) -> Option<String> {
    let lines: Vec<String> = by_day
        .iter()
        .filter_map(|(date, readings)| {
            averages_line(readings, fields).map(|line| format!("{date}: {line}"))
        })
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}

#[async_trait]
impl Statistics for LogStatistics {
    async fn daily_average_temperature(&self, query: &Query) -> Result<Option<String>> {
        let by_day = self.readings_by_day(query).await?;
        Ok(daily_lines(&by_day, FieldSet::only(Field::Temperature))
            .map(|body| format!("일별 평균 온도\n{body}")))
    }

    async fn daily_average_all(&self, query: &Query) -> Result<Option<String>> {
        let by_day = self.readings_by_day(query).await?;
        Ok(daily_lines(&by_day, query.fields).map(|body| format!("일별 평균\n{body}")))
    }

    async fn today_average_all(&self) -> Result<Option<String>> {
        let today = (self.clock)().date();
        let Some(window) = Self::day_window(today) else {
            return Ok(None);
        };
        let readings = self.store.readings_between(window).await?;
        debug!("[stats] {} readings today", readings.len());
        Ok(averages_line(&readings, FieldSet::all())
            .map(|line| format!("오늘({today}) 평균: {line} (측정 {}건)", readings.len())))
    }

    async fn extrema_time(&self, query: &Query) -> Result<Option<String>> {
        let date = query.date.unwrap_or_else(|| (self.clock)().date());
        let field = query.mentioned.iter().next().unwrap_or(Field::Temperature);
        let direction = extrema_direction(&query.text);

        let Some(window) = Self::day_window(date) else {
            return Ok(None);
        };
        let readings = self.store.readings_between(window).await?;
        let pick = readings.iter().filter_map(|r| r.value(field).map(|v| (r, v)));
        // ties resolve to the earliest reading
        let best = match direction {
            Extreme::Max => pick.fold(None, |acc: Option<(&SensorReading, f64)>, (r, v)| {
                match acc {
                    Some((_, best)) if best >= v => acc,
                    _ => Some((r, v)),
                }
            }),
            Extreme::Min => pick.fold(None, |acc: Option<(&SensorReading, f64)>, (r, v)| {
                match acc {
                    Some((_, best)) if best <= v => acc,
                    _ => Some((r, v)),
                }
            }),
        };

        let word = match direction {
            Extreme::Max => "가장 높았던",
            Extreme::Min => "가장 낮았던",
        };
        Ok(best.map(|(r, v)| {
            format!(
                "{date} {}가 {word} 시각은 {}이며 값은 {v}{}입니다.",
                field.label(),
                r.timestamp.format("%H:%M:%S"),
                field.unit()
            )
        }))
    }
}
