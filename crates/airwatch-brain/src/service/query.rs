use airwatch_core::types::FieldSet;
use chrono::{NaiveDate, NaiveDateTime};

use crate::service::intent::{detect_fields, mentioned_fields, IntentDetector, IntentSet};
use crate::service::time::{
    duration_range, resolve_date, resolve_time_point, time_range, TimeWindow,
};

/// A query with everything derived from its text. Rebuilt for every request.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub intent: IntentSet,
    /// Fields asked for (all three when none is named).
    pub fields: FieldSet,
    /// Fields named explicitly.
    pub mentioned: FieldSet,
    pub date: Option<NaiveDate>,
    pub time_point: Option<NaiveDateTime>,
    pub time_range: Option<TimeWindow>,
    /// Local time the query was analyzed at.
    pub now: NaiveDateTime,
}

impl Query {
    pub fn analyze(text: &str, detector: &dyn IntentDetector, now: NaiveDateTime) -> Self {
        Self {
            text: text.to_string(),
            intent: detector.detect(text),
            fields: detect_fields(text),
            mentioned: mentioned_fields(text),
            date: resolve_date(text, now),
            time_point: resolve_time_point(text, now),
            time_range: time_range(text, now).or_else(|| duration_range(text, now)),
            now,
        }
    }

    /// Whether the text alone marks this as a sensor question, without asking
    /// a classifier.
    pub fn has_sensor_signal(&self) -> bool {
        !self.mentioned.is_empty()
            || self.intent.sensor_vocabulary
            || self.intent.daily_summary
            || self.intent.extrema
            || self.intent.recent
            || (self.intent.today && self.intent.aggregate)
            || self.time_point.is_some()
            || self.time_range.is_some()
    }
}
