use airwatch_core::types::TIMESTAMP_FORMAT;
use chrono::NaiveDateTime;
use tracing::debug;

use crate::service::intent::{mentioned_fields, IntentDetector};
use crate::service::session::Session;
use crate::service::time::{
    duration_range, extract_datetime_strings, resolve_date, resolve_time_point, time_range,
};

/// Whether the query anchors itself in time: a recency word, a relative or
/// explicit date, a clock time, a range or a trailing duration.
fn has_own_time_reference(
    query: &str,
    detector: &dyn IntentDetector,
    now: NaiveDateTime,
) -> bool {
    detector.detect(query).recent
        || !extract_datetime_strings(query).is_empty()
        || resolve_date(query, now).is_some()
        || resolve_time_point(query, now).is_some()
        || time_range(query, now).is_some()
        || duration_range(query, now).is_some()
}

/// Expand an elliptical follow-up ("그럼 습도는?") with the session's last
/// timestamp or time window. Queries without a follow-up cue, or that carry
/// their own time reference, come back unchanged.
pub fn resolve_followup(
    query: &str,
    session: &Session,
    detector: &dyn IntentDetector,
    now: NaiveDateTime,
) -> String {
    if !detector.detect(query).followup {
        return query.to_string();
    }
    if has_own_time_reference(query, detector, now) {
        return query.to_string();
    }

    let anchor = if let Some(ts) = session.get_followup_timestamp() {
        ts.format(TIMESTAMP_FORMAT).to_string()
    } else if let Some(window) = session.followup_window() {
        format!(
            "{} ~ {}",
            window.start.format(TIMESTAMP_FORMAT),
            window.end.format(TIMESTAMP_FORMAT)
        )
    } else {
        return query.to_string();
    };

    let mut expanded = format!("{anchor} {}", query.trim());
    let last_fields = session.last_ctx.last_fields;
    if mentioned_fields(query).is_empty() && !last_fields.is_empty() {
        let labels: Vec<&str> = last_fields.iter().map(|f| f.label()).collect();
        expanded.push(' ');
        expanded.push_str(&labels.join(" "));
    }

    debug!("[followup] '{query}' -> '{expanded}'");
    expanded
}
