//! Time expression parsing for sensor queries.
//!
//! Everything here is relative to a caller-supplied `now` (local sensor time),
//! so parsing is deterministic under test.

use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Source of "now" in local sensor time.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Wall clock shifted by a fixed UTC offset in hours.
pub fn system_clock(tz_offset: i32) -> Clock {
    Arc::new(move || Utc::now().naive_utc() + Duration::hours(tz_offset as i64))
}

/// A clock frozen at `at`.
pub fn fixed_clock(at: NaiveDateTime) -> Clock {
    Arc::new(move || at)
}

/// Inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start <= ts && ts <= self.end
    }
}

static ISO_DT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})(?:[ T]+(\d{1,2}):(\d{2})(?::(\d{2}))?)?")
        .expect("valid regex")
});
static KOR_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:(\d{4})\s*년\s*)?(\d{1,2})\s*월\s*(\d{1,2})\s*일").expect("valid regex")
});
static KOR_HOUR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(오전|오후|새벽|저녁|밤)?\s*(\d{1,2})\s*시(간)?(?:\s*(\d{1,2})\s*분)?")
        .expect("valid regex")
});
static COLON_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2}):(\d{2})").expect("valid regex"));
static KOR_HOUR_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(오전|오후|새벽|저녁|밤)?\s*(\d{1,2})\s*시(?:\s*(\d{1,2})\s*분)?\s*(?:부터|~|-|에서)\s*(오전|오후|새벽|저녁|밤)?\s*(\d{1,2})\s*시(?:\s*(\d{1,2})\s*분)?",
    )
    .expect("valid regex")
});
static COLON_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(오전|오후|새벽|저녁|밤)?\s*(\d{1,2}):(\d{2})\s*(?:~|-|부터)\s*(오전|오후|새벽|저녁|밤)?\s*(\d{1,2}):(\d{2})",
    )
    .expect("valid regex")
});
static KOR_DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:최근|지난)\s*(\d+)\s*(시간|분|일)").expect("valid regex"));
static ENG_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:last|past)\s+(\d+)\s*(hours?|minutes?|mins?|days?)\b").expect("valid regex")
});

fn num(caps: &regex::Captures<'_>, i: usize) -> Option<u32> {
    caps.get(i).and_then(|m| m.as_str().parse().ok())
}

fn period_of<'t>(caps: &regex::Captures<'t>, i: usize) -> Option<&'t str> {
    caps.get(i).map(|m| m.as_str())
}

/// All ISO-like datetime mentions in order of appearance (`2025-08-14 13:00`,
/// `2025-08-14T13:00:00`, `2025/08/14`).
pub fn extract_datetime_strings(text: &str) -> Vec<String> {
    ISO_DT
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Parse one ISO-like datetime mention. Date-only mentions resolve to midnight.
pub fn parse_dt(s: &str) -> Option<NaiveDateTime> {
    let caps = ISO_DT.captures(s.trim())?;
    let date = NaiveDate::from_ymd_opt(caps[1].parse().ok()?, num(&caps, 2)?, num(&caps, 3)?)?;
    let h = num(&caps, 4).unwrap_or(0);
    let m = num(&caps, 5).unwrap_or(0);
    let sec = num(&caps, 6).unwrap_or(0);
    date.and_hms_opt(h, m, sec)
}

/// The date a query refers to: explicit ISO date, Korean `8월 14일`, or a
/// relative day word. `None` when nothing date-like is present.
pub fn resolve_date(text: &str, now: NaiveDateTime) -> Option<NaiveDate> {
    if let Some(dt) = extract_datetime_strings(text).iter().find_map(|s| parse_dt(s)) {
        return Some(dt.date());
    }

    if let Some(caps) = KOR_DATE.captures(text) {
        let year = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(now.year());
        if let Some(date) = NaiveDate::from_ymd_opt(year, num(&caps, 2)?, num(&caps, 3)?) {
            return Some(date);
        }
    }

    let lower = text.to_lowercase();
    let offset = if lower.contains("그저께") || lower.contains("그제") {
        Some(-2)
    } else if lower.contains("어제") || lower.contains("yesterday") {
        Some(-1)
    } else if lower.contains("오늘") || lower.contains("today") {
        Some(0)
    } else {
        None
    };
    let days = Duration::try_days(offset?)?;
    now.checked_add_signed(days).map(|dt| dt.date())
}

fn adjust_period(period: Option<&str>, hour: u32) -> u32 {
    match period {
        Some("오후" | "저녁" | "밤") if hour < 12 => hour + 12,
        Some("오전" | "새벽") if hour == 12 => 0,
        _ => hour,
    }
}

/// Hour and minute from `오후 3시 20분` or `13:20`.
fn extract_clock_time(text: &str) -> Option<(u32, u32)> {
    for caps in KOR_HOUR.captures_iter(text) {
        if caps.get(3).is_some() {
            // "3시간" is a duration, not a clock time
            continue;
        }
        let hour = adjust_period(caps.get(1).map(|m| m.as_str()), num(&caps, 2)?);
        let minute = num(&caps, 4).unwrap_or(0);
        if hour < 24 && minute < 60 {
            return Some((hour, minute));
        }
    }
    let caps = COLON_TIME.captures(text)?;
    let (hour, minute) = (num(&caps, 1)?, num(&caps, 2)?);
    (hour < 24 && minute < 60).then_some((hour, minute))
}

/// The single time point a query asks about. Requires a clock time; the date
/// defaults to today when only a time is given.
pub fn resolve_time_point(text: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    for caps in ISO_DT.captures_iter(text) {
        if caps.get(4).is_some() {
            if let Some(dt) = parse_dt(&caps[0]) {
                return Some(dt);
            }
        }
    }
    let (hour, minute) = extract_clock_time(text)?;
    let date = resolve_date(text, now).unwrap_or(now.date());
    date.and_hms_opt(hour, minute, 0)
}

/// An explicit range: two datetimes joined by `~`/`부터`, `13시부터 15시까지`,
/// or `13:00~15:00`.
pub fn time_range(text: &str, now: NaiveDateTime) -> Option<TimeWindow> {
    let explicit: Vec<NaiveDateTime> = ISO_DT
        .captures_iter(text)
        .filter(|c| c.get(4).is_some())
        .filter_map(|c| parse_dt(&c[0]))
        .collect();
    if explicit.len() >= 2
        && ["~", "부터", "까지", " to "].iter().any(|sep| text.contains(sep))
    {
        return window(explicit[0], explicit[1]);
    }

    let date = resolve_date(text, now).unwrap_or(now.date());
    let hm = |period: Option<&str>, h: u32, m: u32| {
        date.and_hms_opt(adjust_period(period, h), m, 0)
    };

    if let Some(caps) = KOR_HOUR_RANGE.captures(text) {
        let start_period = period_of(&caps, 1);
        // a bare end hour inherits the start's period ("오후 1시부터 3시까지")
        let end_period = period_of(&caps, 4).or(start_period);
        let start = hm(start_period, num(&caps, 2)?, num(&caps, 3).unwrap_or(0))?;
        let end = hm(end_period, num(&caps, 5)?, num(&caps, 6).unwrap_or(0))?;
        return window(start, end);
    }
    if let Some(caps) = COLON_RANGE.captures(text) {
        let start_period = period_of(&caps, 1);
        let end_period = period_of(&caps, 4).or(start_period);
        let start = hm(start_period, num(&caps, 2)?, num(&caps, 3)?)?;
        let end = hm(end_period, num(&caps, 5)?, num(&caps, 6)?)?;
        return window(start, end);
    }
    None
}

fn window(start: NaiveDateTime, end: NaiveDateTime) -> Option<TimeWindow> {
    (end > start).then_some(TimeWindow { start, end })
}

/// A trailing duration ending now: `최근 3시간`, `지난 30분`, `last 2 hours`.
pub fn duration_range(text: &str, now: NaiveDateTime) -> Option<TimeWindow> {
    let (amount, unit) = if let Some(caps) = KOR_DURATION.captures(text) {
        (caps[1].parse::<i64>().ok()?, caps[2].to_string())
    } else {
        let caps = ENG_DURATION.captures(text)?;
        (caps[1].parse::<i64>().ok()?, caps[2].to_lowercase())
    };
    if amount <= 0 {
        return None;
    }
    let span = match unit.as_str() {
        "시간" | "hour" | "hours" => Duration::try_hours(amount)?,
        "분" | "minute" | "minutes" | "min" | "mins" => Duration::try_minutes(amount)?,
        "일" | "day" | "days" => Duration::try_days(amount)?,
        _ => return None,
    };
    window(now.checked_sub_signed(span)?, now)
}
