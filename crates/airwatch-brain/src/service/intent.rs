use airwatch_core::types::{Field, FieldSet};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Intent keywords detected in a query. Flags overlap; the cascade decides
/// precedence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntentSet {
    pub daily_summary: bool,
    pub temperature_keyword: bool,
    pub today: bool,
    pub aggregate: bool,
    pub extrema: bool,
    pub recent: bool,
    pub followup: bool,
    pub sensor_vocabulary: bool,
}

/// Pluggable intent detection. The cascade only sees the resulting flags.
pub trait IntentDetector: Send + Sync {
    fn detect(&self, text: &str) -> IntentSet;
}

/// Korean/English keyword and pattern matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordIntentDetector;

const DAILY_KEYWORDS: &[&str] = &[
    "일별", "일평균", "일 평균", "하루 평균", "하루평균", "날짜별", "일자별", "daily", "per day",
];
const AGGREGATE_KEYWORDS: &[&str] = &["평균", "전체", "모든"];
const AGGREGATE_WORDS: &[&str] = &["average", "all", "every"];
const RECENT_KEYWORDS: &[&str] = &[
    "최근", "최신", "지금", "현재", "방금", "latest", "recent", "right now", "current",
];
const FOLLOWUP_PREFIXES: &[&str] = &[
    "그럼", "그러면", "그때", "그 때", "그 시간", "그 시각", "그날", "그 날", "and ", "what about",
    "how about",
];
const FOLLOWUP_SUFFIXES: &[&str] = &["는?", "은?", "는", "은"];
const SENSOR_VOCABULARY: &[&str] = &[
    "센서", "측정", "실내", "공기", "환경", "sensor", "reading", "indoor",
];

/// Extrema patterns. The `가장 .. 더운` family is discontiguous, hence regexes.
static EXTREMA: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        "최고",
        "최저",
        "가장.*더운",
        "가장.*차가운",
        "가장.*추운",
        "가장.*높은",
        "가장.*낮은",
        r"(?i)\b(hottest|coldest|warmest|highest|lowest)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

const FIELD_SYNONYMS: &[(Field, &[&str])] = &[
    (Field::Temperature, &["온도", "기온", "temperature", "temp"]),
    (Field::Humidity, &["습도", "humidity", "humid"]),
    (Field::Gas, &["co2", "이산화탄소", "공기질", "가스", "gas", "ppm"]),
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

impl IntentDetector for KeywordIntentDetector {
    fn detect(&self, text: &str) -> IntentSet {
        let lower = text.to_lowercase();
        let trimmed = lower.trim();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let followup = FOLLOWUP_PREFIXES.iter().any(|p| trimmed.starts_with(p))
            || (trimmed.chars().count() <= 12
                && FOLLOWUP_SUFFIXES.iter().any(|s| trimmed.ends_with(s)));

        IntentSet {
            daily_summary: contains_any(&lower, DAILY_KEYWORDS),
            temperature_keyword: text.contains("온도") || lower.contains("temperature"),
            today: text.contains("오늘") || words.contains(&"today"),
            aggregate: contains_any(text, AGGREGATE_KEYWORDS)
                || AGGREGATE_WORDS.iter().any(|w| words.contains(w)),
            extrema: EXTREMA.iter().any(|re| re.is_match(text)),
            recent: contains_any(&lower, RECENT_KEYWORDS),
            followup,
            sensor_vocabulary: contains_any(&lower, SENSOR_VOCABULARY),
        }
    }
}

/// Fields the query names explicitly (possibly none).
pub fn mentioned_fields(text: &str) -> FieldSet {
    let lower = text.to_lowercase();
    let mut set = FieldSet::empty();
    for (field, synonyms) in FIELD_SYNONYMS {
        if contains_any(&lower, synonyms) {
            set.insert(*field);
        }
    }
    set
}

/// Fields the query asks for. Naming no field means all of them.
pub fn detect_fields(text: &str) -> FieldSet {
    let set = mentioned_fields(text);
    if set.is_empty() {
        FieldSet::all()
    } else {
        set
    }
}

/// Canonical field name for a token that contains one of its synonyms
/// (`온도는` → `temperature`).
pub fn canonical_field(token: &str) -> Option<Field> {
    FIELD_SYNONYMS
        .iter()
        .find(|(_, synonyms)| contains_any(token, synonyms))
        .map(|(field, _)| *field)
}

/// Which end of the range an extrema query wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extreme {
    Max,
    Min,
}

pub fn extrema_direction(text: &str) -> Extreme {
    let lower = text.to_lowercase();
    let min = contains_any(
        &lower,
        &["최저", "차가운", "추운", "낮은", "coldest", "lowest", "minimum"],
    );
    let max = contains_any(
        &lower,
        &["최고", "더운", "높은", "hottest", "highest", "warmest", "maximum"],
    );
    if min && !max {
        Extreme::Min
    } else {
        Extreme::Max
    }
}

/// Top-level route: ordinary chat or a sensor question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteDecision {
    General,
    Sensor,
}

/// Parse the route classifier's answer. Anything other than an explicit
/// `general` goes to the sensor path, whose RAG gate falls back to plain
/// generation on its own.
pub fn parse_route(llm_response: &str) -> RouteDecision {
    let json_str = extract_json(llm_response);

    let parsed: serde_json::Value = match serde_json::from_str(json_str) {
        Ok(v) => v,
        Err(_) => return RouteDecision::Sensor,
    };

    match parsed["route"].as_str() {
        Some("general") => RouteDecision::General,
        _ => RouteDecision::Sensor,
    }
}

/// Extract a JSON object from a string that may contain surrounding text
/// or markdown code fences.
fn extract_json(input: &str) -> &str {
    let trimmed = input.trim();

    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.strip_suffix("```").unwrap_or(s).trim())
        .unwrap_or(trimmed);

    if let (Some(start), Some(end)) = (stripped.find('{'), stripped.rfind('}')) {
        if end >= start {
            return &stripped[start..=end];
        }
    }

    stripped
}
