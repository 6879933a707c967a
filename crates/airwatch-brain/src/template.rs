//! Answer shapes for the recommend path.
//!
//! `select_template` is total: every combination of indoor fields, external
//! fields and ask mode maps to exactly one `Template`, with `SimpleNumeric`
//! as the catch-all.

use airwatch_core::types::{Field, FieldSet};

use crate::optimizer::Conditions;

/// What the question asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskMode {
    Current,
    Optimal,
    Explain,
    Unspecified,
}

const EXPLAIN_WORDS: &[&str] = &["왜", "이유", "설명", "explain", "why"];
const OPTIMAL_WORDS: &[&str] = &["최적", "적정", "추천", "권장", "optimal", "recommend", "ideal"];
const CURRENT_WORDS: &[&str] = &["현재", "지금", "몇", "current", "now"];

pub fn detect_ask_mode(text: &str) -> AskMode {
    let lower = text.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    if has(EXPLAIN_WORDS) {
        AskMode::Explain
    } else if has(OPTIMAL_WORDS) {
        AskMode::Optimal
    } else if has(CURRENT_WORDS) {
        AskMode::Current
    } else {
        AskMode::Unspecified
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    ExternalTemperature,
    ExternalHumidity,
    ExternalCo2,
    ExternalTemperatureHumidity,
    ExternalTemperatureCo2,
    ExternalHumidityCo2,
    ExternalAll,
    /// "27.5도"
    CurrentValue(Field),
    /// "24도"
    OptimalValue(Field),
    /// Current and optimal values for several fields, one sentence.
    Explanation,
    /// Bare optimal numbers with units.
    SimpleNumeric,
}

impl Template {
    fn external(fields: FieldSet) -> Option<Self> {
        let t = match (fields.temperature, fields.humidity, fields.gas) {
            (true, false, false) => Template::ExternalTemperature,
            (false, true, false) => Template::ExternalHumidity,
            (false, false, true) => Template::ExternalCo2,
            (true, true, false) => Template::ExternalTemperatureHumidity,
            (true, false, true) => Template::ExternalTemperatureCo2,
            (false, true, true) => Template::ExternalHumidityCo2,
            (true, true, true) => Template::ExternalAll,
            (false, false, false) => return None,
        };
        Some(t)
    }

    /// Fields an external template compares.
    pub fn external_fields(self) -> Option<FieldSet> {
        let list: &[Field] = match self {
            Template::ExternalTemperature => &[Field::Temperature],
            Template::ExternalHumidity => &[Field::Humidity],
            Template::ExternalCo2 => &[Field::Gas],
            Template::ExternalTemperatureHumidity => &[Field::Temperature, Field::Humidity],
            Template::ExternalTemperatureCo2 => &[Field::Temperature, Field::Gas],
            Template::ExternalHumidityCo2 => &[Field::Humidity, Field::Gas],
            Template::ExternalAll => &Field::ALL,
            _ => return None,
        };
        Some(FieldSet::from(list.to_vec()))
    }
}

/// Fields the answer covers: those asked for and measured, or every measured
/// field when the question names none of them.
pub fn relevant_fields(present: FieldSet, asked: FieldSet) -> FieldSet {
    let both = asked.intersection(&present);
    if both.is_empty() {
        present
    } else {
        both
    }
}

fn single(fields: FieldSet) -> Option<Field> {
    let mut it = fields.iter();
    match (it.next(), it.next()) {
        (Some(f), None) => Some(f),
        _ => None,
    }
}

/// Pick the answer shape. External comparisons win whenever an external value
/// lines up with a measured indoor value.
pub fn select_template(
    present: FieldSet,
    external: FieldSet,
    asked: FieldSet,
    mode: AskMode,
) -> Template {
    if let Some(t) = Template::external(external.intersection(&present)) {
        return t;
    }
    let relevant = relevant_fields(present, asked);
    match (mode, single(relevant)) {
        (AskMode::Current, Some(f)) => Template::CurrentValue(f),
        (AskMode::Optimal, Some(f)) => Template::OptimalValue(f),
        (AskMode::Current | AskMode::Optimal | AskMode::Explain, _) if !relevant.is_empty() => {
            Template::Explanation
        }
        _ => Template::SimpleNumeric,
    }
}

/// Unit as written in answers.
fn unit(field: Field) -> &'static str {
    match field {
        Field::Temperature => "도",
        Field::Humidity => "%",
        Field::Gas => "ppm",
    }
}

fn fmt_num(value: f64) -> String {
    format!("{value}")
}

fn with_unit(value: Option<f64>, field: Field) -> String {
    match value {
        Some(v) => format!("{}{}", fmt_num(v), unit(field)),
        None => "-".to_string(),
    }
}

fn optimal_clause(fields: FieldSet, optimum: &Conditions) -> String {
    fields
        .iter()
        .map(|f| format!("최적{}는 {}", f.label(), with_unit(optimum.value(f), f)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render `template` over `fields` (see [`relevant_fields`]).
pub fn render(
    template: Template,
    fields: FieldSet,
    current: &Conditions,
    optimum: &Conditions,
    external: Option<&Conditions>,
) -> String {
    let outside = external.copied().unwrap_or_default();

    if let Some(ext_fields) = template.external_fields() {
        let indoor = match single(ext_fields) {
            Some(f) => format!(
                "실내{} {}, 외부{} {}",
                f.label(),
                with_unit(current.value(f), f),
                f.label(),
                with_unit(outside.value(f), f)
            ),
            None => ext_fields
                .iter()
                .map(|f| {
                    format!(
                        "실내{} {}(외부 {})",
                        f.label(),
                        with_unit(current.value(f), f),
                        with_unit(outside.value(f), f)
                    )
                })
                .collect::<Vec<_>>()
                .join(", "),
        };
        return format!(
            "현재 {indoor} 기준으로 {}입니다.",
            optimal_clause(ext_fields, optimum)
        );
    }

    match template {
        Template::CurrentValue(f) => with_unit(current.value(f), f),
        Template::OptimalValue(f) => with_unit(optimum.value(f), f),
        Template::Explanation => {
            let indoor = fields
                .iter()
                .map(|f| format!("실내{} {}", f.label(), with_unit(current.value(f), f)))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "현재 {indoor} 기준으로 {}입니다.",
                optimal_clause(fields, optimum)
            )
        }
        _ => fields
            .iter()
            .filter_map(|f| optimum.value(f).map(|v| format!("{}{}", fmt_num(v), unit(f))))
            .collect::<Vec<_>>()
            .join(", "),
    }
}
