use once_cell::sync::Lazy;
use regex::Regex;

use crate::optimizer::Conditions;

const OUTSIDE: &str = r"(?:외부|바깥|밖|실외)";

static EXTERNAL_TEMPERATURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"{OUTSIDE}\s*(?:온도|기온)[는은이가]?\s*(-?\d+(?:\.\d+)?)\s*(?:도|℃)"
    ))
    .expect("valid regex")
});
static EXTERNAL_HUMIDITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"{OUTSIDE}\s*습도[는은이가]?\s*(\d+(?:\.\d+)?)\s*%?"))
        .expect("valid regex")
});
static EXTERNAL_CO2: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i){OUTSIDE}\s*(?:co2|이산화탄소|공기질)[는은이가]?\s*(\d+(?:\.\d+)?)\s*(?:ppm)?"
    ))
    .expect("valid regex")
});

fn capture(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

/// External conditions stated in the query (`외부 온도 30도`, `밖 습도는 70%`,
/// `실외 CO2 450ppm`). `None` when the query mentions none.
pub fn extract_external_conditions(text: &str) -> Option<Conditions> {
    let conditions = Conditions {
        temperature: capture(&EXTERNAL_TEMPERATURE, text),
        humidity: capture(&EXTERNAL_HUMIDITY, text),
        co2: capture(&EXTERNAL_CO2, text),
    };
    (!conditions.is_empty()).then_some(conditions)
}
