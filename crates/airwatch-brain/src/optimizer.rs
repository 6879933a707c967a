//! Setpoint arithmetic for the recommend path.
//!
//! Pure functions: a current reading (and optionally external conditions) in,
//! recommended temperature, humidity and CO2 out, each rounded to one decimal.
//! External humidity and CO2 are accepted but do not move the numbers; only
//! external temperature adjusts the temperature setpoint.

use airwatch_core::types::{round1, Field, FieldSet, SensorReading};
use serde::{Deserialize, Serialize};

/// Temperature, humidity and CO2, each optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub co2: Option<f64>,
}

impl Conditions {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.humidity.is_none() && self.co2.is_none()
    }

    pub fn value(&self, field: Field) -> Option<f64> {
        match field {
            Field::Temperature => self.temperature,
            Field::Humidity => self.humidity,
            Field::Gas => self.co2,
        }
    }

    pub fn present(&self) -> FieldSet {
        Field::ALL
            .into_iter()
            .filter(|f| self.value(*f).is_some())
            .fold(FieldSet::empty(), |mut set, f| {
                set.insert(f);
                set
            })
    }
}

impl From<&SensorReading> for Conditions {
    fn from(reading: &SensorReading) -> Self {
        Self {
            temperature: reading.temperature,
            humidity: reading.humidity,
            co2: reading.gas,
        }
    }
}

/// Base rule, then the external adjustment on top.
///
/// Values strictly between 23 and 24, or between 25 and 26, take the `+2`
/// branch: only `>= 26` and `[24, 25]` are cooled.
pub fn optimal_temperature(current: f64, external: Option<f64>) -> f64 {
    let mut target = if current >= 26.0 {
        current - 3.0
    } else if (24.0..=25.0).contains(&current) {
        current - 1.0
    } else {
        current + 2.0
    };

    match external {
        Some(ext) if ext >= 30.0 => target -= 1.0,
        Some(ext) if ext <= 20.0 => target += 1.0,
        _ => {}
    }
    round1(target)
}

pub fn optimal_humidity(current: f64) -> f64 {
    let target = if current >= 50.0 {
        current - 10.0
    } else if current <= 30.0 {
        current + 10.0
    } else {
        current
    };
    round1(target)
}

pub fn optimal_co2(current: f64) -> f64 {
    let target = if current >= 900.0 { current - 400.0 } else { current };
    round1(target)
}

/// Setpoints for every quantity present in `current`.
pub fn compute_optimum(current: &Conditions, external: Option<&Conditions>) -> Conditions {
    let external_temperature = external.and_then(|e| e.temperature);
    Conditions {
        temperature: current
            .temperature
            .map(|t| optimal_temperature(t, external_temperature)),
        humidity: current.humidity.map(optimal_humidity),
        co2: current.co2.map(optimal_co2),
    }
}
