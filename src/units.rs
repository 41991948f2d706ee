//! Unit conversions applied to each fetched value.
//!
//! Codes line up with the unit conversion selector in the query editor.

use std::f64::consts::PI;

use crate::error::{QueryError, QueryResult};

/// Offset between the Kelvin and Celsius scales
pub const KELVIN_OFFSET: f64 = 273.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitConversion {
    None,
    DegreesToRadians,
    RadiansToDegrees,
    KelvinToCelsius,
    CelsiusToKelvin,
}

impl UnitConversion {
    pub fn code(self) -> i64 {
        match self {
            UnitConversion::None => 0,
            UnitConversion::DegreesToRadians => 1,
            UnitConversion::RadiansToDegrees => 2,
            UnitConversion::KelvinToCelsius => 3,
            UnitConversion::CelsiusToKelvin => 4,
        }
    }

    pub fn apply(self, value: f64) -> f64 {
        match self {
            UnitConversion::None => value,
            // RAD = DEG * π/180
            UnitConversion::DegreesToRadians => value * (PI / 180.0),
            // DEG = RAD * 180/π
            UnitConversion::RadiansToDegrees => value * (180.0 / PI),
            // Offsets only, the editor labels these K→°C and °C→K.
            UnitConversion::KelvinToCelsius => value + KELVIN_OFFSET,
            UnitConversion::CelsiusToKelvin => value - KELVIN_OFFSET,
        }
    }
}

impl TryFrom<i64> for UnitConversion {
    type Error = QueryError;

    fn try_from(code: i64) -> QueryResult<Self> {
        match code {
            0 => Ok(UnitConversion::None),
            1 => Ok(UnitConversion::DegreesToRadians),
            2 => Ok(UnitConversion::RadiansToDegrees),
            3 => Ok(UnitConversion::KelvinToCelsius),
            4 => Ok(UnitConversion::CelsiusToKelvin),
            other => Err(QueryError::UnknownConversion(other)),
        }
    }
}

/// Convert a single value by conversion code
pub fn convert(code: i64, value: f64) -> QueryResult<f64> {
    UnitConversion::try_from(code).map(|conversion| conversion.apply(value))
}
