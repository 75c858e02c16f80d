//! Cache key construction
//!
//! Keys are plain strings so that the remote tier stays useful across process
//! restarts and across instances:
//!
//! - City: `{city}-{operation}-{PROVIDER}-{language}`, e.g. `Lisbon-current-OPENWEATHERMAP-en`
//! - Coordinates: `coords-{lat:.6},{lon:.6}-{operation}-{PROVIDER}-{language}`
//!
//! Coordinates are truncated to six decimals; two points closer than that
//! share a key.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::CacheError;

/// A cached weather document: a JSON object with arbitrary nesting.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Weather providers that can sit behind the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Provider {
    OpenWeatherMap,
    WeatherApi,
    AccuWeather,
    Meteo,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::OpenWeatherMap,
        Provider::WeatherApi,
        Provider::AccuWeather,
        Provider::Meteo,
    ];

    /// Lowercase code accepted from callers, e.g. `openweathermap`
    pub fn code(self) -> &'static str {
        match self {
            Provider::OpenWeatherMap => "openweathermap",
            Provider::WeatherApi => "weatherapi",
            Provider::AccuWeather => "accuweather",
            Provider::Meteo => "meteo",
        }
    }

    /// Identifier embedded in cache keys
    pub fn key_id(self) -> &'static str {
        match self {
            Provider::OpenWeatherMap => "OPENWEATHERMAP",
            Provider::WeatherApi => "WEATHERAPI",
            Provider::AccuWeather => "ACCUWEATHER",
            Provider::Meteo => "METEO",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Provider::OpenWeatherMap => "OpenWeatherMap",
            Provider::WeatherApi => "WeatherAPI",
            Provider::AccuWeather => "AccuWeather",
            Provider::Meteo => "Meteo API",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Provider {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Provider::ALL
            .into_iter()
            .find(|p| p.code().eq_ignore_ascii_case(s))
            .ok_or_else(|| CacheError::UnknownProvider(s.to_owned()))
    }
}

/// What is being asked of the origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Current,
    Forecast,
}

impl Operation {
    pub const ALL: [Operation; 2] = [Operation::Current, Operation::Forecast];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Current => "current",
            Operation::Forecast => "forecast",
        }
    }

    pub fn region(self) -> Region {
        match self {
            Operation::Current => Region::Current,
            Operation::Forecast => Region::Forecast,
        }
    }
}

/// Named cache region. Each tier keeps one region per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Current,
    Forecast,
}

impl Region {
    pub const ALL: [Region; 2] = [Region::Current, Region::Forecast];

    pub fn name(self) -> &'static str {
        match self {
            Region::Current => "weather-current",
            Region::Forecast => "weather-forecast",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the weather is requested for
#[derive(Debug, Clone, PartialEq)]
pub enum Subject {
    City(String),
    Coords { lat: f64, lon: f64 },
}

impl Subject {
    /// A city subject. Surrounding whitespace is not part of the key.
    ///
    /// Names are limited to letters (Latin-1 included), whitespace, `-`, `'`
    /// and `,`. Without digits or `.` a city can never spell a coordinate
    /// subject.
    pub fn city(name: &str) -> Result<Self, CacheError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CacheError::InvalidKeyInput(
                "City name cannot be empty".to_owned(),
            ));
        }
        if !name.chars().all(is_city_char) {
            return Err(CacheError::InvalidKeyInput(format!(
                "City name contains invalid characters: {name:?}"
            )));
        }
        Ok(Subject::City(name.to_owned()))
    }

    pub fn coords(lat: f64, lon: f64) -> Result<Self, CacheError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(CacheError::InvalidKeyInput(
                "Latitude and longitude must be finite numbers".to_owned(),
            ));
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CacheError::InvalidKeyInput(
                "Latitude must be between -90 and 90".to_owned(),
            ));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(CacheError::InvalidKeyInput(
                "Longitude must be between -180 and 180".to_owned(),
            ));
        }
        // Adding 0.0 folds -0.0 into 0.0 so both render the same.
        Ok(Subject::Coords {
            lat: lat + 0.0,
            lon: lon + 0.0,
        })
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::City(name) => f.write_str(name),
            Subject::Coords { lat, lon } => write!(f, "coords-{lat:.6},{lon:.6}"),
        }
    }
}

fn is_city_char(c: char) -> bool {
    c.is_ascii_alphabetic()
        || ('\u{C0}'..='\u{FF}').contains(&c)
        || c.is_whitespace()
        || matches!(c, '-' | '\'' | ',')
}

/// Language segment of a key. It is the last `-` separated segment, so it
/// must not contain `-` itself; `pt_BR` is accepted, `pt-BR` is not.
fn is_language_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Deterministic cache key shared by both tiers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    raw: String,
    operation: Operation,
}

impl CacheKey {
    pub fn new(
        subject: &Subject,
        operation: Operation,
        provider: Provider,
        language: &str,
    ) -> Result<Self, CacheError> {
        // Variants can be built directly, so check the subject here as well.
        let subject = match subject {
            Subject::City(name) => Subject::city(name)?,
            Subject::Coords { lat, lon } => Subject::coords(*lat, *lon)?,
        };
        let language = language.trim();
        if language.is_empty() || !language.chars().all(is_language_char) {
            return Err(CacheError::InvalidKeyInput(format!(
                "Invalid language code: {language:?}"
            )));
        }
        Ok(Self {
            raw: format!(
                "{subject}-{}-{}-{language}",
                operation.as_str(),
                provider.key_id()
            ),
            operation,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn region(&self) -> Region {
        self.operation.region()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
