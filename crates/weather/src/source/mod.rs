//! Weather data sources.
//!
//! The tools only see the [`WeatherSource`] trait, so the deterministic
//! [`FixedSource`] and the live [`OpenMeteo`] source are interchangeable.

mod open_meteo;

pub use open_meteo::{OpenMeteo, OpenMeteoBuilder};

use std::fmt;
use std::future::Future;

use chrono::{Days, Local, NaiveDate};
use thiserror::Error;

/// Errors from fetching weather data.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("location not found: {0}")]
    LocationNotFound(String),
    #[error("network: {0}")]
    Network(String),
    #[error("weather api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid weather data: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, SourceError>;

/// Where a forecast is wanted: a place name or a geocoding id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Name(String),
    Id(i64),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Name(name) => f.write_str(name),
            Location::Id(id) => write!(f, "{id}"),
        }
    }
}

/// One day of forecast.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyForecast {
    pub date: NaiveDate,
    /// WMO weather interpretation code.
    pub weather_code: u8,
    pub temperature_max: f64,
    pub temperature_min: f64,
    pub precipitation_mm: f64,
}

impl DailyForecast {
    pub fn conditions(&self) -> &'static str {
        describe_weather_code(self.weather_code)
    }
}

impl fmt::Display for DailyForecast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}, ", self.date, self.conditions())?;
        if self.temperature_max == self.temperature_min {
            write!(f, "{:.0} °C", self.temperature_max)?;
        } else {
            write!(
                f,
                "{:.0} to {:.0} °C",
                self.temperature_min, self.temperature_max
            )?;
        }
        write!(f, ", precipitation {:.1} mm", self.precipitation_mm)
    }
}

/// A resolved location and its daily forecasts, earliest first.
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub location: String,
    pub days: Vec<DailyForecast>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    Thunderstorm,
    Heat,
    Frost,
    HeavyPrecipitation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub kind: WarningKind,
    pub date: NaiveDate,
    pub detail: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.date, self.detail)
    }
}

pub const HEAT_THRESHOLD_C: f64 = 35.0;
pub const FROST_THRESHOLD_C: f64 = -10.0;
pub const HEAVY_PRECIPITATION_MM: f64 = 50.0;

/// Warnings implied by a forecast, in date order.
pub fn derive_warnings(forecast: &Forecast) -> Vec<Warning> {
    let mut warnings = Vec::new();
    for day in &forecast.days {
        let mut warn = |kind, detail: String| {
            warnings.push(Warning {
                kind,
                date: day.date,
                detail,
            })
        };
        if matches!(day.weather_code, 95 | 96 | 99) {
            warn(WarningKind::Thunderstorm, day.conditions().to_string());
        }
        if day.temperature_max >= HEAT_THRESHOLD_C {
            warn(
                WarningKind::Heat,
                format!("heat, up to {:.0} °C", day.temperature_max),
            );
        }
        if day.temperature_min <= FROST_THRESHOLD_C {
            warn(
                WarningKind::Frost,
                format!("severe frost, down to {:.0} °C", day.temperature_min),
            );
        }
        if day.precipitation_mm >= HEAVY_PRECIPITATION_MM {
            warn(
                WarningKind::HeavyPrecipitation,
                format!("heavy precipitation, {:.0} mm", day.precipitation_mm),
            );
        }
    }
    warnings
}

/// Text for a WMO weather interpretation code.
pub fn describe_weather_code(code: u8) -> &'static str {
    match code {
        0 => "clear sky",
        1 => "mainly clear",
        2 => "partly cloudy",
        3 => "overcast",
        45 | 48 => "fog",
        51 | 53 | 55 => "drizzle",
        56 | 57 => "freezing drizzle",
        61 | 63 | 65 => "rain",
        66 | 67 => "freezing rain",
        71 | 73 | 75 => "snow",
        77 => "snow grains",
        80..=82 => "rain showers",
        85 | 86 => "snow showers",
        95 => "thunderstorm",
        96 | 99 => "thunderstorm with hail",
        _ => "unknown conditions",
    }
}

/// Provider of forecasts and warnings.
pub trait WeatherSource: Send + Sync + 'static {
    /// Daily forecast for `days` days starting today.
    fn daily_forecast(
        &self,
        location: &Location,
        days: u32,
    ) -> impl Future<Output = Result<Forecast>> + Send;

    /// Active warnings for the coming days.
    fn warnings(&self, location: &Location) -> impl Future<Output = Result<Vec<Warning>>> + Send;
}

/// Deterministic source: clear sky and 28 °C everywhere, no warnings.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedSource;

impl FixedSource {
    pub const TEMPERATURE_C: f64 = 28.0;
}

impl WeatherSource for FixedSource {
    async fn daily_forecast(&self, location: &Location, days: u32) -> Result<Forecast> {
        let today = Local::now().date_naive();
        let days = (0..u64::from(days))
            .filter_map(|offset| today.checked_add_days(Days::new(offset)))
            .map(|date| DailyForecast {
                date,
                weather_code: 0,
                temperature_max: Self::TEMPERATURE_C,
                temperature_min: Self::TEMPERATURE_C,
                precipitation_mm: 0.0,
            })
            .collect();
        Ok(Forecast {
            location: location.to_string(),
            days,
        })
    }

    async fn warnings(&self, _location: &Location) -> Result<Vec<Warning>> {
        Ok(Vec::new())
    }
}
