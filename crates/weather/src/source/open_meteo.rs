//! Open-Meteo geocoding and forecast API.

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use super::{
    DailyForecast, Forecast, Location, Result, SourceError, Warning, WeatherSource, derive_warnings,
};

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Days of forecast fetched when deriving warnings.
const WARNING_HORIZON_DAYS: u32 = 3;

const DAILY_FIELDS: &str = "weather_code,temperature_2m_max,temperature_2m_min,precipitation_sum";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Place>,
}

#[derive(Debug, Deserialize)]
struct Place {
    name: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    country: Option<String>,
}

impl Place {
    fn label(&self) -> String {
        match &self.country {
            Some(country) => format!("{}, {country}", self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    daily: Daily,
}

#[derive(Debug, Deserialize)]
struct Daily {
    time: Vec<String>,
    weather_code: Vec<Option<u8>>,
    temperature_2m_max: Vec<Option<f64>>,
    temperature_2m_min: Vec<Option<f64>>,
    precipitation_sum: Vec<Option<f64>>,
}

impl Daily {
    fn into_days(self) -> Result<Vec<DailyForecast>> {
        let len = self.time.len();
        if [
            self.weather_code.len(),
            self.temperature_2m_max.len(),
            self.temperature_2m_min.len(),
            self.precipitation_sum.len(),
        ]
        .iter()
        .any(|&n| n != len)
        {
            return Err(SourceError::InvalidResponse(
                "daily series have different lengths".into(),
            ));
        }

        let mut days = Vec::with_capacity(len);
        for i in 0..len {
            let date = NaiveDate::parse_from_str(&self.time[i], "%Y-%m-%d").map_err(|e| {
                SourceError::InvalidResponse(format!("bad date {:?}: {e}", self.time[i]))
            })?;
            let (Some(temperature_max), Some(temperature_min)) =
                (self.temperature_2m_max[i], self.temperature_2m_min[i])
            else {
                // Past the model's horizon the API pads with nulls.
                continue;
            };
            days.push(DailyForecast {
                date,
                weather_code: self.weather_code[i].unwrap_or(u8::MAX),
                temperature_max,
                temperature_min,
                precipitation_mm: self.precipitation_sum[i].unwrap_or(0.0),
            });
        }
        Ok(days)
    }
}

/// Builder for [`OpenMeteo`].
#[derive(Debug, Clone)]
pub struct OpenMeteoBuilder {
    geocoding_url: String,
    forecast_url: String,
    timeout: Duration,
}

impl OpenMeteoBuilder {
    fn new() -> Self {
        Self {
            geocoding_url: GEOCODING_URL.to_string(),
            forecast_url: FORECAST_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Use alternative API base URLs (mirrors, self-hosted instances).
    pub fn endpoints(
        mut self,
        geocoding_url: impl Into<String>,
        forecast_url: impl Into<String>,
    ) -> Self {
        self.geocoding_url = geocoding_url.into();
        self.forecast_url = forecast_url.into();
        self
    }

    /// Limit on each HTTP request, connection included.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<OpenMeteo> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout.min(CONNECT_TIMEOUT))
            .build()
            .map_err(|e| SourceError::Network(format!("http client: {e}")))?;

        Ok(OpenMeteo {
            client,
            geocoding_url: self.geocoding_url.trim_end_matches('/').to_string(),
            forecast_url: self.forecast_url,
        })
    }
}

/// Live data from <https://open-meteo.com>. No API key required.
#[derive(Debug, Clone)]
pub struct OpenMeteo {
    client: reqwest::Client,
    geocoding_url: String,
    forecast_url: String,
}

impl OpenMeteo {
    /// Client for the public API with the default timeout.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> OpenMeteoBuilder {
        OpenMeteoBuilder::new()
    }

    async fn resolve(&self, location: &Location) -> Result<Place> {
        match location {
            Location::Name(name) => {
                let url = endpoint(
                    &format!("{}/search", self.geocoding_url),
                    &[("name", name.as_str()), ("count", "1"), ("format", "json")],
                )?;
                let response: SearchResponse = self.get_json(url).await?;
                response
                    .results
                    .into_iter()
                    .next()
                    .ok_or_else(|| SourceError::LocationNotFound(name.clone()))
            }
            Location::Id(id) => {
                let id = id.to_string();
                let url = endpoint(&format!("{}/get", self.geocoding_url), &[("id", id.as_str())])?;
                match self.get_json(url).await {
                    Err(SourceError::Api { status, .. })
                        if status == StatusCode::BAD_REQUEST.as_u16()
                            || status == StatusCode::NOT_FOUND.as_u16() =>
                    {
                        Err(SourceError::LocationNotFound(id))
                    }
                    other => other,
                }
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(%url, "open-meteo request");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Api { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))
    }
}

fn endpoint(base: &str, params: &[(&str, &str)]) -> Result<Url> {
    Url::parse_with_params(base, params)
        .map_err(|e| SourceError::Network(format!("invalid url {base}: {e}")))
}

impl WeatherSource for OpenMeteo {
    async fn daily_forecast(&self, location: &Location, days: u32) -> Result<Forecast> {
        let place = self.resolve(location).await?;
        let latitude = place.latitude.to_string();
        let longitude = place.longitude.to_string();
        let days = days.to_string();
        let url = endpoint(
            &self.forecast_url,
            &[
                ("latitude", latitude.as_str()),
                ("longitude", longitude.as_str()),
                ("daily", DAILY_FIELDS),
                ("forecast_days", days.as_str()),
                ("timezone", "auto"),
            ],
        )?;
        let response: ForecastResponse = self.get_json(url).await?;
        Ok(Forecast {
            location: place.label(),
            days: response.daily.into_days()?,
        })
    }

    async fn warnings(&self, location: &Location) -> Result<Vec<Warning>> {
        let forecast = self.daily_forecast(location, WARNING_HORIZON_DAYS).await?;
        Ok(derive_warnings(&forecast))
    }
}
