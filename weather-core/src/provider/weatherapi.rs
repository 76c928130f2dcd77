use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::{
    model::{CurrentConditions, DailyForecast, NormalizedLocation},
    provider::{MAX_FORECAST_DAYS, ProviderError},
};

use super::WeatherProvider;

pub const DEFAULT_BASE_URL: &str = "https://api.weatherapi.com/v1";

/// WeatherAPI.com error code for "No matching location found."
const NO_MATCHING_LOCATION: i64 = 1006;

#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl WeatherApiProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_client(api_key, Client::new())
    }

    pub fn with_client(api_key: String, http: Client) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            http,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get(
        &self,
        endpoint: &str,
        location: &NormalizedLocation,
        extra: &[(&'static str, String)],
    ) -> Result<String, ProviderError> {
        let url = format!("{}/{endpoint}", self.base_url);
        // q accepts ZIP codes, "lat,lon" and free text alike
        let mut query = vec![
            ("key", self.api_key.clone()),
            ("q", location.normalized_value.clone()),
        ];
        query.extend(extra.iter().cloned());

        debug!(%url, location = %location.normalized_value, "WeatherAPI request");
        let res = self.http.get(&url).query(&query).send().await?;

        let status = res.status();
        let body = res.text().await?;

        if status.is_success() {
            return Ok(body);
        }
        if status == StatusCode::BAD_REQUEST && error_code(&body) == Some(NO_MATCHING_LOCATION) {
            return Err(ProviderError::LocationNotFound);
        }
        Err(ProviderError::from_status(status, &body))
    }
}

fn error_code(body: &str) -> Option<i64> {
    serde_json::from_str::<WaErrorResponse>(body).ok().map(|r| r.error.code)
}

#[derive(Debug, Deserialize)]
struct WaErrorDetail {
    code: i64,
}

#[derive(Debug, Deserialize)]
struct WaErrorResponse {
    error: WaErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    name: String,
    country: String,
    lat: Option<f64>,
    lon: Option<f64>,
    localtime_epoch: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WaCondition {
    text: String,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    temp_c: f64,
    feelslike_c: f64,
    humidity: u8,
    wind_kph: f64,
    condition: WaCondition,
    last_updated_epoch: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WaResponse {
    location: WaLocation,
    current: WaCurrent,
}

#[derive(Debug, Deserialize)]
struct WaDay {
    maxtemp_c: f64,
    mintemp_c: f64,
    #[serde(default)]
    daily_chance_of_rain: f64,
    condition: WaCondition,
}

#[derive(Debug, Deserialize)]
struct WaForecastDay {
    date: NaiveDate,
    day: WaDay,
}

#[derive(Debug, Deserialize)]
struct WaForecast {
    forecastday: Vec<WaForecastDay>,
}

#[derive(Debug, Deserialize)]
struct WaForecastResponse {
    forecast: WaForecast,
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn name(&self) -> &'static str {
        "weatherapi"
    }

    async fn fetch_current(
        &self,
        location: &NormalizedLocation,
    ) -> Result<CurrentConditions, ProviderError> {
        let body = self.get("current.json", location, &[]).await?;
        let parsed: WaResponse = serde_json::from_str(&body)?;

        let ts = parsed.current.last_updated_epoch.or(parsed.location.localtime_epoch);
        let observed_at = ts.and_then(|t| DateTime::from_timestamp(t, 0)).unwrap_or_else(Utc::now);

        Ok(CurrentConditions {
            provider: self.name().to_string(),
            resolved_name: format!("{}, {}", parsed.location.name, parsed.location.country),
            temperature_c: parsed.current.temp_c,
            feels_like_c: parsed.current.feelslike_c,
            humidity_pct: parsed.current.humidity,
            wind_speed_mps: parsed.current.wind_kph / 3.6,
            description: parsed.current.condition.text,
            observed_at,
            latitude: parsed.location.lat,
            longitude: parsed.location.lon,
        })
    }

    async fn fetch_forecast(
        &self,
        location: &NormalizedLocation,
        days: u8,
    ) -> Result<Vec<DailyForecast>, ProviderError> {
        let days = days.clamp(1, MAX_FORECAST_DAYS);
        let body = self.get("forecast.json", location, &[("days", days.to_string())]).await?;
        let parsed: WaForecastResponse = serde_json::from_str(&body)?;

        Ok(parsed
            .forecast
            .forecastday
            .into_iter()
            .take(usize::from(days))
            .map(|fd| DailyForecast {
                date: fd.date,
                temp_min_c: fd.day.mintemp_c,
                temp_max_c: fd.day.maxtemp_c,
                condition: fd.day.condition.text,
                precipitation_prob: (fd.day.daily_chance_of_rain / 100.0).clamp(0.0, 1.0),
            })
            .collect())
    }
}
