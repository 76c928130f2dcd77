use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::{
    model::{CurrentConditions, DailyForecast, LocationKind, NormalizedLocation},
    provider::{MAX_FORECAST_DAYS, ProviderError, most_frequent},
};

use super::WeatherProvider;

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// Forecast entries are 3 hours apart.
const ENTRIES_PER_DAY: u8 = 8;

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherProvider {
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

    fn location_query(location: &NormalizedLocation) -> Vec<(&'static str, String)> {
        match (location.kind, location.coordinates()) {
            (_, Some((lat, lon))) => vec![("lat", lat.to_string()), ("lon", lon.to_string())],
            (LocationKind::Zip, None) => {
                // only the 5-digit part is understood
                let zip = location.normalized_value.get(..5).unwrap_or(&location.normalized_value);
                vec![("zip", format!("{zip},us"))]
            }
            _ => vec![("q", location.normalized_value.clone())],
        }
    }

    async fn get(
        &self,
        endpoint: &str,
        location: &NormalizedLocation,
        extra: &[(&'static str, String)],
    ) -> Result<String, ProviderError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let mut query = Self::location_query(location);
        query.extend(extra.iter().cloned());
        query.push(("appid", self.api_key.clone()));
        query.push(("units", "metric".to_string()));

        debug!(%url, location = %location.normalized_value, "OpenWeather request");
        let res = self.http.get(&url).query(&query).send().await?;

        let status = res.status();
        let body = res.text().await?;

        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::LocationNotFound);
        }
        if !status.is_success() {
            return Err(ProviderError::from_status(status, &body));
        }
        Ok(body)
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: f64,
    humidity: u8,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct OwCoord {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Default, Deserialize)]
struct OwSys {
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    name: String,
    dt: i64,
    coord: Option<OwCoord>,
    #[serde(default)]
    sys: OwSys,
    main: OwMain,
    weather: Vec<OwWeather>,
    wind: OwWind,
}

#[derive(Debug, Deserialize)]
struct OwCity {
    #[serde(default)]
    timezone: i64,
}

#[derive(Debug, Deserialize)]
struct OwForecastEntry {
    dt: i64,
    main: OwMain,
    weather: Vec<OwWeather>,
    #[serde(default)]
    pop: f64,
}

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    city: OwCity,
    list: Vec<OwForecastEntry>,
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn name(&self) -> &'static str {
        "openweather"
    }

    async fn fetch_current(
        &self,
        location: &NormalizedLocation,
    ) -> Result<CurrentConditions, ProviderError> {
        let body = self.get("weather", location, &[]).await?;
        let parsed: OwCurrentResponse = serde_json::from_str(&body)?;

        let description = parsed
            .weather
            .first()
            .map(|w| w.description.clone())
            .unwrap_or_else(|| "Unknown".to_string());

        let resolved_name = match parsed.sys.country {
            Some(country) if !parsed.name.is_empty() => format!("{}, {country}", parsed.name),
            _ if !parsed.name.is_empty() => parsed.name,
            _ => location.normalized_value.clone(),
        };

        Ok(CurrentConditions {
            provider: self.name().to_string(),
            resolved_name,
            temperature_c: parsed.main.temp,
            feels_like_c: parsed.main.feels_like,
            humidity_pct: parsed.main.humidity,
            wind_speed_mps: parsed.wind.speed,
            description,
            observed_at: DateTime::from_timestamp(parsed.dt, 0).unwrap_or_else(Utc::now),
            latitude: parsed.coord.as_ref().map(|c| c.lat),
            longitude: parsed.coord.as_ref().map(|c| c.lon),
        })
    }

    async fn fetch_forecast(
        &self,
        location: &NormalizedLocation,
        days: u8,
    ) -> Result<Vec<DailyForecast>, ProviderError> {
        let days = days.clamp(1, MAX_FORECAST_DAYS);
        let cnt = (days * ENTRIES_PER_DAY).to_string();
        let body = self.get("forecast", location, &[("cnt", cnt)]).await?;
        let parsed: OwForecastResponse = serde_json::from_str(&body)?;

        Ok(group_by_day(&parsed, usize::from(days)))
    }
}

/// Fold 3-hourly entries into per-day summaries in the location's local time.
fn group_by_day(parsed: &OwForecastResponse, days: usize) -> Vec<DailyForecast> {
    let mut by_day: BTreeMap<NaiveDate, Vec<&OwForecastEntry>> = BTreeMap::new();
    for entry in &parsed.list {
        let Some(local) = DateTime::from_timestamp(entry.dt + parsed.city.timezone, 0) else {
            continue;
        };
        by_day.entry(local.date_naive()).or_default().push(entry);
    }

    by_day
        .into_iter()
        .take(days)
        .map(|(date, entries)| {
            let temps = entries.iter().map(|e| e.main.temp);
            let temp_min_c = temps.clone().fold(f64::INFINITY, f64::min);
            let temp_max_c = temps.fold(f64::NEG_INFINITY, f64::max);
            let condition = most_frequent(
                entries
                    .iter()
                    .filter_map(|e| e.weather.first().map(|w| w.description.as_str())),
            )
            .unwrap_or_else(|| "Unknown".to_string());
            let precipitation_prob = entries.iter().map(|e| e.pop).fold(0.0, f64::max);

            DailyForecast {
                date,
                temp_min_c,
                temp_max_c,
                condition,
                precipitation_prob,
            }
        })
        .collect()
}
