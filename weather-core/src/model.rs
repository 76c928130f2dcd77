use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::date_range::DateRange;

/// Classification assigned to a location string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Zip,
    Coordinates,
    City,
    Landmark,
}

impl LocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationKind::Zip => "zip",
            LocationKind::Coordinates => "coordinates",
            LocationKind::City => "city",
            LocationKind::Landmark => "landmark",
        }
    }

    pub const fn all() -> &'static [LocationKind] {
        &[
            LocationKind::Zip,
            LocationKind::Coordinates,
            LocationKind::City,
            LocationKind::Landmark,
        ]
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown location type '{0}', expected one of: zip, coordinates, city, landmark")]
pub struct UnknownLocationKind(pub String);

impl FromStr for LocationKind {
    type Err = UnknownLocationKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LocationKind::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownLocationKind(s.to_string()))
    }
}

/// A location in the canonical form used for API calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedLocation {
    pub raw_input: String,
    pub kind: LocationKind,
    pub normalized_value: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl NormalizedLocation {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }

    /// Attach coordinates resolved by a geocoding step.
    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }
}

/// One persisted history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub id: i64,
    pub location: String,
    pub location_type: LocationKind,
    pub date_range: DateRange,
    /// Celsius.
    pub temperature: f64,
    pub weather_conditions: String,
    /// Set when the values were copied from an earlier record because the provider was down.
    #[serde(default)]
    pub from_cache: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a record; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWeatherRecord {
    pub location: String,
    pub location_type: LocationKind,
    pub date_range: DateRange,
    pub temperature: f64,
    pub weather_conditions: String,
    pub from_cache: bool,
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherRecordUpdate {
    pub location: Option<String>,
    pub location_type: Option<LocationKind>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub temperature: Option<f64>,
    pub weather_conditions: Option<String>,
}

impl WeatherRecordUpdate {
    pub fn temperature(value: f64) -> Self {
        Self {
            temperature: Some(value),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn touches_dates(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }
}

/// Current conditions reported by a weather provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub provider: String,
    pub resolved_name: String,
    pub temperature_c: f64,
    pub feels_like_c: f64,
    pub humidity_pct: u8,
    pub wind_speed_mps: f64,
    pub description: String,
    pub observed_at: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub temp_min_c: f64,
    pub temp_max_c: f64,
    pub condition: String,
    /// 0.0..=1.0
    pub precipitation_prob: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelVideo {
    pub title: String,
    pub url: String,
}

/// Display units. Storage is always Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

impl Units {
    pub fn format_temperature(&self, celsius: f64) -> String {
        match self {
            Units::Metric => format!("{celsius:.1} °C"),
            Units::Imperial => format!("{:.1} °F", celsius_to_fahrenheit(celsius)),
        }
    }
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Timestamp text used in the database and in flat exports.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
