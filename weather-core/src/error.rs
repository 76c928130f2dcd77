//! Error taxonomy shared by every weather-core operation.
//!
//! - `Validation`: bad user input, always recoverable, carries a reason code
//! - `Upstream`: an external service failed and no fallback was available
//! - `NotFound`: a history record id does not exist
//! - `Persistence`: the local history database failed
//! - `Export`: a serializer failed while producing an export payload

use std::fmt;

use thiserror::Error;

/// Stable reason codes for rejected input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationReason {
    EmptyInput,
    CoordinatesOutOfRange,
    LocationNotFound,
    StartAfterEnd,
    OutOfWindow,
    RangeTooLong,
    InvalidDate,
    InvalidTemperature,
}

impl ValidationReason {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationReason::EmptyInput => "empty_input",
            ValidationReason::CoordinatesOutOfRange => "coordinates_out_of_range",
            ValidationReason::LocationNotFound => "location_not_found",
            ValidationReason::StartAfterEnd => "start_after_end",
            ValidationReason::OutOfWindow => "out_of_window",
            ValidationReason::RangeTooLong => "range_too_long",
            ValidationReason::InvalidDate => "invalid_date",
            ValidationReason::InvalidTemperature => "invalid_temperature",
        }
    }
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// External collaborators a lookup can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Weather,
    Video,
    Map,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Weather => "weather",
            Service::Video => "video",
            Service::Map => "map",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("invalid input ({reason}): {detail}")]
    Validation {
        reason: ValidationReason,
        detail: String,
    },

    #[error("{service} service unavailable: {message}")]
    Upstream { service: Service, message: String },

    #[error("weather record {id} not found")]
    NotFound { id: i64 },

    #[error("history database error: {0}")]
    Persistence(String),

    #[error("export failed: {0}")]
    Export(String),
}

impl WeatherError {
    pub fn validation(reason: ValidationReason, detail: impl Into<String>) -> Self {
        WeatherError::Validation {
            reason,
            detail: detail.into(),
        }
    }

    pub fn upstream(service: Service, message: impl Into<String>) -> Self {
        WeatherError::Upstream {
            service,
            message: message.into(),
        }
    }

    /// Reason code when this is a validation failure.
    pub fn reason(&self) -> Option<ValidationReason> {
        match self {
            WeatherError::Validation { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Short message suitable for showing to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            WeatherError::Validation { reason, .. } => match reason {
                ValidationReason::EmptyInput => "Please enter a location.",
                ValidationReason::CoordinatesOutOfRange => {
                    "Latitude must be within -90..90 and longitude within -180..180."
                }
                ValidationReason::LocationNotFound => "That location could not be found.",
                ValidationReason::StartAfterEnd => "The start date must not be after the end date.",
                ValidationReason::OutOfWindow => {
                    "Dates must fall between 7 days ago and 5 days from today."
                }
                ValidationReason::RangeTooLong => "A date range may span at most 5 days.",
                ValidationReason::InvalidDate => "Dates must use the YYYY-MM-DD format.",
                ValidationReason::InvalidTemperature => "Temperature must be a finite number.",
            },
            WeatherError::Upstream { .. } => {
                "The weather service is unavailable right now. Please try again later."
            }
            WeatherError::NotFound { .. } => "That history entry no longer exists.",
            WeatherError::Persistence(_) => "The local history database could not be accessed.",
            WeatherError::Export(_) => "The export could not be written.",
        }
    }
}

impl From<rusqlite::Error> for WeatherError {
    fn from(err: rusqlite::Error) -> Self {
        WeatherError::Persistence(err.to_string())
    }
}

pub type WeatherResult<T> = Result<T, WeatherError>;
