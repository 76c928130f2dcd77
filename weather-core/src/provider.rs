use crate::{
    Config,
    model::{CurrentConditions, DailyForecast, NormalizedLocation},
    provider::{openweather::OpenWeatherProvider, weatherapi::WeatherApiProvider},
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::{convert::TryFrom, fmt::Debug, time::Duration};
use thiserror::Error;

pub mod openweather;
pub mod weatherapi;

/// Upper bound on forecast days any provider is asked for.
pub const MAX_FORECAST_DAYS: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenWeather,
    WeatherApi,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeather, ProviderId::WeatherApi]
    }

    /// Environment variable that overrides the configured key.
    pub fn env_var(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "OPENWEATHER_API_KEY",
            ProviderId::WeatherApi => "WEATHERAPI_API_KEY",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, weatherapi."
            )),
        }
    }
}

/// Failure talking to an external HTTP collaborator.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Transport(String),

    #[error("rate limited by upstream (429)")]
    RateLimited,

    #[error("credentials rejected with status {status}")]
    Unauthorized { status: u16 },

    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("location not found")]
    LocationNotFound,

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether another attempt might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout
            | ProviderError::Transport(_)
            | ProviderError::RateLimited => true,
            ProviderError::Status { status, .. } => {
                *status >= 500 || *status == StatusCode::REQUEST_TIMEOUT.as_u16()
            }
            ProviderError::Unauthorized { .. }
            | ProviderError::LocationNotFound
            | ProviderError::Decode(_) => false,
        }
    }

    /// Classify a non-success status. Provider-specific "not found" bodies are
    /// recognised by the providers before falling back to this.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized {
                status: status.as_u16(),
            },
            _ => ProviderError::Status {
                status: status.as_u16(),
                body: truncate_body(body),
            },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::from_status(status, "")
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Decode(err.to_string())
    }
}

#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    async fn fetch_current(
        &self,
        location: &NormalizedLocation,
    ) -> Result<CurrentConditions, ProviderError>;

    /// Daily summaries starting today, at most `days` entries.
    async fn fetch_forecast(
        &self,
        location: &NormalizedLocation,
        days: u8,
    ) -> Result<Vec<DailyForecast>, ProviderError>;
}

/// HTTP client shared by all providers; every call is bounded by `timeout`.
pub fn http_client(timeout: Duration) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("weather-core/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {e}"))
}

/// Construct a provider from config and explicit ProviderId.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
) -> anyhow::Result<Box<dyn WeatherProvider>> {
    let api_key = config.provider_api_key(id).ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for provider '{id}'.\n\
                 Hint: run `weather configure {id}` or set {}.",
            id.env_var()
        )
    })?;
    let http = http_client(config.request_timeout())?;

    let boxed: Box<dyn WeatherProvider> = match id {
        ProviderId::OpenWeather => {
            Box::new(OpenWeatherProvider::with_client(api_key.to_owned(), http))
        }
        ProviderId::WeatherApi => {
            Box::new(WeatherApiProvider::with_client(api_key.to_owned(), http))
        }
    };

    Ok(boxed)
}

/// Construct the default provider from config, using `default_provider` field.
pub fn default_provider_from_config(config: &Config) -> anyhow::Result<Box<dyn WeatherProvider>> {
    let id = config.default_provider_id()?;
    provider_from_config(id, config)
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}

/// Most frequent string, ties going to the one seen first.
pub(crate) fn most_frequent<'a>(items: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for item in items {
        match counts.iter_mut().find(|(seen, _)| *seen == item) {
            Some((_, n)) => *n += 1,
            None => counts.push((item, 1)),
        }
    }
    counts
        .iter()
        .enumerate()
        .max_by(|(ia, (_, a)), (ib, (_, b))| a.cmp(b).then(ib.cmp(ia)))
        .map(|(_, (item, _))| (*item).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn provider_id_as_str_roundtrip() {
        for id in ProviderId::all() {
            let s = id.as_str();
            let parsed = ProviderId::try_from(s).expect("roundtrip should succeed");
            assert_eq!(*id, parsed);
        }
    }

    #[test]
    fn unknown_provider_error() {
        let err = ProviderId::try_from("doesnotexist").unwrap_err();
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[test]
    fn provider_from_config_errors_when_missing_api_key() {
        let cfg = Config::default();
        let err = provider_from_config(ProviderId::OpenWeather, &cfg).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("No API key configured for provider"));
        assert!(msg.contains("OPENWEATHER_API_KEY"));
    }

    #[test]
    fn default_provider_from_config_errors_when_not_set() {
        let cfg = Config::default();
        let err = default_provider_from_config(&cfg).unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("No default provider configured"));
        assert!(msg.contains("Hint: run `weather configure"));
    }

    #[test]
    fn default_provider_from_config_works_when_set_and_configured() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "KEY".to_string());

        let provider = default_provider_from_config(&cfg).expect("provider");
        assert_eq!(provider.name(), "weatherapi");
    }

    #[test]
    fn transient_classification() {
        assert!(ProviderError::Timeout.is_transient());
        assert!(ProviderError::RateLimited.is_transient());
        assert!(ProviderError::from_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(ProviderError::from_status(StatusCode::REQUEST_TIMEOUT, "").is_transient());

        assert!(!ProviderError::LocationNotFound.is_transient());
        assert!(!ProviderError::from_status(StatusCode::UNAUTHORIZED, "").is_transient());
        assert!(!ProviderError::from_status(StatusCode::BAD_REQUEST, "").is_transient());
    }

    #[test]
    fn rate_limit_status_maps_to_rate_limited() {
        assert!(matches!(
            ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            ProviderError::RateLimited
        ));
    }

    #[test]
    fn long_bodies_are_truncated_on_char_boundary() {
        let body = "é".repeat(150);
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 203);
    }

    #[test]
    fn most_frequent_prefers_first_on_tie() {
        assert_eq!(most_frequent(["rain", "sun", "sun", "rain"]), Some("rain".to_string()));
        assert_eq!(most_frequent(["rain", "sun", "sun"]), Some("sun".to_string()));
        assert_eq!(most_frequent(Vec::<&str>::new()), None);
    }
}
