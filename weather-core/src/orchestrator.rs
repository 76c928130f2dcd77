//! End-to-end lookup: validate, fetch, persist, enrich.
//!
//! The primary weather fetch is retried per [`RetryPolicy`]; when transient
//! failures exhaust the retries the newest stored record for the same
//! location is reused and the new record is flagged `from_cache`. Permanent
//! failures such as a rejected API key are surfaced instead. Forecast,
//! videos and the map embed are best-effort and simply omitted on failure.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::NaiveDate;
use tracing::{debug, error, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    date_range::{DateRange, DateRangeValidator},
    error::{Service, ValidationReason, WeatherError, WeatherResult},
    location::LocationParser,
    media::{MapProvider, VideoProvider},
    model::{
        CurrentConditions, DailyForecast, NewWeatherRecord, NormalizedLocation, TravelVideo,
        WeatherRecord,
    },
    provider::{MAX_FORECAST_DAYS, ProviderError, WeatherProvider},
    retry::{RetryPolicy, Sleeper, TokioSleeper},
    sequence::RequestTicket,
    store::HistoryStore,
};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a lookup produced, stamped with the ticket it was issued under.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub ticket: RequestTicket,
    pub location: NormalizedLocation,
    pub record: WeatherRecord,
    /// `None` when the record was served from history.
    pub current: Option<CurrentConditions>,
    pub forecast: Option<Vec<DailyForecast>>,
    pub videos: Option<Vec<TravelVideo>>,
    pub map_url: Option<String>,
}

impl QueryOutcome {
    pub fn from_cache(&self) -> bool {
        self.record.from_cache
    }
}

#[derive(Debug)]
pub struct QueryOrchestrator {
    weather: Box<dyn WeatherProvider>,
    videos: Option<Box<dyn VideoProvider>>,
    maps: Option<Box<dyn MapProvider>>,
    store: Arc<dyn HistoryStore>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl QueryOrchestrator {
    pub fn new(weather: Box<dyn WeatherProvider>, store: Arc<dyn HistoryStore>) -> Self {
        Self {
            weather,
            videos: None,
            maps: None,
            store,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            retry: RetryPolicy::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_videos(mut self, videos: Option<Box<dyn VideoProvider>>) -> Self {
        self.videos = videos;
        self
    }

    pub fn with_maps(mut self, maps: Option<Box<dyn MapProvider>>) -> Self {
        self.maps = maps;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub async fn execute(
        &self,
        ticket: RequestTicket,
        raw_location: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> WeatherResult<QueryOutcome> {
        let location = LocationParser::classify(raw_location)?;
        let range = DateRangeValidator::validate(start, end, self.clock.today())?;
        debug!(
            ticket = ticket.value(),
            kind = %location.kind,
            location = %location.normalized_value,
            %range,
            "executing lookup"
        );

        let (location, record, current) = match self.fetch_current(&location).await {
            Ok(current) => {
                let location = match (location.coordinates(), current.latitude, current.longitude) {
                    (None, Some(lat), Some(lon)) => location.with_coordinates(lat, lon),
                    _ => location,
                };
                let record = self.store.create(NewWeatherRecord {
                    location: location.normalized_value.clone(),
                    location_type: location.kind,
                    date_range: range,
                    temperature: current.temperature_c,
                    weather_conditions: current.description.clone(),
                    from_cache: false,
                })?;
                (location, record, Some(current))
            }
            Err(ProviderError::LocationNotFound) => {
                return Err(WeatherError::validation(
                    ValidationReason::LocationNotFound,
                    format!("'{}' could not be resolved", location.normalized_value),
                ));
            }
            Err(err) if err.is_transient() => {
                let record = self.fall_back_to_history(&location, range, err)?;
                (location, record, None)
            }
            Err(err) => {
                error!(
                    error = %err,
                    provider = self.weather.name(),
                    "weather provider rejected the request"
                );
                return Err(WeatherError::upstream(Service::Weather, err.to_string()));
            }
        };

        let search_text = current
            .as_ref()
            .map(|c| c.resolved_name.clone())
            .unwrap_or_else(|| location.normalized_value.clone());
        let (forecast, videos) = tokio::join!(
            self.fetch_forecast(&location, range),
            self.fetch_videos(&search_text)
        );
        let map_url = self.map_url(&location);

        Ok(QueryOutcome {
            ticket,
            location,
            record,
            current,
            forecast,
            videos,
            map_url,
        })
    }

    async fn fetch_current(
        &self,
        location: &NormalizedLocation,
    ) -> Result<CurrentConditions, ProviderError> {
        self.retry
            .run(self.sleeper.as_ref(), move |attempt| {
                debug!(attempt, provider = self.weather.name(), "fetching current conditions");
                self.bounded(self.weather.fetch_current(location))
            })
            .await
    }

    fn fall_back_to_history(
        &self,
        location: &NormalizedLocation,
        range: DateRange,
        err: ProviderError,
    ) -> WeatherResult<WeatherRecord> {
        let Some(cached) = self.store.latest_for_location(&location.normalized_value)? else {
            return Err(WeatherError::upstream(Service::Weather, err.to_string()));
        };

        warn!(
            location = %location.normalized_value,
            cached_id = cached.id,
            error = %err,
            "weather provider unavailable, using most recent stored conditions"
        );
        let record = self.store.create(NewWeatherRecord {
            location: location.normalized_value.clone(),
            location_type: location.kind,
            date_range: range,
            temperature: cached.temperature,
            weather_conditions: cached.weather_conditions,
            from_cache: true,
        })?;
        info!(id = record.id, "recorded lookup from cached conditions");
        Ok(record)
    }

    async fn fetch_forecast(
        &self,
        location: &NormalizedLocation,
        range: DateRange,
    ) -> Option<Vec<DailyForecast>> {
        let days = u8::try_from(range.days().clamp(1, i64::from(MAX_FORECAST_DAYS)))
            .unwrap_or(MAX_FORECAST_DAYS);
        match self.bounded(self.weather.fetch_forecast(location, days)).await {
            Ok(forecast) => Some(forecast),
            Err(err) => {
                warn!(error = %err, "forecast unavailable, omitting");
                None
            }
        }
    }

    async fn fetch_videos(&self, location_text: &str) -> Option<Vec<TravelVideo>> {
        let videos = self.videos.as_ref()?;
        match self.bounded(videos.search_travel_videos(location_text)).await {
            Ok(found) => Some(found),
            Err(err) => {
                warn!(
                    service = %Service::Video,
                    error = %err,
                    "travel videos unavailable, omitting"
                );
                None
            }
        }
    }

    fn map_url(&self, location: &NormalizedLocation) -> Option<String> {
        let maps = self.maps.as_ref()?;
        match maps.embed_url(location) {
            Ok(url) => Some(url.into()),
            Err(err) => {
                warn!(service = %Service::Map, error = %err, "map embed unavailable, omitting");
                None
            }
        }
    }

    /// Every outbound call is capped by `call_timeout`.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .unwrap_or(Err(ProviderError::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        model::{LocationKind, WeatherRecordUpdate},
        retry::RecordingSleeper,
        sequence::{LatestOutcome, RequestSequencer},
        store::{RecordFilter, SqliteWeatherStore},
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use url::Url;

    #[derive(Debug, Clone, Copy)]
    enum Script {
        Succeed,
        FailTimes(u32),
        AlwaysFail,
        NotFound,
        Unauthorized,
        Hang,
    }

    #[derive(Debug)]
    struct FakeWeather {
        script: Script,
        forecast_fails: bool,
        calls: Arc<AtomicU32>,
    }

    impl FakeWeather {
        fn new(script: Script) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            let fake = Self {
                script,
                forecast_fails: false,
                calls: calls.clone(),
            };
            (fake, calls)
        }
    }

    fn conditions(temperature_c: f64) -> CurrentConditions {
        CurrentConditions {
            provider: "fake".into(),
            resolved_name: "London, GB".into(),
            temperature_c,
            feels_like_c: temperature_c - 1.0,
            humidity_pct: 70,
            wind_speed_mps: 4.0,
            description: "overcast clouds".into(),
            observed_at: DateTime::<Utc>::from_timestamp(1718020800, 0).expect("timestamp"),
            latitude: Some(51.5072),
            longitude: Some(-0.1276),
        }
    }

    #[async_trait]
    impl WeatherProvider for FakeWeather {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn fetch_current(
            &self,
            _: &NormalizedLocation,
        ) -> Result<CurrentConditions, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script {
                Script::Succeed => Ok(conditions(16.0)),
                Script::FailTimes(n) if call < n => Err(ProviderError::Timeout),
                Script::FailTimes(_) => Ok(conditions(16.0)),
                Script::AlwaysFail => Err(ProviderError::Status {
                    status: 503,
                    body: "down".into(),
                }),
                Script::NotFound => Err(ProviderError::LocationNotFound),
                Script::Unauthorized => Err(ProviderError::Unauthorized { status: 401 }),
                Script::Hang => std::future::pending().await,
            }
        }

        async fn fetch_forecast(
            &self,
            _: &NormalizedLocation,
            days: u8,
        ) -> Result<Vec<DailyForecast>, ProviderError> {
            if self.forecast_fails || matches!(self.script, Script::AlwaysFail) {
                return Err(ProviderError::Transport("reset".into()));
            }
            Ok((0..days)
                .map(|i| DailyForecast {
                    date: NaiveDate::from_ymd_opt(2024, 6, 10 + u32::from(i)).expect("date"),
                    temp_min_c: 10.0,
                    temp_max_c: 20.0,
                    condition: "clouds".into(),
                    precipitation_prob: 0.2,
                })
                .collect())
        }
    }

    #[derive(Debug)]
    struct FakeVideos {
        fail: bool,
    }

    #[async_trait]
    impl VideoProvider for FakeVideos {
        async fn search_travel_videos(
            &self,
            location_text: &str,
        ) -> Result<Vec<TravelVideo>, ProviderError> {
            if self.fail {
                return Err(ProviderError::Unauthorized { status: 403 });
            }
            Ok(vec![TravelVideo {
                title: format!("{location_text} walking tour"),
                url: "https://www.youtube.com/watch?v=abc".into(),
            }])
        }
    }

    #[derive(Debug)]
    struct FakeMap;

    impl MapProvider for FakeMap {
        fn embed_url(&self, location: &NormalizedLocation) -> Result<Url, url::ParseError> {
            Url::parse_with_params(
                "https://maps.example/embed",
                &[("q", location.normalized_value.as_str())],
            )
        }
    }

    /// Store whose every operation fails the way a full or locked disk would.
    #[derive(Debug)]
    struct BrokenStore;

    fn disk_full() -> WeatherError {
        WeatherError::Persistence("database or disk is full".into())
    }

    impl HistoryStore for BrokenStore {
        fn create(&self, _: NewWeatherRecord) -> WeatherResult<WeatherRecord> {
            Err(disk_full())
        }

        fn read(&self, _: i64) -> WeatherResult<WeatherRecord> {
            Err(disk_full())
        }

        fn update(&self, _: i64, _: WeatherRecordUpdate) -> WeatherResult<WeatherRecord> {
            Err(disk_full())
        }

        fn delete(&self, _: i64) -> WeatherResult<()> {
            Err(disk_full())
        }

        fn list(&self, _: &RecordFilter) -> WeatherResult<Vec<WeatherRecord>> {
            Err(disk_full())
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("test date")
    }

    /// Matches the harness clock.
    fn today() -> NaiveDate {
        date("2024-06-10")
    }

    struct Harness {
        store: Arc<SqliteWeatherStore>,
        sleeper: Arc<RecordingSleeper>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::at("2024-06-10T09:00:00Z"));
            let store = Arc::new(
                SqliteWeatherStore::open_in_memory_with_clock(clock.clone()).expect("store"),
            );
            Self {
                store,
                sleeper: Arc::new(RecordingSleeper::default()),
                clock,
            }
        }

        fn orchestrator(&self, weather: FakeWeather) -> QueryOrchestrator {
            QueryOrchestrator::new(Box::new(weather), self.store.clone())
                .with_clock(self.clock.clone())
                .with_sleeper(self.sleeper.clone())
                .with_retry(RetryPolicy::new(3, 100, 1_000, 0.0))
        }
    }

    #[tokio::test]
    async fn successful_lookup_creates_record() {
        let h = Harness::new();
        let (weather, calls) = FakeWeather::new(Script::Succeed);
        let orchestrator = h
            .orchestrator(weather)
            .with_videos(Some(Box::new(FakeVideos { fail: false })))
            .with_maps(Some(Box::new(FakeMap)));
        let seq = RequestSequencer::new();

        let outcome = orchestrator
            .execute(seq.issue(), "london, gb", date("2024-06-10"), date("2024-06-12"))
            .await
            .expect("lookup succeeds");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!outcome.from_cache());
        assert_eq!(outcome.record.location, "London, GB");
        assert_eq!(outcome.record.location_type, LocationKind::City);
        assert_eq!(outcome.record.temperature, 16.0);
        assert_eq!(outcome.record.weather_conditions, "overcast clouds");
        assert_eq!(outcome.location.coordinates(), Some((51.5072, -0.1276)));
        assert_eq!(outcome.forecast.as_ref().map(Vec::len), Some(3));
        assert_eq!(outcome.videos.as_ref().map(Vec::len), Some(1));
        assert!(
            outcome
                .map_url
                .as_deref()
                .is_some_and(|u| u.starts_with("https://maps.example/embed"))
        );

        let stored = h.store.read(outcome.record.id).expect("persisted");
        assert_eq!(stored, outcome.record);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let h = Harness::new();
        let (weather, calls) = FakeWeather::new(Script::FailTimes(2));
        let outcome = h
            .orchestrator(weather)
            .execute(RequestSequencer::new().issue(), "10001", today(), today())
            .await
            .expect("third attempt succeeds");

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.sleeper.slept.lock().len(), 2);
        assert!(!outcome.from_cache());
    }

    #[tokio::test]
    async fn exhausted_retries_without_history_is_upstream_error() {
        let h = Harness::new();
        let (weather, calls) = FakeWeather::new(Script::AlwaysFail);
        let err = h
            .orchestrator(weather)
            .execute(RequestSequencer::new().issue(), "10001", today(), today())
            .await
            .unwrap_err();

        assert!(matches!(err, WeatherError::Upstream { service: Service::Weather, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.store.count().expect("count"), 0);
    }

    #[tokio::test]
    async fn exhausted_retries_fall_back_to_latest_record() {
        let h = Harness::new();
        let seq = RequestSequencer::new();

        let (good, _) = FakeWeather::new(Script::Succeed);
        let first = h
            .orchestrator(good)
            .execute(seq.issue(), "10001", today(), today())
            .await
            .expect("first lookup");

        h.clock.advance(chrono::Duration::minutes(10));
        let (bad, _) = FakeWeather::new(Script::AlwaysFail);
        let outcome = h
            .orchestrator(bad)
            .execute(seq.issue(), "10001", date("2024-06-11"), date("2024-06-12"))
            .await
            .expect("falls back to history");

        assert!(outcome.from_cache());
        assert!(outcome.current.is_none());
        assert!(outcome.forecast.is_none());
        assert_ne!(outcome.record.id, first.record.id);
        assert_eq!(outcome.record.temperature, first.record.temperature);
        assert_eq!(outcome.record.weather_conditions, first.record.weather_conditions);
        assert_eq!(outcome.record.date_range.start(), date("2024-06-11"));

        let history = h.store.list(&RecordFilter::for_location("10001")).expect("list");
        assert_eq!(history.len(), 2);
        assert!(history[0].from_cache);
    }

    #[tokio::test]
    async fn rejected_api_key_is_surfaced_not_served_from_history() {
        let h = Harness::new();
        let seq = RequestSequencer::new();

        let (good, _) = FakeWeather::new(Script::Succeed);
        h.orchestrator(good)
            .execute(seq.issue(), "10001", today(), today())
            .await
            .expect("first lookup");

        let (weather, calls) = FakeWeather::new(Script::Unauthorized);
        let err = h
            .orchestrator(weather)
            .execute(seq.issue(), "10001", today(), today())
            .await
            .unwrap_err();

        assert!(matches!(err, WeatherError::Upstream { service: Service::Weather, .. }));
        assert!(err.to_string().contains("401"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(h.sleeper.slept.lock().is_empty());
        assert_eq!(h.store.count().expect("count"), 1);
    }

    #[tokio::test]
    async fn store_failure_after_fetch_is_surfaced() {
        let h = Harness::new();
        let (weather, calls) = FakeWeather::new(Script::Succeed);
        let err = QueryOrchestrator::new(Box::new(weather), Arc::new(BrokenStore))
            .with_clock(h.clock.clone())
            .with_sleeper(h.sleeper.clone())
            .execute(RequestSequencer::new().issue(), "10001", today(), today())
            .await
            .unwrap_err();

        assert!(matches!(err, WeatherError::Persistence(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn store_failure_during_fallback_is_surfaced() {
        let h = Harness::new();
        let (weather, _) = FakeWeather::new(Script::AlwaysFail);
        let err = QueryOrchestrator::new(Box::new(weather), Arc::new(BrokenStore))
            .with_clock(h.clock.clone())
            .with_sleeper(h.sleeper.clone())
            .with_retry(RetryPolicy::new(2, 1, 1, 0.0))
            .execute(RequestSequencer::new().issue(), "10001", today(), today())
            .await
            .unwrap_err();

        assert!(matches!(err, WeatherError::Persistence(_)));
        assert_eq!(err.user_message(), "The local history database could not be accessed.");
    }

    #[tokio::test]
    async fn unknown_location_is_validation_error_without_retry() {
        let h = Harness::new();
        let (weather, calls) = FakeWeather::new(Script::NotFound);
        let err = h
            .orchestrator(weather)
            .execute(RequestSequencer::new().issue(), "Atlantis", today(), today())
            .await
            .unwrap_err();

        assert_eq!(err.reason(), Some(ValidationReason::LocationNotFound));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(h.sleeper.slept.lock().is_empty());
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_provider() {
        let h = Harness::new();
        let (weather, calls) = FakeWeather::new(Script::Succeed);
        let orchestrator = h.orchestrator(weather);
        let seq = RequestSequencer::new();

        let err = orchestrator
            .execute(seq.issue(), "  ", today(), today())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), Some(ValidationReason::EmptyInput));

        let err = orchestrator
            .execute(seq.issue(), "10001", date("2024-06-01"), date("2024-06-02"))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), Some(ValidationReason::OutOfWindow));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn enrichment_failures_degrade_gracefully() {
        let h = Harness::new();
        let (mut weather, _) = FakeWeather::new(Script::Succeed);
        weather.forecast_fails = true;
        let outcome = h
            .orchestrator(weather)
            .with_videos(Some(Box::new(FakeVideos { fail: true })))
            .execute(RequestSequencer::new().issue(), "Big Ben", today(), today())
            .await
            .expect("weather still succeeds");

        assert!(outcome.forecast.is_none());
        assert!(outcome.videos.is_none());
        assert!(outcome.map_url.is_none());
        assert_eq!(outcome.record.location_type, LocationKind::Landmark);
    }

    #[tokio::test]
    async fn hanging_provider_times_out() {
        let h = Harness::new();
        let (weather, calls) = FakeWeather::new(Script::Hang);
        let err = h
            .orchestrator(weather)
            .with_retry(RetryPolicy::new(2, 1, 1, 0.0))
            .with_call_timeout(Duration::from_millis(20))
            .execute(RequestSequencer::new().issue(), "10001", today(), today())
            .await
            .unwrap_err();

        assert!(matches!(err, WeatherError::Upstream { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn late_outcome_is_not_applied() {
        let h = Harness::new();
        let (weather, _) = FakeWeather::new(Script::Succeed);
        let orchestrator = h.orchestrator(weather);
        let seq = RequestSequencer::new();
        let mut latest = LatestOutcome::new();

        let older = seq.issue();
        let newer = seq.issue();

        let newer_outcome = orchestrator
            .execute(newer, "Paris, FR", today(), today())
            .await
            .expect("newer");
        assert!(latest.offer(&seq, newer_outcome.ticket, newer_outcome));

        let older_outcome = orchestrator
            .execute(older, "London, GB", today(), today())
            .await
            .expect("older");
        assert!(!latest.offer(&seq, older_outcome.ticket, older_outcome));

        let shown = latest.current().expect("newer outcome applied");
        assert_eq!(shown.record.location, "Paris, FR");
    }
}
