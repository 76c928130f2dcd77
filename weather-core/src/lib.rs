//! Core library for the `weather` CLI.
//!
//! This crate defines:
//! - Location classification and date-range validation
//! - Abstraction over weather providers, plus optional video and map enrichments
//! - A SQLite-backed history of lookups with export to JSON, CSV and PDF
//! - Configuration & credentials handling
//!
//! It is used by `weather-cli`, but can also be reused by other binaries or services.

pub mod clock;
pub mod config;
pub mod date_range;
pub mod error;
pub mod export;
pub mod location;
pub mod media;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod retry;
pub mod sequence;
pub mod store;

pub use config::{Config, ProviderConfig};
pub use date_range::{DateRange, DateRangeValidator};
pub use error::{Service, ValidationReason, WeatherError, WeatherResult};
pub use export::ExportFormat;
pub use location::LocationParser;
pub use model::{LocationKind, NormalizedLocation, Units, WeatherRecord, WeatherRecordUpdate};
pub use orchestrator::{QueryOrchestrator, QueryOutcome};
pub use provider::{ProviderId, WeatherProvider};
pub use sequence::{LatestOutcome, RequestSequencer, RequestTicket};
pub use store::{HistoryStore, RecordFilter, SqliteWeatherStore};
