use std::{fs, io::Write, path::PathBuf, sync::Arc};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use inquire::{Confirm, Password, PasswordDisplayMode, Text};
use tracing::debug;
use weather_core::{
    Config, ExportFormat, HistoryStore, LocationKind, LocationParser, ProviderId,
    QueryOrchestrator, RecordFilter, RequestSequencer, SqliteWeatherStore, WeatherRecordUpdate,
    clock::{Clock, SystemClock},
    date_range::parse_date,
    export::export,
    media::media_from_config,
    provider::{default_provider_from_config, provider_from_config},
};

use crate::output;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather", version, about = "Weather lookups with a local query history")]
pub struct Cli {
    /// Log request details to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "openweather" or "weatherapi".
        provider: String,
    },

    /// Look up the weather for a location and save it to history.
    Query(QueryArgs),

    /// Browse and edit saved lookups.
    #[command(subcommand)]
    History(HistoryCommand),

    /// Export saved lookups.
    Export(ExportArgs),
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// ZIP code, "lat, lon", "City, Country" or a landmark name.
    pub location: String,

    /// First day, YYYY-MM-DD. Defaults to today.
    #[arg(long)]
    pub start: Option<String>,

    /// Last day, YYYY-MM-DD. Defaults to the start day.
    #[arg(long)]
    pub end: Option<String>,

    /// Use this provider instead of the configured default.
    #[arg(long)]
    pub provider: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum HistoryCommand {
    /// List saved lookups, newest first.
    List {
        #[arg(long)]
        location: Option<String>,

        /// zip, coordinates, city or landmark.
        #[arg(long = "type")]
        kind: Option<LocationKind>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show one saved lookup.
    Show { id: i64 },

    /// Edit a saved lookup.
    Update {
        id: i64,

        /// Celsius.
        #[arg(long)]
        temperature: Option<f64>,

        #[arg(long)]
        conditions: Option<String>,

        #[arg(long)]
        location: Option<String>,

        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,
    },

    /// Delete a saved lookup.
    Delete { id: i64 },
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// json, csv or pdf.
    #[arg(long, default_value = "json")]
    pub format: ExportFormat,

    /// Write to this file instead of stdout.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Only export lookups for this location.
    #[arg(long)]
    pub location: Option<String>,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure { provider } => configure(&provider),
            Command::Query(args) => query(args).await,
            Command::History(cmd) => history(cmd),
            Command::Export(args) => export_history(args),
        }
    }
}

fn configure(provider: &str) -> anyhow::Result<()> {
    let id = ProviderId::try_from(provider)?;
    // Keys from the environment must not end up in the saved file.
    let mut config = Config::load()?;

    let api_key = Password::new(&format!("{id} API key:"))
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()?;
    let api_key = api_key.trim().to_string();
    if api_key.is_empty() {
        bail!("An API key is required for '{id}'.");
    }
    config.upsert_provider_api_key(id, api_key);

    if config.default_provider_id().ok() != Some(id)
        && Confirm::new(&format!("Make {id} the default provider?"))
            .with_default(true)
            .prompt()?
    {
        config.set_default_provider(id);
    }

    if let Some(key) = optional_key("YouTube Data API key (optional):")? {
        config.video.api_key = Some(key);
    }
    if let Some(key) = optional_key("Google Maps API key (optional):")? {
        config.maps.api_key = Some(key);
    }

    config.save()?;
    println!("Saved configuration to {}", Config::config_file_path()?.display());
    Ok(())
}

fn optional_key(message: &str) -> anyhow::Result<Option<String>> {
    let answer = Text::new(message)
        .with_help_message("Leave empty to keep the current value; Esc to skip")
        .prompt_skippable()?;
    Ok(answer.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
}

fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteWeatherStore>> {
    let path = config.database_file_path()?;
    debug!(path = %path.display(), "opening history database");
    let store = SqliteWeatherStore::open(&path)
        .with_context(|| format!("Failed to open history database: {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn query(args: QueryArgs) -> anyhow::Result<()> {
    let config = Config::load_with_env()?;

    let provider = match &args.provider {
        Some(name) => provider_from_config(ProviderId::try_from(name.as_str())?, &config)?,
        None => default_provider_from_config(&config)?,
    };
    let (videos, maps) = media_from_config(&config)?;
    let store = open_store(&config)?;

    let orchestrator = QueryOrchestrator::new(provider, store)
        .with_videos(videos)
        .with_maps(maps)
        .with_retry(config.retry.policy())
        .with_call_timeout(config.request_timeout());

    let start = match &args.start {
        Some(s) => parse_date(s)?,
        None => SystemClock.today(),
    };
    let end = match &args.end {
        Some(s) => parse_date(s)?,
        None => start,
    };

    // one lookup per process, so the ticket can never go stale
    let ticket = RequestSequencer::new().issue();
    let outcome = orchestrator.execute(ticket, &args.location, start, end).await?;

    output::print_outcome(&outcome, config.units);
    Ok(())
}

/// Matches the stored form when the input parses; otherwise filters on the raw text.
fn normalize_filter_location(raw: &str) -> String {
    LocationParser::classify(raw)
        .map(|loc| loc.normalized_value)
        .unwrap_or_else(|_| raw.trim().to_string())
}

fn history(cmd: HistoryCommand) -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = open_store(&config)?;

    match cmd {
        HistoryCommand::List { location, kind, limit } => {
            let filter = RecordFilter {
                location: location.as_deref().map(normalize_filter_location),
                location_type: kind,
                overlapping: None,
                limit,
            };
            output::print_records(&store.list(&filter)?, config.units);
        }
        HistoryCommand::Show { id } => {
            output::print_record(&store.read(id)?, config.units);
        }
        HistoryCommand::Update {
            id,
            temperature,
            conditions,
            location,
            start,
            end,
        } => {
            let mut changes = WeatherRecordUpdate {
                temperature,
                weather_conditions: conditions,
                start: start.as_deref().map(parse_date).transpose()?,
                end: end.as_deref().map(parse_date).transpose()?,
                ..WeatherRecordUpdate::default()
            };
            if let Some(raw) = location {
                let parsed = LocationParser::classify(&raw)?;
                changes.location = Some(parsed.normalized_value);
                changes.location_type = Some(parsed.kind);
            }
            if changes.is_empty() {
                bail!(
                    "Nothing to update.\n\
                     Hint: pass at least one of --temperature, --conditions, \
                     --location, --start, --end."
                );
            }

            let record = store.update(id, changes)?;
            println!("Updated:");
            output::print_record(&record, config.units);
        }
        HistoryCommand::Delete { id } => {
            store.delete(id)?;
            println!("Deleted #{id}");
        }
    }

    Ok(())
}

fn export_history(args: ExportArgs) -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = open_store(&config)?;

    let filter = RecordFilter {
        location: args.location.as_deref().map(normalize_filter_location),
        ..RecordFilter::default()
    };
    let records = store.list(&filter)?;
    let bytes = export(&records, args.format)?;

    match args.output {
        Some(path) => {
            fs::write(&path, &bytes)
                .with_context(|| format!("Failed to write export file: {}", path.display()))?;
            println!("Exported {} record(s) to {}", records.len(), path.display());
        }
        None if args.format.is_text() => {
            std::io::stdout().write_all(&bytes).context("Failed to write export to stdout")?;
        }
        None => bail!(
            "{} output is binary.\n\
             Hint: pass --output <file.{}>.",
            args.format,
            args.format.extension()
        ),
    }

    Ok(())
}
