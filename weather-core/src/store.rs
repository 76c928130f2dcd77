//! SQLite-backed query history.
//!
//! `SqliteWeatherStore` is the system of record for `WeatherRecord`s. Every
//! call runs in SQLite autocommit mode, so a successful return means the
//! change is on disk. Callers only ever receive owned copies.

use std::{
    fmt::Debug,
    path::Path,
    sync::Arc,
};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{
    Connection, OptionalExtension, Row, params, params_from_iter,
    types::{Type, Value},
};
use tracing::{debug, info};

use crate::{
    clock::{Clock, SystemClock},
    date_range::{DATE_FORMAT, DateRange, DateRangeValidator},
    error::{ValidationReason, WeatherError, WeatherResult},
    model::{LocationKind, NewWeatherRecord, WeatherRecord, WeatherRecordUpdate, format_timestamp},
};

const SELECT_COLUMNS: &str = "SELECT id, location, location_type, date_range_start, date_range_end,
        temperature, weather_conditions, from_cache, created_at, updated_at
     FROM weather_records";

/// Restricts `list` results. The default filter returns the full history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub location: Option<String>,
    pub location_type: Option<LocationKind>,
    /// Keep records whose range intersects this one.
    pub overlapping: Option<DateRange>,
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn for_location(location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            ..Self::default()
        }
    }
}

/// Persistence operations for query history.
pub trait HistoryStore: Send + Sync + Debug {
    fn create(&self, fields: NewWeatherRecord) -> WeatherResult<WeatherRecord>;
    fn read(&self, id: i64) -> WeatherResult<WeatherRecord>;
    fn update(&self, id: i64, changes: WeatherRecordUpdate) -> WeatherResult<WeatherRecord>;
    fn delete(&self, id: i64) -> WeatherResult<()>;
    /// Newest first.
    fn list(&self, filter: &RecordFilter) -> WeatherResult<Vec<WeatherRecord>>;

    /// Most recent record for a normalized location, if any.
    fn latest_for_location(&self, location: &str) -> WeatherResult<Option<WeatherRecord>> {
        let filter = RecordFilter {
            limit: Some(1),
            ..RecordFilter::for_location(location)
        };
        Ok(self.list(&filter)?.into_iter().next())
    }
}

#[derive(Debug)]
pub struct SqliteWeatherStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteWeatherStore {
    /// Open (or create) the history database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> WeatherResult<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock<P: AsRef<Path>>(path: P, clock: Arc<dyn Clock>) -> WeatherResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                WeatherError::Persistence(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        debug!(path = %path.display(), "opening history database");
        Self::with_connection(Connection::open(path)?, clock)
    }

    pub fn open_in_memory() -> WeatherResult<Self> {
        Self::open_in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn open_in_memory_with_clock(clock: Arc<dyn Clock>) -> WeatherResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, clock)
    }

    fn with_connection(conn: Connection, clock: Arc<dyn Clock>) -> WeatherResult<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    fn init_schema(conn: &Connection) -> WeatherResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS weather_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                location TEXT NOT NULL,
                location_type TEXT NOT NULL,
                date_range_start TEXT NOT NULL,
                date_range_end TEXT NOT NULL,
                temperature REAL NOT NULL,
                weather_conditions TEXT NOT NULL,
                from_cache INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_weather_records_created
                ON weather_records(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_weather_records_location
                ON weather_records(location, created_at DESC);
            "#,
        )?;
        Ok(())
    }

    pub fn count(&self) -> WeatherResult<usize> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM weather_records",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn fetch(conn: &Connection, id: i64) -> WeatherResult<WeatherRecord> {
        conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            params![id],
            Self::row_to_record,
        )
        .optional()?
        .ok_or(WeatherError::NotFound { id })
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<WeatherRecord> {
        let location_type: String = row.get(2)?;
        let start: String = row.get(3)?;
        let end: String = row.get(4)?;
        let created_at: String = row.get(8)?;
        let updated_at: String = row.get(9)?;

        let location_type = location_type
            .parse::<LocationKind>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

        Ok(WeatherRecord {
            id: row.get(0)?,
            location: row.get(1)?,
            location_type,
            date_range: DateRange::from_parts(
                parse_date_column(3, &start)?,
                parse_date_column(4, &end)?,
            ),
            temperature: row.get(5)?,
            weather_conditions: row.get(6)?,
            from_cache: row.get::<_, i64>(7)? != 0,
            created_at: parse_timestamp_column(8, &created_at)?,
            updated_at: parse_timestamp_column(9, &updated_at)?,
        })
    }
}

impl HistoryStore for SqliteWeatherStore {
    fn create(&self, fields: NewWeatherRecord) -> WeatherResult<WeatherRecord> {
        check_temperature(fields.temperature)?;

        let now = format_timestamp(self.clock.now());
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO weather_records (location, location_type, date_range_start, date_range_end,
                 temperature, weather_conditions, from_cache, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                fields.location,
                fields.location_type.as_str(),
                date_text(fields.date_range.start()),
                date_text(fields.date_range.end()),
                fields.temperature,
                fields.weather_conditions,
                fields.from_cache,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(
            id,
            location = %fields.location,
            from_cache = fields.from_cache,
            "created weather record"
        );

        Self::fetch(&conn, id)
    }

    fn read(&self, id: i64) -> WeatherResult<WeatherRecord> {
        Self::fetch(&self.conn.lock(), id)
    }

    fn update(&self, id: i64, changes: WeatherRecordUpdate) -> WeatherResult<WeatherRecord> {
        let conn = self.conn.lock();
        let current = Self::fetch(&conn, id)?;

        let start = changes.start.unwrap_or(current.date_range.start());
        let end = changes.end.unwrap_or(current.date_range.end());
        let date_range = if changes.touches_dates() {
            DateRangeValidator::validate(start, end, self.clock.today())?
        } else {
            DateRangeValidator::validate_shape(start, end)?
        };

        let temperature = changes.temperature.unwrap_or(current.temperature);
        check_temperature(temperature)?;

        let location = changes.location.unwrap_or(current.location);
        let location_type = changes.location_type.unwrap_or(current.location_type);
        let weather_conditions = changes.weather_conditions.unwrap_or(current.weather_conditions);

        conn.execute(
            "UPDATE weather_records
             SET location = ?1, location_type = ?2, date_range_start = ?3, date_range_end = ?4,
                 temperature = ?5, weather_conditions = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                location,
                location_type.as_str(),
                date_text(date_range.start()),
                date_text(date_range.end()),
                temperature,
                weather_conditions,
                format_timestamp(self.clock.now()),
                id,
            ],
        )?;
        info!(id, "updated weather record");

        Self::fetch(&conn, id)
    }

    fn delete(&self, id: i64) -> WeatherResult<()> {
        let affected = self
            .conn
            .lock()
            .execute("DELETE FROM weather_records WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(WeatherError::NotFound { id });
        }
        info!(id, "deleted weather record");
        Ok(())
    }

    fn list(&self, filter: &RecordFilter) -> WeatherResult<Vec<WeatherRecord>> {
        let mut sql = format!("{SELECT_COLUMNS} WHERE 1 = 1");
        let mut args: Vec<Value> = Vec::new();

        if let Some(location) = &filter.location {
            sql.push_str(" AND location = ?");
            args.push(Value::Text(location.clone()));
        }
        if let Some(kind) = filter.location_type {
            sql.push_str(" AND location_type = ?");
            args.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(range) = filter.overlapping {
            sql.push_str(" AND date_range_start <= ? AND date_range_end >= ?");
            args.push(Value::Text(date_text(range.end())));
            args.push(Value::Text(date_text(range.start())));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), Self::row_to_record)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        debug!(count = records.len(), "listed weather records");
        Ok(records)
    }
}

fn check_temperature(value: f64) -> WeatherResult<()> {
    if !value.is_finite() {
        return Err(WeatherError::validation(
            ValidationReason::InvalidTemperature,
            format!("{value} is not a finite temperature"),
        ));
    }
    Ok(())
}

fn date_text(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date_column(idx: usize, text: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_timestamp_column(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
