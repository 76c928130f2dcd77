use std::fmt;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{ValidationReason, WeatherError, WeatherResult};

/// How far back a lookup may start, relative to today.
pub const MAX_DAYS_PAST: u64 = 7;
/// How far ahead a lookup may end, relative to today.
pub const MAX_DAYS_FUTURE: u64 = 5;
/// Largest allowed distance between start and end.
pub const MAX_RANGE_DAYS: i64 = 5;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// An inclusive interval of calendar dates with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

/// Unchecked wire form; deserialized ranges still go through the shape check.
#[derive(Deserialize)]
struct RawDateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = WeatherError;

    fn try_from(raw: RawDateRange) -> Result<Self, Self::Error> {
        DateRangeValidator::validate_shape(raw.start, raw.end)
    }
}

impl DateRange {
    /// Build a range without window checks. Used for rows already accepted once.
    pub(crate) fn from_parts(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of calendar days covered, counting both ends.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let count = usize::try_from(self.days()).unwrap_or(0);
        self.start.iter_days().take(count)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Checks requested intervals against the sliding lookup window.
///
/// Rules are applied in a fixed order and the first violation wins:
/// `start_after_end`, then `out_of_window`, then `range_too_long`.
pub struct DateRangeValidator;

impl DateRangeValidator {
    pub fn validate(
        start: NaiveDate,
        end: NaiveDate,
        today: NaiveDate,
    ) -> WeatherResult<DateRange> {
        Self::check_order(start, end)?;

        let (earliest, latest) = Self::bounds(today);
        if start < earliest || end > latest {
            return Err(WeatherError::validation(
                ValidationReason::OutOfWindow,
                format!("{start}..{end} is outside the allowed window {earliest}..{latest}"),
            ));
        }

        Self::check_span(start, end)?;
        Ok(DateRange { start, end })
    }

    /// Order and span only, for ranges whose window was checked when they were recorded.
    pub fn validate_shape(start: NaiveDate, end: NaiveDate) -> WeatherResult<DateRange> {
        Self::check_order(start, end)?;
        Self::check_span(start, end)?;
        Ok(DateRange { start, end })
    }

    /// Earliest and latest acceptable dates for the given day.
    pub fn bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let earliest = today.checked_sub_days(Days::new(MAX_DAYS_PAST)).unwrap_or(NaiveDate::MIN);
        let latest = today.checked_add_days(Days::new(MAX_DAYS_FUTURE)).unwrap_or(NaiveDate::MAX);
        (earliest, latest)
    }

    fn check_order(start: NaiveDate, end: NaiveDate) -> WeatherResult<()> {
        if start > end {
            return Err(WeatherError::validation(
                ValidationReason::StartAfterEnd,
                format!("start {start} is after end {end}"),
            ));
        }
        Ok(())
    }

    fn check_span(start: NaiveDate, end: NaiveDate) -> WeatherResult<()> {
        let span = (end - start).num_days();
        if span > MAX_RANGE_DAYS {
            return Err(WeatherError::validation(
                ValidationReason::RangeTooLong,
                format!("range spans {span} days, at most {MAX_RANGE_DAYS} allowed"),
            ));
        }
        Ok(())
    }
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(input: &str) -> WeatherResult<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT).map_err(|e| {
        WeatherError::validation(ValidationReason::InvalidDate, format!("'{input}': {e}"))
    })
}
