//! Serialization of history records for export.
//!
//! JSON is the lossless format and can be read back with [`import_json`].
//! CSV flattens each record into one row with a fixed column order. PDF is a
//! plain human-readable report.

use std::{fmt, str::FromStr};

use chrono::Utc;
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    date_range::DATE_FORMAT,
    error::{WeatherError, WeatherResult},
    model::{WeatherRecord, format_timestamp},
};

pub const CSV_COLUMNS: [&str; 9] = [
    "id",
    "location",
    "location_type",
    "date_range_start",
    "date_range_end",
    "temperature",
    "weather_conditions",
    "created_at",
    "updated_at",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Pdf,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Pdf => "pdf",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// Whether the payload is text that can go straight to a terminal.
    pub fn is_text(&self) -> bool {
        !matches!(self, ExportFormat::Pdf)
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown export format '{0}', expected json, csv or pdf")]
pub struct UnknownExportFormat(pub String);

impl FromStr for ExportFormat {
    type Err = UnknownExportFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "pdf" => Ok(ExportFormat::Pdf),
            _ => Err(UnknownExportFormat(s.to_string())),
        }
    }
}

/// Serialize `records` in the requested format. An empty slice is valid input.
pub fn export(records: &[WeatherRecord], format: ExportFormat) -> WeatherResult<Vec<u8>> {
    debug!(count = records.len(), %format, "exporting records");
    match format {
        ExportFormat::Json => to_json(records),
        ExportFormat::Csv => to_csv(records),
        ExportFormat::Pdf => to_pdf(records),
    }
}

/// Read records back from a JSON export.
pub fn import_json(bytes: &[u8]) -> WeatherResult<Vec<WeatherRecord>> {
    serde_json::from_slice(bytes)
        .map_err(|e| WeatherError::Export(format!("invalid JSON export: {e}")))
}

fn to_json(records: &[WeatherRecord]) -> WeatherResult<Vec<u8>> {
    serde_json::to_vec_pretty(records).map_err(|e| WeatherError::Export(e.to_string()))
}

fn to_csv(records: &[WeatherRecord]) -> WeatherResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_COLUMNS).map_err(csv_error)?;

    for record in records {
        writer
            .write_record([
                record.id.to_string(),
                record.location.clone(),
                record.location_type.as_str().to_string(),
                record.date_range.start().format(DATE_FORMAT).to_string(),
                record.date_range.end().format(DATE_FORMAT).to_string(),
                record.temperature.to_string(),
                record.weather_conditions.clone(),
                format_timestamp(record.created_at),
                format_timestamp(record.updated_at),
            ])
            .map_err(csv_error)?;
    }

    writer.into_inner().map_err(|e| WeatherError::Export(e.to_string()))
}

fn csv_error(err: csv::Error) -> WeatherError {
    WeatherError::Export(err.to_string())
}

const PAGE_WIDTH: Mm = Mm(210.0);
const PAGE_HEIGHT: Mm = Mm(297.0);
const MARGIN_MM: f32 = 15.0;
const TOP_MM: f32 = 280.0;
const LINE_MM: f32 = 6.0;

struct PdfCursor {
    layer: PdfLayerReference,
    y: f32,
}

fn to_pdf(records: &[WeatherRecord]) -> WeatherResult<Vec<u8>> {
    let (doc, page, layer) =
        PdfDocument::new("Weather History Report", PAGE_WIDTH, PAGE_HEIGHT, "Layer 1");
    let regular = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf_error)?;
    let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(pdf_error)?;

    let mut cursor = PdfCursor {
        layer: doc.get_page(page).get_layer(layer),
        y: TOP_MM,
    };

    cursor.line("Weather History Report", 18.0, &bold);
    let generated = Utc::now().format("%Y-%m-%d %H:%M UTC");
    cursor.line(
        &format!("Generated {generated} - {} record(s)", records.len()),
        10.0,
        &regular,
    );
    cursor.gap();

    if records.is_empty() {
        cursor.line("No records.", 11.0, &regular);
    }

    for record in records {
        // each record takes five lines plus a gap
        if cursor.y < MARGIN_MM + LINE_MM * 6.0 {
            let (page, layer) = doc.add_page(PAGE_WIDTH, PAGE_HEIGHT, "Layer 1");
            cursor = PdfCursor {
                layer: doc.get_page(page).get_layer(layer),
                y: TOP_MM,
            };
        }

        let source = if record.from_cache {
            " (from stored data)"
        } else {
            ""
        };
        let heading = format!(
            "#{} {} [{}]{source}",
            record.id, record.location, record.location_type
        );
        cursor.line(&heading, 12.0, &bold);
        cursor.line(&format!("Dates: {}", record.date_range), 10.0, &regular);
        cursor.line(&format!("Temperature: {:.1} C", record.temperature), 10.0, &regular);
        cursor.line(&format!("Conditions: {}", record.weather_conditions), 10.0, &regular);
        cursor.line(
            &format!(
                "Created {}  Updated {}",
                record.created_at.format("%Y-%m-%d %H:%M"),
                record.updated_at.format("%Y-%m-%d %H:%M")
            ),
            9.0,
            &regular,
        );
        cursor.gap();
    }

    doc.save_to_bytes().map_err(pdf_error)
}

impl PdfCursor {
    fn line(&mut self, text: &str, size: f32, font: &IndirectFontRef) {
        self.layer.use_text(text, size, Mm(MARGIN_MM), Mm(self.y), font);
        self.y -= LINE_MM;
    }

    fn gap(&mut self) {
        self.y -= LINE_MM / 2.0;
    }
}

fn pdf_error(err: printpdf::Error) -> WeatherError {
    WeatherError::Export(format!("PDF generation failed: {err}"))
}
