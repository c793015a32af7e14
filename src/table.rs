//! String-celled tables and the value coercions applied when typing them.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PipelineError;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const NAIVE_DATETIME_FORMATS: [&str; 8] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
];

const OFFSET_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

const MISSING_MARKERS: [&str; 6] = ["nan", "na", "n/a", "null", "none", "nat"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize, PipelineError> {
        self.column_index(name)
            .ok_or_else(|| PipelineError::missing_column(name))
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn concat(tables: Vec<RawTable>) -> RawTable {
        let mut headers: Vec<String> = Vec::new();
        for table in &tables {
            for header in &table.headers {
                if !headers.contains(header) {
                    headers.push(header.clone());
                }
            }
        }

        let mut out = RawTable::new(headers);
        for table in tables {
            let mapping: Vec<usize> = table
                .headers
                .iter()
                .map(|header| {
                    out.headers
                        .iter()
                        .position(|candidate| candidate == header)
                        .unwrap_or_default()
                })
                .collect();
            for row in table.rows {
                let mut cells = vec![String::new(); out.headers.len()];
                for (source_idx, value) in row.into_iter().enumerate() {
                    if let Some(target_idx) = mapping.get(source_idx) {
                        cells[*target_idx] = value;
                    }
                }
                out.rows.push(cells);
            }
        }

        out
    }

    pub fn with_leading_column(mut self, name: &str, value: &str) -> RawTable {
        if let Some(existing) = self.column_index(name) {
            self.headers.remove(existing);
            for row in &mut self.rows {
                if existing < row.len() {
                    row.remove(existing);
                }
            }
        }

        self.headers.insert(0, name.to_string());
        for row in &mut self.rows {
            row.insert(0, value.to_string());
        }
        self
    }
}

pub fn read_csv_path(path: &Path) -> Result<RawTable, PipelineError> {
    let file = fs::File::open(path)?;
    read_csv_reader(file)
}

pub fn read_csv_reader<R: Read>(reader: R) -> Result<RawTable, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let width = headers.len();
    let mut table = RawTable::new(headers);
    let mut truncated_rows = 0u64;

    for record in reader.records() {
        let record = record?;
        let mut cells: Vec<String> = record.iter().map(str::to_string).collect();
        if cells.len() > width {
            truncated_rows += 1;
            cells.truncate(width);
        }
        cells.resize(width, String::new());
        table.rows.push(cells);
    }

    if truncated_rows > 0 {
        warn!(
            component = "table",
            event = "table.rows.truncated",
            rows = truncated_rows,
            header_width = width
        );
    }

    Ok(table)
}

pub fn write_csv_path(table: &RawTable, path: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = fs::File::create(path)?;
    write_csv_writer(table, file)
}

pub fn write_csv_writer<W: Write>(table: &RawTable, writer: W) -> Result<(), PipelineError> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Coerces a cell to a naive timestamp. Offset-bearing values are shifted to
/// UTC before the offset is dropped; anything unparseable is `None`.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || is_missing_marker(trimmed) {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.naive_utc());
    }
    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(trimmed, format) {
            return Some(parsed.naive_utc());
        }
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

pub fn parse_numeric(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || is_missing_marker(trimmed) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

pub fn format_timestamp(ts: Option<NaiveDateTime>) -> String {
    ts.map(|value| value.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

pub fn format_numeric(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn is_missing_marker(raw: &str) -> bool {
    MISSING_MARKERS
        .iter()
        .any(|marker| raw.eq_ignore_ascii_case(marker))
}
