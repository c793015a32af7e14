//! Wide input schema and the long/binned time-series tables produced from it.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::table::{format_numeric, format_timestamp, RawTable};

pub const DEFAULT_DEVICE_COLUMN: &str = "Dataset";
pub const DEFAULT_TIME_COLUMN: &str = "Time";
pub const DEFAULT_ACTIVITY_COLUMN: &str = "Act";
pub const DEFAULT_ACTIVITY_WINDOW_SIZE: usize = 6;
pub const DEFAULT_INSTANTANEOUS_FIELDS: [&str; 3] = ["T", "Light", "Vbat"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WideSchema {
    pub device_column: String,
    pub time_column: String,
    /// Slot `i` is read from `{activity_column}[{i}]` and written to `activity_column`.
    pub activity_column: String,
    pub activity_window_size: usize,
    pub instantaneous_fields: Vec<String>,
}

impl Default for WideSchema {
    fn default() -> Self {
        Self {
            device_column: DEFAULT_DEVICE_COLUMN.to_string(),
            time_column: DEFAULT_TIME_COLUMN.to_string(),
            activity_column: DEFAULT_ACTIVITY_COLUMN.to_string(),
            activity_window_size: DEFAULT_ACTIVITY_WINDOW_SIZE,
            instantaneous_fields: DEFAULT_INSTANTANEOUS_FIELDS
                .iter()
                .map(|field| field.to_string())
                .collect(),
        }
    }
}

impl WideSchema {
    pub fn activity_slot_column(&self, slot: usize) -> String {
        format!("{}[{}]", self.activity_column, slot)
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if self.activity_window_size == 0 {
            return Err(PipelineError::Configuration(
                "activity window size must be at least 1".to_string(),
            ));
        }
        if self.instantaneous_fields.iter().any(|field| {
            field == &self.activity_column
                || field == &self.device_column
                || field == &self.time_column
        }) {
            return Err(PipelineError::Configuration(
                "instantaneous fields must not reuse the device, time or activity column names"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn resolve(&self, table: &RawTable) -> Result<ResolvedColumns, PipelineError> {
        self.validate()?;
        let time = table.require_column(&self.time_column)?;
        let device = table.require_column(&self.device_column)?;
        let activity_slots = (0..self.activity_window_size)
            .map(|slot| table.require_column(&self.activity_slot_column(slot)))
            .collect::<Result<Vec<_>, _>>()?;
        let instantaneous = self
            .instantaneous_fields
            .iter()
            .map(|name| FieldPresence {
                name: name.clone(),
                column: table.column_index(name),
            })
            .collect();

        Ok(ResolvedColumns {
            device,
            time,
            activity_slots,
            instantaneous,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPresence {
    pub name: String,
    pub column: Option<usize>,
}

impl FieldPresence {
    pub fn is_present(&self) -> bool {
        self.column.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumns {
    pub device: usize,
    pub time: usize,
    pub activity_slots: Vec<usize>,
    pub instantaneous: Vec<FieldPresence>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WideRecord {
    pub device_id: String,
    pub timestamp: Option<NaiveDateTime>,
    pub activity_window: Vec<Option<f64>>,
    pub instantaneous: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LongRecord {
    pub device_id: String,
    pub derived_time: Option<NaiveDateTime>,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LongTable {
    pub device_column: String,
    pub time_column: String,
    pub columns: Vec<String>,
    pub records: Vec<LongRecord>,
}

impl LongTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        self.records.get(row)?.values.get(idx).copied().flatten()
    }

    pub fn to_raw_table(&self) -> RawTable {
        let mut headers = vec![self.device_column.clone(), self.time_column.clone()];
        headers.extend(self.columns.iter().cloned());
        let mut table = RawTable::new(headers);
        for record in &self.records {
            let mut cells = vec![
                record.device_id.clone(),
                format_timestamp(record.derived_time),
            ];
            cells.extend(record.values.iter().map(|value| format_numeric(*value)));
            table.rows.push(cells);
        }
        table
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinnedRecord {
    pub device_id: String,
    pub bin_start: NaiveDateTime,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinnedTable {
    pub device_column: String,
    pub time_column: String,
    pub columns: Vec<String>,
    pub records: Vec<BinnedRecord>,
}

impl BinnedTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        self.records.get(row)?.values.get(idx).copied().flatten()
    }

    pub fn find(&self, device_id: &str, bin_start: NaiveDateTime) -> Option<&BinnedRecord> {
        self.records
            .iter()
            .find(|record| record.device_id == device_id && record.bin_start == bin_start)
    }

    pub fn to_long_table(&self) -> LongTable {
        LongTable {
            device_column: self.device_column.clone(),
            time_column: self.time_column.clone(),
            columns: self.columns.clone(),
            records: self
                .records
                .iter()
                .map(|record| LongRecord {
                    device_id: record.device_id.clone(),
                    derived_time: Some(record.bin_start),
                    values: record.values.clone(),
                })
                .collect(),
        }
    }

    pub fn to_raw_table(&self) -> RawTable {
        let mut headers = vec![self.device_column.clone(), self.time_column.clone()];
        headers.extend(self.columns.iter().cloned());
        let mut table = RawTable::new(headers);
        for record in &self.records {
            let mut cells = vec![
                record.device_id.clone(),
                format_timestamp(Some(record.bin_start)),
            ];
            cells.extend(record.values.iter().map(|value| format_numeric(*value)));
            table.rows.push(cells);
        }
        table
    }
}
