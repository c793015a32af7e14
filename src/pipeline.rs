//! Reshape-then-bin orchestration, including optional time-range trimming of
//! the wide input.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::binning::{bin_with_report, BinReport};
use crate::config::DEFAULT_INTERVAL;
use crate::error::PipelineError;
use crate::interval::{parse_interval, Interval};
use crate::progress::RunHooks;
use crate::reshape::{reshape_with_report, ReshapeReport};
use crate::schedule::AggregationSchedule;
use crate::series::{BinnedTable, LongTable, WideSchema};
use crate::table::{parse_timestamp, RawTable};

/// Inclusive on both ends, on the naive clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, PipelineError> {
        if start > end {
            return Err(PipelineError::Configuration(format!(
                "time range start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start <= ts && ts <= self.end
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRequest {
    pub schema: WideSchema,
    pub interval: String,
    pub schedule: AggregationSchedule,
    pub time_range: Option<TimeRange>,
}

impl Default for PipelineRequest {
    fn default() -> Self {
        Self {
            schema: WideSchema::default(),
            interval: DEFAULT_INTERVAL.to_string(),
            schedule: AggregationSchedule::reference(),
            time_range: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub trimmed_rows: u64,
    pub reshape: ReshapeReport,
    pub bin: BinReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub long: LongTable,
    pub binned: BinnedTable,
    pub report: PipelineReport,
}

pub fn trim_wide_table(
    raw: &RawTable,
    schema: &WideSchema,
    range: TimeRange,
) -> Result<RawTable, PipelineError> {
    let time_idx = raw.require_column(&schema.time_column)?;
    let rows = raw
        .rows
        .iter()
        .enumerate()
        .filter(|(idx, _)| {
            parse_timestamp(raw.cell(*idx, time_idx))
                .map(|ts| range.contains(ts))
                .unwrap_or(false)
        })
        .map(|(_, row)| row.clone())
        .collect();

    Ok(RawTable {
        headers: raw.headers.clone(),
        rows,
    })
}

pub fn reshape_then_bin(
    raw: &RawTable,
    request: &PipelineRequest,
    hooks: RunHooks<'_>,
) -> Result<PipelineOutput, PipelineError> {
    let interval: Interval = parse_interval(&request.interval)?;
    request.schema.resolve(raw)?;
    check_schedule_columns(&request.schema, &request.schedule)?;

    info!(
        component = "pipeline",
        event = "pipeline.start",
        input_rows = raw.len(),
        interval = %interval,
        trimmed = request.time_range.is_some()
    );

    let mut report = PipelineReport::default();
    let trimmed;
    let input = match request.time_range {
        Some(range) => {
            hooks.report("Trimming data…");
            trimmed = trim_wide_table(raw, &request.schema, range)?;
            report.trimmed_rows = (raw.len() - trimmed.len()) as u64;
            &trimmed
        }
        None => raw,
    };

    let (long, reshape_report) = reshape_with_report(input, &request.schema, hooks)?;
    let (binned, bin_report) = bin_with_report(&long, interval, &request.schedule, hooks)?;
    report.reshape = reshape_report;
    report.bin = bin_report;

    info!(
        component = "pipeline",
        event = "pipeline.finish",
        trimmed_rows = report.trimmed_rows,
        long_rows = long.len(),
        binned_rows = binned.len()
    );
    hooks.report("Done.");

    Ok(PipelineOutput {
        long,
        binned,
        report,
    })
}

fn check_schedule_columns(
    schema: &WideSchema,
    schedule: &AggregationSchedule,
) -> Result<(), PipelineError> {
    for rule in schedule.rules() {
        for column in &rule.source_columns {
            let known = column == &schema.activity_column
                || schema.instantaneous_fields.iter().any(|f| f == column);
            if !known {
                return Err(PipelineError::missing_column(column));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .expect("valid date")
            .and_hms_opt(h, m, 0)
            .expect("valid time")
    }

    fn raw(rows: &[&[&str]]) -> RawTable {
        RawTable {
            headers: ["Dataset", "Time", "Act[0]"]
                .iter()
                .map(|h| h.to_string())
                .collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect(),
        }
    }

    fn one_slot() -> WideSchema {
        WideSchema {
            activity_window_size: 1,
            instantaneous_fields: Vec::new(),
            ..WideSchema::default()
        }
    }

    #[test]
    fn run_report_serializes_to_json() {
        let table = raw(&[&["d", "2024-03-09 10:07:00", "1"]]);
        let request = PipelineRequest {
            schema: one_slot(),
            schedule: AggregationSchedule::new(vec![crate::schedule::AggregationRule {
                id: 1,
                output_name: "Raw Score".to_string(),
                source_columns: vec!["Act".to_string()],
                reducer: crate::schedule::Reducer::Mean,
            }])
            .expect("valid schedule"),
            time_range: Some(TimeRange::new(at(10, 0), at(11, 0)).expect("valid range")),
            ..PipelineRequest::default()
        };

        let output = reshape_then_bin(&table, &request, RunHooks::none()).expect("run succeeds");
        let json = serde_json::to_value(&output.report).expect("report serializes");

        assert_eq!(json["trimmed_rows"], 0);
        assert_eq!(json["reshape"]["output_rows"], 1);
        assert_eq!(json["bin"]["output_rows"], 1);
        assert_eq!(
            json["bin"]["schedule_fingerprint"],
            request.schedule.fingerprint()
        );
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(matches!(
            TimeRange::new(at(11, 0), at(10, 0)),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn trim_is_inclusive_and_drops_unparseable_times() {
        let table = raw(&[
            &["d", "2024-03-09 09:59:00", "1"],
            &["d", "2024-03-09 10:00:00", "2"],
            &["d", "2024-03-09 10:30:00", "3"],
            &["d", "bad", "4"],
        ]);
        let range = TimeRange::new(at(10, 0), at(10, 30)).expect("valid range");

        let trimmed = trim_wide_table(&table, &one_slot(), range).expect("trim succeeds");
        let kept: Vec<&str> = trimmed.rows.iter().map(|r| r[2].as_str()).collect();
        assert_eq!(kept, vec!["2", "3"]);
    }

    #[test]
    fn configuration_errors_abort_before_any_output() {
        let table = raw(&[&["d", "2024-03-09 10:00:00", "1"]]);
        let request = PipelineRequest {
            schema: one_slot(),
            interval: "0 hours".to_string(),
            ..PipelineRequest::default()
        };

        let err = reshape_then_bin(&table, &request, RunHooks::none()).expect_err("must fail");
        assert!(matches!(err, PipelineError::InvalidInterval { .. }));
    }

    #[test]
    fn schedule_reading_unknown_columns_fails_before_reshaping() {
        let table = raw(&[&["d", "2024-03-09 10:00:00", "1"]]);
        let request = PipelineRequest {
            schema: one_slot(),
            ..PipelineRequest::default()
        };

        match reshape_then_bin(&table, &request, RunHooks::none()) {
            Err(PipelineError::Schema { column }) => assert_eq!(column, "T"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
