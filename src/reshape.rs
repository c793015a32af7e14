//! Unrolls sliding activity windows into per-minute, per-device observations.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::progress::RunHooks;
use crate::series::{LongRecord, LongTable, ResolvedColumns, WideRecord, WideSchema};
use crate::table::{parse_numeric, parse_timestamp, RawTable};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReshapeReport {
    pub input_rows: u64,
    pub device_groups: u64,
    pub rows_without_device: u64,
    pub invalid_timestamp_rows: u64,
    pub derived_rows: u64,
    pub missing_activity_dropped: u64,
    pub output_rows: u64,
}

pub fn reshape(
    raw: &RawTable,
    schema: &WideSchema,
    hooks: RunHooks<'_>,
) -> Result<LongTable, PipelineError> {
    reshape_with_report(raw, schema, hooks).map(|(table, _report)| table)
}

pub fn reshape_with_report(
    raw: &RawTable,
    schema: &WideSchema,
    hooks: RunHooks<'_>,
) -> Result<(LongTable, ReshapeReport), PipelineError> {
    let resolved = schema.resolve(raw)?;
    hooks.report("Melting data…");

    info!(
        component = "reshape",
        event = "reshape.start",
        input_rows = raw.len(),
        activity_window_size = schema.activity_window_size,
        device_column = %schema.device_column,
        time_column = %schema.time_column
    );
    for field in resolved.instantaneous.iter().filter(|f| !f.is_present()) {
        debug!(
            component = "reshape",
            event = "reshape.field.absent",
            field = %field.name
        );
    }

    let mut report = ReshapeReport {
        input_rows: raw.len() as u64,
        ..ReshapeReport::default()
    };

    let wide = coerce_wide_records(raw, &resolved);
    report.invalid_timestamp_rows = wide.iter().filter(|r| r.timestamp.is_none()).count() as u64;

    let groups = group_by_device(&wide);
    report.rows_without_device = wide.iter().filter(|r| r.device_id.is_empty()).count() as u64;
    report.device_groups = groups.len() as u64;
    if report.rows_without_device > 0 {
        warn!(
            component = "reshape",
            event = "reshape.rows_without_device",
            rows = report.rows_without_device
        );
    }

    let mut records = Vec::with_capacity(wide.len() * schema.activity_window_size);
    for (device_id, rows) in &groups {
        hooks.checkpoint("reshape")?;
        expand_group(device_id, rows, &wide, schema.activity_window_size, &mut records);
    }
    report.derived_rows = records.len() as u64;

    records.retain(|record: &LongRecord| record.values[0].is_some());
    report.missing_activity_dropped = report.derived_rows - records.len() as u64;

    records.sort_by(compare_device_then_time);
    report.output_rows = records.len() as u64;

    let mut columns = Vec::with_capacity(1 + resolved.instantaneous.len());
    columns.push(schema.activity_column.clone());
    columns.extend(resolved.instantaneous.iter().map(|field| field.name.clone()));

    info!(
        component = "reshape",
        event = "reshape.finish",
        device_groups = report.device_groups,
        derived_rows = report.derived_rows,
        missing_activity_dropped = report.missing_activity_dropped,
        invalid_timestamp_rows = report.invalid_timestamp_rows,
        output_rows = report.output_rows
    );

    let table = LongTable {
        device_column: schema.device_column.clone(),
        time_column: schema.time_column.clone(),
        columns,
        records,
    };
    Ok((table, report))
}

pub fn coerce_wide_records(raw: &RawTable, resolved: &ResolvedColumns) -> Vec<WideRecord> {
    (0..raw.len())
        .map(|row| WideRecord {
            device_id: raw.cell(row, resolved.device).trim().to_string(),
            timestamp: parse_timestamp(raw.cell(row, resolved.time)),
            activity_window: resolved
                .activity_slots
                .iter()
                .map(|column| parse_numeric(raw.cell(row, *column)))
                .collect(),
            instantaneous: resolved
                .instantaneous
                .iter()
                .map(|field| field.column.and_then(|column| parse_numeric(raw.cell(row, column))))
                .collect(),
        })
        .collect()
}

fn group_by_device(wide: &[WideRecord]) -> BTreeMap<&str, Vec<usize>> {
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, record) in wide.iter().enumerate() {
        if record.device_id.is_empty() {
            continue;
        }
        groups.entry(record.device_id.as_str()).or_default().push(idx);
    }
    groups
}

// Emits one slot offset at a time across the whole group: slot `i` shifts every
// timestamp back `i` minutes and takes column `i` of every activity window.
fn expand_group(
    device_id: &str,
    rows: &[usize],
    wide: &[WideRecord],
    window_size: usize,
    out: &mut Vec<LongRecord>,
) {
    for slot in 0..window_size {
        let offset = ChronoDuration::minutes(slot as i64);
        out.extend(rows.iter().map(|&idx| {
            let source = &wide[idx];
            let mut values = Vec::with_capacity(1 + source.instantaneous.len());
            values.push(source.activity_window.get(slot).copied().flatten());
            values.extend(source.instantaneous.iter().copied());
            LongRecord {
                device_id: device_id.to_string(),
                derived_time: shift_back(source.timestamp, offset),
                values,
            }
        }));
    }
}

fn shift_back(ts: Option<NaiveDateTime>, offset: ChronoDuration) -> Option<NaiveDateTime> {
    ts.and_then(|value| value.checked_sub_signed(offset))
}

fn compare_device_then_time(a: &LongRecord, b: &LongRecord) -> Ordering {
    a.device_id
        .cmp(&b.device_id)
        .then_with(|| match (a.derived_time, b.derived_time) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::CancelFlag;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .expect("valid date")
            .and_hms_opt(h, m, 0)
            .expect("valid time")
    }

    fn schema(window: usize) -> WideSchema {
        WideSchema {
            activity_window_size: window,
            ..WideSchema::default()
        }
    }

    fn table(window: usize, rows: &[&[&str]]) -> RawTable {
        let mut headers = vec!["Dataset".to_string(), "Time".to_string()];
        headers.extend((0..window).map(|slot| format!("Act[{slot}]")));
        headers.push("T".to_string());
        RawTable {
            headers,
            rows: rows
                .iter()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn three_slot_window_unrolls_backwards_in_minutes() {
        let raw = table(3, &[&["dev", "2024-03-09 10:07:00", "0.1", "0.2", "0.3", "21.5"]]);

        let long = reshape(&raw, &schema(3), RunHooks::none()).expect("reshape succeeds");

        let observed: Vec<(Option<NaiveDateTime>, Option<f64>)> = long
            .records
            .iter()
            .map(|record| (record.derived_time, record.values[0]))
            .collect();
        assert_eq!(
            observed,
            vec![
                (Some(at(10, 5)), Some(0.3)),
                (Some(at(10, 6)), Some(0.2)),
                (Some(at(10, 7)), Some(0.1)),
            ]
        );
        assert!(long.records.iter().all(|r| r.values[1] == Some(21.5)));
        assert_eq!(long.columns, vec!["Act", "T", "Light", "Vbat"]);
    }

    #[test]
    fn missing_activity_slots_are_dropped() {
        let raw = table(3, &[&["dev", "2024-03-09 10:07:00", "0.1", "", "oops", "21.5"]]);

        let (long, report) =
            reshape_with_report(&raw, &schema(3), RunHooks::none()).expect("reshape succeeds");

        assert_eq!(long.len(), 1);
        assert_eq!(long.records[0].derived_time, Some(at(10, 7)));
        assert_eq!(report.derived_rows, 3);
        assert_eq!(report.missing_activity_dropped, 2);
    }

    #[test]
    fn devices_are_never_interleaved_even_when_times_overlap() {
        let raw = table(
            2,
            &[
                &["b", "2024-03-09 10:01:00", "1", "1", ""],
                &["a", "2024-03-09 10:01:00", "2", "2", ""],
                &["b", "2024-03-09 10:02:00", "3", "3", ""],
                &["a", "2024-03-09 10:02:00", "4", "4", ""],
            ],
        );

        let long = reshape(&raw, &schema(2), RunHooks::none()).expect("reshape succeeds");

        let devices: Vec<&str> = long.records.iter().map(|r| r.device_id.as_str()).collect();
        assert_eq!(devices, vec!["a", "a", "a", "a", "b", "b", "b", "b"]);
        for window in long.records.windows(2) {
            if window[0].device_id == window[1].device_id {
                assert!(window[0].derived_time <= window[1].derived_time);
            }
        }
    }

    #[test]
    fn invalid_timestamps_survive_and_sort_last_within_device() {
        let raw = table(
            1,
            &[
                &["dev", "garbage", "5", ""],
                &["dev", "2024-03-09 10:00:00", "6", ""],
            ],
        );

        let (long, report) =
            reshape_with_report(&raw, &schema(1), RunHooks::none()).expect("reshape succeeds");

        assert_eq!(long.len(), 2);
        assert_eq!(long.records[0].derived_time, Some(at(10, 0)));
        assert_eq!(long.records[1].derived_time, None);
        assert_eq!(report.invalid_timestamp_rows, 1);
    }

    #[test]
    fn rows_without_device_are_not_grouped() {
        let raw = table(1, &[&["", "2024-03-09 10:00:00", "5", ""]]);

        let (long, report) =
            reshape_with_report(&raw, &schema(1), RunHooks::none()).expect("reshape succeeds");

        assert!(long.is_empty());
        assert_eq!(report.rows_without_device, 1);
    }

    #[test]
    fn missing_time_column_is_a_schema_error() {
        let raw = RawTable {
            headers: vec!["Dataset".to_string(), "Act[0]".to_string()],
            rows: Vec::new(),
        };

        match reshape(&raw, &schema(1), RunHooks::none()) {
            Err(PipelineError::Schema { column }) => assert_eq!(column, "Time"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn cancellation_is_checked_between_device_groups() {
        let raw = table(1, &[&["dev", "2024-03-09 10:00:00", "5", ""]]);
        let flag = CancelFlag::new();
        flag.cancel();

        let err = reshape(&raw, &schema(1), RunHooks::none().cancellable(&flag))
            .expect_err("cancelled run must fail");
        assert!(matches!(err, PipelineError::Cancelled { stage: "reshape" }));
    }
}
