//! Floors long-format observations into fixed-width bins and reduces each bin
//! per aggregation rule.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::interval::{parse_interval, Interval};
use crate::progress::RunHooks;
use crate::schedule::AggregationSchedule;
use crate::series::{
    BinnedRecord, BinnedTable, LongTable, DEFAULT_DEVICE_COLUMN, DEFAULT_TIME_COLUMN,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinReport {
    pub input_rows: u64,
    pub invalid_time_rows: u64,
    pub output_rows: u64,
    pub rules_evaluated: u64,
    pub schedule_fingerprint: String,
}

type BinKey<'a> = (&'a str, NaiveDateTime);

pub fn bin(
    long: &LongTable,
    interval: &str,
    schedule: &AggregationSchedule,
    hooks: RunHooks<'_>,
) -> Result<BinnedTable, PipelineError> {
    let interval = parse_interval(interval)?;
    bin_with_report(long, interval, schedule, hooks).map(|(table, _report)| table)
}

pub fn bin_with_report(
    long: &LongTable,
    interval: Interval,
    schedule: &AggregationSchedule,
    hooks: RunHooks<'_>,
) -> Result<(BinnedTable, BinReport), PipelineError> {
    let rule_columns = resolve_rule_columns(long, schedule)?;
    hooks.report("Binning data…");

    let fingerprint = schedule.fingerprint();
    info!(
        component = "binning",
        event = "bin.start",
        input_rows = long.len(),
        interval = %interval,
        rule_count = schedule.rules().len(),
        schedule_fingerprint = %fingerprint
    );

    let mut report = BinReport {
        input_rows: long.len() as u64,
        schedule_fingerprint: fingerprint,
        ..BinReport::default()
    };

    let groups = group_by_bin(long, interval, &mut report);
    if report.invalid_time_rows > 0 {
        warn!(
            component = "binning",
            event = "bin.invalid_time_rows",
            rows = report.invalid_time_rows
        );
    }

    let mut rule_outputs: Vec<Vec<Option<f64>>> = Vec::with_capacity(schedule.rules().len());
    for (rule, columns) in schedule.rules().iter().zip(&rule_columns) {
        hooks.checkpoint("binning")?;
        let outputs: Vec<Option<f64>> = groups
            .values()
            .map(|rows| {
                let values = collect_values(long, rows, columns);
                rule.reducer.apply(&values)
            })
            .collect();

        debug!(
            component = "binning",
            event = "bin.rule.evaluated",
            rule_id = rule.id,
            output_name = %rule.output_name,
            reducer = rule.reducer.as_str(),
            missing_bins = outputs.iter().filter(|value| value.is_none()).count()
        );
        rule_outputs.push(outputs);
        report.rules_evaluated += 1;
    }

    let records: Vec<BinnedRecord> = groups
        .keys()
        .enumerate()
        .map(|(group_idx, (device_id, bin_start))| BinnedRecord {
            device_id: (*device_id).to_string(),
            bin_start: *bin_start,
            values: rule_outputs
                .iter()
                .map(|outputs| outputs[group_idx])
                .collect(),
        })
        .collect();
    report.output_rows = records.len() as u64;

    info!(
        component = "binning",
        event = "bin.finish",
        output_rows = report.output_rows,
        invalid_time_rows = report.invalid_time_rows,
        rules_evaluated = report.rules_evaluated
    );

    let table = BinnedTable {
        device_column: DEFAULT_DEVICE_COLUMN.to_string(),
        time_column: DEFAULT_TIME_COLUMN.to_string(),
        columns: schedule.output_names(),
        records,
    };
    Ok((table, report))
}

fn resolve_rule_columns(
    long: &LongTable,
    schedule: &AggregationSchedule,
) -> Result<Vec<Vec<usize>>, PipelineError> {
    schedule
        .rules()
        .iter()
        .map(|rule| {
            rule.source_columns
                .iter()
                .map(|name| {
                    long.column_index(name)
                        .ok_or_else(|| PipelineError::missing_column(name))
                })
                .collect()
        })
        .collect()
}

fn group_by_bin<'a>(
    long: &'a LongTable,
    interval: Interval,
    report: &mut BinReport,
) -> BTreeMap<BinKey<'a>, Vec<usize>> {
    let mut groups: BTreeMap<BinKey<'a>, Vec<usize>> = BTreeMap::new();
    for (idx, record) in long.records.iter().enumerate() {
        let Some(bin_start) = record.derived_time.and_then(|ts| interval.floor(ts)) else {
            report.invalid_time_rows += 1;
            continue;
        };
        groups
            .entry((record.device_id.as_str(), bin_start))
            .or_default()
            .push(idx);
    }
    groups
}

fn collect_values(long: &LongTable, rows: &[usize], columns: &[usize]) -> Vec<f64> {
    rows.iter()
        .flat_map(|&row| {
            let values = &long.records[row].values;
            columns
                .iter()
                .filter_map(move |&column| values.get(column).copied().flatten())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::CancelFlag;
    use crate::schedule::{AggregationRule, Reducer};
    use crate::series::LongRecord;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .expect("valid date")
            .and_hms_opt(h, m, 0)
            .expect("valid time")
    }

    fn long(rows: &[(&str, Option<NaiveDateTime>, Option<f64>, Option<f64>)]) -> LongTable {
        LongTable {
            device_column: "Dataset".to_string(),
            time_column: "Time".to_string(),
            columns: vec!["Act".to_string(), "T".to_string()],
            records: rows
                .iter()
                .map(|(device, time, act, temp)| LongRecord {
                    device_id: device.to_string(),
                    derived_time: *time,
                    values: vec![*act, *temp],
                })
                .collect(),
        }
    }

    fn schedule(rules: &[(&str, Reducer, &[&str])]) -> AggregationSchedule {
        AggregationSchedule::new(
            rules
                .iter()
                .enumerate()
                .map(|(idx, (name, reducer, columns))| AggregationRule {
                    id: idx as u32 + 1,
                    output_name: name.to_string(),
                    source_columns: columns.iter().map(|c| c.to_string()).collect(),
                    reducer: *reducer,
                })
                .collect(),
        )
        .expect("valid schedule")
    }

    #[test]
    fn assigns_rows_to_quarter_hour_bins() {
        let table = long(&[
            ("dev", Some(at(10, 7)), Some(1.0), None),
            ("dev", Some(at(10, 15)), Some(3.0), None),
        ]);
        let sched = schedule(&[("Raw", Reducer::Mean, &["Act"])]);

        let binned = bin(&table, "15 minutes", &sched, RunHooks::none()).expect("bin succeeds");

        assert_eq!(binned.len(), 2);
        assert_eq!(binned.records[0].bin_start, at(10, 0));
        assert_eq!(binned.records[0].values, vec![Some(1.0)]);
        assert_eq!(binned.records[1].bin_start, at(10, 15));
        assert_eq!(binned.records[1].values, vec![Some(3.0)]);
    }

    #[test]
    fn empty_groups_follow_reducer_policy_per_rule() {
        let table = long(&[
            ("dev", Some(at(10, 1)), Some(2.0), None),
            ("dev", Some(at(10, 2)), Some(4.0), None),
        ]);
        let sched = schedule(&[
            ("Raw", Reducer::Mean, &["Act"]),
            ("TempMean", Reducer::Mean, &["T"]),
            ("TempSum", Reducer::Sum, &["T"]),
            ("TempMax", Reducer::Max, &["T"]),
            ("TempMin", Reducer::Min, &["T"]),
            ("TempPct", Reducer::Percent, &["T"]),
        ]);

        let binned = bin(&table, "15 minutes", &sched, RunHooks::none()).expect("bin succeeds");

        assert_eq!(binned.len(), 1);
        assert_eq!(
            binned.records[0].values,
            vec![Some(3.0), None, Some(0.0), None, None, None]
        );
    }

    #[test]
    fn output_keys_use_stable_names_whatever_the_input_columns() {
        let mut table = long(&[("dev", Some(at(10, 7)), Some(1.0), None)]);
        table.device_column = "Sheep".to_string();
        table.time_column = "Stamp".to_string();
        let sched = schedule(&[("Raw", Reducer::Mean, &["Act"])]);

        let binned = bin(&table, "15 minutes", &sched, RunHooks::none()).expect("bin succeeds");

        assert_eq!(binned.device_column, "Dataset");
        assert_eq!(binned.time_column, "Time");
        assert_eq!(binned.to_raw_table().headers, vec!["Dataset", "Time", "Raw"]);
    }

    #[test]
    fn multi_column_rules_pool_values_across_columns() {
        let table = long(&[
            ("dev", Some(at(10, 1)), Some(1.0), Some(10.0)),
            ("dev", Some(at(10, 2)), Some(3.0), None),
        ]);
        let sched = schedule(&[
            ("Pooled", Reducer::Sum, &["Act", "T"]),
            ("PooledMax", Reducer::Max, &["Act", "T"]),
        ]);

        let binned = bin(&table, "1 hour", &sched, RunHooks::none()).expect("bin succeeds");
        assert_eq!(binned.records[0].values, vec![Some(14.0), Some(10.0)]);
    }

    #[test]
    fn devices_sharing_a_bin_are_kept_apart() {
        let table = long(&[
            ("b", Some(at(10, 1)), Some(10.0), None),
            ("a", Some(at(10, 2)), Some(2.0), None),
            ("b", Some(at(10, 3)), Some(20.0), None),
        ]);
        let sched = schedule(&[("Raw", Reducer::Mean, &["Act"])]);

        let binned = bin(&table, "15 minutes", &sched, RunHooks::none()).expect("bin succeeds");

        assert_eq!(binned.len(), 2);
        assert_eq!(binned.records[0].device_id, "a");
        assert_eq!(binned.records[0].values, vec![Some(2.0)]);
        assert_eq!(binned.records[1].device_id, "b");
        assert_eq!(binned.records[1].values, vec![Some(15.0)]);
    }

    #[test]
    fn invalid_times_are_excluded_and_counted() {
        let table = long(&[
            ("dev", None, Some(100.0), None),
            ("dev", Some(at(10, 2)), Some(2.0), None),
        ]);
        let sched = schedule(&[("Raw", Reducer::Sum, &["Act"])]);

        let (binned, report) = bin_with_report(
            &table,
            parse_interval("15 minutes").expect("valid interval"),
            &sched,
            RunHooks::none(),
        )
        .expect("bin succeeds");

        assert_eq!(binned.records[0].values, vec![Some(2.0)]);
        assert_eq!(report.invalid_time_rows, 1);
        assert_eq!(report.output_rows, 1);
    }

    #[test]
    fn unknown_source_column_is_a_schema_error() {
        let table = long(&[("dev", Some(at(10, 2)), Some(2.0), None)]);
        let sched = schedule(&[("Humidity", Reducer::Mean, &["RH"])]);

        match bin(&table, "15 minutes", &sched, RunHooks::none()) {
            Err(PipelineError::Schema { column }) => assert_eq!(column, "RH"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn invalid_interval_produces_no_output() {
        let table = long(&[("dev", Some(at(10, 2)), Some(2.0), None)]);
        let sched = schedule(&[("Raw", Reducer::Mean, &["Act"])]);

        for raw in ["abc minutes", "0 hours", "-5 days"] {
            let err = bin(&table, raw, &sched, RunHooks::none()).expect_err("must fail");
            assert!(matches!(err, PipelineError::InvalidInterval { .. }), "{raw}");
        }
    }

    #[test]
    fn cancellation_is_checked_between_rules() {
        let table = long(&[("dev", Some(at(10, 2)), Some(2.0), None)]);
        let sched = schedule(&[("Raw", Reducer::Mean, &["Act"])]);
        let flag = CancelFlag::new();
        flag.cancel();

        let err = bin(
            &table,
            "15 minutes",
            &sched,
            RunHooks::none().cancellable(&flag),
        )
        .expect_err("cancelled run must fail");
        assert!(matches!(err, PipelineError::Cancelled { stage: "binning" }));
    }
}
