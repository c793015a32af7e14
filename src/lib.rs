//! Activity-window reshaping and time binning for per-device sensor logs.
//!
//! Current implemented scope:
//! - folder merge of per-device CSV exports into one wide table
//! - reshape of sliding activity windows into per-minute, per-device rows
//! - fixed-interval binning driven by a configurable aggregation schedule

mod binning;
mod config;
mod error;
mod interval;
mod merge;
mod observability;
mod pipeline;
mod progress;
mod reshape;
mod schedule;
mod series;
mod table;

pub use binning::{bin, bin_with_report, BinReport};
pub use config::{run_config_from_env, ConfigError, RunConfig, DEFAULT_INTERVAL};
pub use error::PipelineError;
pub use interval::{parse_interval, Interval, IntervalUnit};
pub use merge::{
    export_merged, merge_folder, MergeConfig, MergeError, MergeOutcome, SkippedFile, EXPORTS_DIR,
    MERGED_FILE_NAME,
};
pub use observability::{
    init_logging, log_app_start, log_output_written, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use pipeline::{
    reshape_then_bin, trim_wide_table, PipelineOutput, PipelineReport, PipelineRequest, TimeRange,
};
pub use progress::{CancelFlag, ProgressSink, RunHooks};
pub use reshape::{coerce_wide_records, reshape, reshape_with_report, ReshapeReport};
pub use schedule::{AggregationRule, AggregationSchedule, Reducer, ReducerPolicy};
pub use series::{
    BinnedRecord, BinnedTable, FieldPresence, LongRecord, LongTable, ResolvedColumns, WideRecord,
    WideSchema, DEFAULT_ACTIVITY_COLUMN, DEFAULT_ACTIVITY_WINDOW_SIZE, DEFAULT_DEVICE_COLUMN,
    DEFAULT_INSTANTANEOUS_FIELDS, DEFAULT_TIME_COLUMN,
};
pub use table::{
    format_timestamp, parse_numeric, parse_timestamp, read_csv_path, read_csv_reader,
    write_csv_path, write_csv_writer, RawTable, TIMESTAMP_FORMAT,
};
