//! Run configuration for the command-line tools, read from `ACTIBIN_*` variables.

use std::path::PathBuf;

use thiserror::Error;

use crate::error::PipelineError;
use crate::observability::{env_value, parse_bool};
use crate::pipeline::{PipelineRequest, TimeRange};
use crate::schedule::{AggregationSchedule, ReducerPolicy};
use crate::series::WideSchema;
use crate::table::parse_timestamp;

pub const INTERVAL_ENV: &str = "ACTIBIN_INTERVAL";
pub const SCHEDULE_PATH_ENV: &str = "ACTIBIN_SCHEDULE_PATH";
pub const ACTIVITY_SLOTS_ENV: &str = "ACTIBIN_ACTIVITY_SLOTS";
pub const DEVICE_COLUMN_ENV: &str = "ACTIBIN_DEVICE_COLUMN";
pub const TIME_COLUMN_ENV: &str = "ACTIBIN_TIME_COLUMN";
pub const START_ENV: &str = "ACTIBIN_START";
pub const END_ENV: &str = "ACTIBIN_END";
pub const REDUCER_POLICY_ENV: &str = "ACTIBIN_REDUCER_POLICY";
pub const WRITE_LONG_ENV: &str = "ACTIBIN_WRITE_LONG";

pub const DEFAULT_INTERVAL: &str = "15 minutes";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidSlotCount { var: &'static str, value: String },
    #[error("{var} is not a recognised timestamp: '{value}'")]
    InvalidTimestamp { var: &'static str, value: String },
    #[error("ACTIBIN_START and ACTIBIN_END must be set together")]
    HalfOpenRange,
    #[error("ACTIBIN_START must not be after ACTIBIN_END")]
    InvertedRange,
    #[error("{var} must be 'strict' or 'fallback_to_mean', got '{value}'")]
    InvalidReducerPolicy { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub schema: WideSchema,
    pub interval: String,
    pub schedule_path: Option<PathBuf>,
    pub reducer_policy: ReducerPolicy,
    pub time_range: Option<TimeRange>,
    pub write_long: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            schema: WideSchema::default(),
            interval: DEFAULT_INTERVAL.to_string(),
            schedule_path: None,
            reducer_policy: ReducerPolicy::Strict,
            time_range: None,
            write_long: false,
        }
    }
}

impl RunConfig {
    pub fn load_schedule(&self) -> Result<AggregationSchedule, PipelineError> {
        match &self.schedule_path {
            Some(path) => AggregationSchedule::from_json_path(path, self.reducer_policy),
            None => Ok(AggregationSchedule::reference()),
        }
    }

    pub fn pipeline_request(&self) -> Result<PipelineRequest, PipelineError> {
        Ok(PipelineRequest {
            schema: self.schema.clone(),
            interval: self.interval.clone(),
            schedule: self.load_schedule()?,
            time_range: self.time_range,
        })
    }
}

pub fn run_config_from_env() -> Result<RunConfig, ConfigError> {
    let mut config = RunConfig::default();

    if let Some(interval) = env_value(INTERVAL_ENV) {
        config.interval = interval;
    }
    if let Some(path) = env_value(SCHEDULE_PATH_ENV) {
        config.schedule_path = Some(PathBuf::from(path));
    }
    if let Some(raw) = env_value(ACTIVITY_SLOTS_ENV) {
        config.schema.activity_window_size = raw
            .parse::<usize>()
            .ok()
            .filter(|slots| *slots > 0)
            .ok_or(ConfigError::InvalidSlotCount {
                var: ACTIVITY_SLOTS_ENV,
                value: raw,
            })?;
    }
    if let Some(column) = env_value(DEVICE_COLUMN_ENV) {
        config.schema.device_column = column;
    }
    if let Some(column) = env_value(TIME_COLUMN_ENV) {
        config.schema.time_column = column;
    }
    if let Some(raw) = env_value(REDUCER_POLICY_ENV) {
        config.reducer_policy = match raw.to_ascii_lowercase().as_str() {
            "strict" => ReducerPolicy::Strict,
            "fallback_to_mean" | "fallback" => ReducerPolicy::FallbackToMean,
            _ => {
                return Err(ConfigError::InvalidReducerPolicy {
                    var: REDUCER_POLICY_ENV,
                    value: raw,
                })
            }
        };
    }
    if let Some(raw) = env_value(WRITE_LONG_ENV) {
        config.write_long = parse_bool(&raw).unwrap_or(false);
    }

    let start = env_value(START_ENV)
        .map(|raw| timestamp_var(START_ENV, raw))
        .transpose()?;
    let end = env_value(END_ENV)
        .map(|raw| timestamp_var(END_ENV, raw))
        .transpose()?;
    config.time_range = match (start, end) {
        (Some(start), Some(end)) => {
            Some(TimeRange::new(start, end).map_err(|_| ConfigError::InvertedRange)?)
        }
        (None, None) => None,
        _ => return Err(ConfigError::HalfOpenRange),
    };

    Ok(config)
}

fn timestamp_var(var: &'static str, raw: String) -> Result<chrono::NaiveDateTime, ConfigError> {
    parse_timestamp(&raw).ok_or(ConfigError::InvalidTimestamp { var, value: raw })
}
