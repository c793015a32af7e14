//! Bin interval parsing and epoch-aligned flooring.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntervalUnit {
    Minute,
    Hour,
    Day,
}

impl IntervalUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }

    fn seconds(self) -> i64 {
        match self {
            Self::Minute => SECONDS_PER_MINUTE,
            Self::Hour => SECONDS_PER_HOUR,
            Self::Day => SECONDS_PER_DAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    magnitude: u32,
    unit: IntervalUnit,
}

impl Interval {
    pub fn new(magnitude: u32, unit: IntervalUnit) -> Result<Self, PipelineError> {
        if magnitude == 0 {
            return Err(PipelineError::invalid_interval(
                &format!("{magnitude} {}", unit.as_str()),
                "magnitude must be a positive integer",
            ));
        }
        Ok(Self { magnitude, unit })
    }

    pub fn magnitude(self) -> u32 {
        self.magnitude
    }

    pub fn unit(self) -> IntervalUnit {
        self.unit
    }

    pub fn as_seconds(self) -> i64 {
        i64::from(self.magnitude) * self.unit.seconds()
    }

    /// Start of the interval-aligned window containing `ts`, measured from the
    /// 1970-01-01 midnight epoch of the naive clock. `None` only when the bin
    /// start would fall outside the representable calendar.
    pub fn floor(self, ts: NaiveDateTime) -> Option<NaiveDateTime> {
        let epoch = epoch();
        let width = self.as_seconds();
        let since_epoch = ts.signed_duration_since(epoch);
        let seconds = since_epoch.num_seconds();
        let bucket = seconds.div_euclid(width);

        // Sub-second remainders on pre-epoch instants land in the previous
        // second, so they belong to the previous bucket when exactly aligned.
        let sub_second = since_epoch - ChronoDuration::seconds(seconds);
        let bucket = if sub_second < ChronoDuration::zero() && seconds.rem_euclid(width) == 0 {
            bucket - 1
        } else {
            bucket
        };

        let offset = bucket.checked_mul(width)?;
        epoch.checked_add_signed(ChronoDuration::try_seconds(offset)?)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plural = if self.magnitude == 1 { "" } else { "s" };
        write!(f, "{} {}{}", self.magnitude, self.unit.as_str(), plural)
    }
}

impl FromStr for Interval {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_interval(s)
    }
}

// Accepts `"<n> <unit>"` strings such as `"15 minutes"`, `"1 hour"`, `"2d"`.
pub fn parse_interval(input: &str) -> Result<Interval, PipelineError> {
    let trimmed = input.trim();
    let sign_len = usize::from(trimmed.starts_with(['-', '+']));
    let digits_len = trimmed[sign_len..]
        .chars()
        .take_while(char::is_ascii_digit)
        .count();
    if digits_len == 0 {
        return Err(PipelineError::invalid_interval(
            input,
            "expected a leading number like '15 minutes'",
        ));
    }

    let (number, rest) = trimmed.split_at(sign_len + digits_len);
    let magnitude: i64 = number
        .parse()
        .map_err(|_| PipelineError::invalid_interval(input, "magnitude is out of range"))?;
    if magnitude <= 0 {
        return Err(PipelineError::invalid_interval(
            input,
            "magnitude must be a positive integer",
        ));
    }
    let magnitude = u32::try_from(magnitude)
        .map_err(|_| PipelineError::invalid_interval(input, "magnitude is out of range"))?;

    let unit = parse_unit(rest.trim()).ok_or_else(|| {
        PipelineError::invalid_interval(input, "unit must be one of minute, hour, day")
    })?;

    Ok(Interval { magnitude, unit })
}

fn parse_unit(raw: &str) -> Option<IntervalUnit> {
    match raw.to_ascii_lowercase().as_str() {
        "m" | "min" | "mins" | "minute" | "minutes" => Some(IntervalUnit::Minute),
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(IntervalUnit::Hour),
        "d" | "day" | "days" => Some(IntervalUnit::Day),
        _ => None,
    }
}

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}
