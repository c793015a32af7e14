//! Aggregation schedule: which columns each binned output is computed from and how.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Mean,
    Sum,
    Max,
    Min,
    /// `mean * 50 + 50`: maps a signed score in [-1, 1] onto [0, 100]. Not clamped.
    Percent,
}

impl Reducer {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Min => "min",
            Self::Percent => "percent",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mean" => Some(Self::Mean),
            "sum" => Some(Self::Sum),
            "max" => Some(Self::Max),
            "min" => Some(Self::Min),
            "percent" | "act_percent" => Some(Self::Percent),
            _ => None,
        }
    }

    /// Reduces the non-missing values of one group. `Sum` of nothing is `0`;
    /// every other reducer reports missing.
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return match self {
                Self::Sum => Some(0.0),
                _ => None,
            };
        }

        match self {
            Self::Mean => Some(mean(values)),
            Self::Sum => Some(values.iter().sum()),
            Self::Max => values.iter().copied().reduce(f64::max),
            Self::Min => values.iter().copied().reduce(f64::min),
            Self::Percent => Some(mean(values) * 50.0 + 50.0),
        }
    }
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReducerPolicy {
    #[default]
    Strict,
    FallbackToMean,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationRule {
    pub id: u32,
    pub output_name: String,
    pub source_columns: Vec<String>,
    pub reducer: Reducer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationSchedule {
    rules: Vec<AggregationRule>,
}

// On-disk layout: `{"1": {"name": ..., "summarize": ..., "columns": [...]}}`.
#[derive(Debug, Clone, Deserialize)]
struct RuleEntry {
    name: Option<String>,
    #[serde(default)]
    summarize: Option<String>,
    #[serde(default)]
    columns: Vec<String>,
}

impl AggregationSchedule {
    pub fn new(mut rules: Vec<AggregationRule>) -> Result<Self, PipelineError> {
        rules.sort_by_key(|rule| rule.id);
        validate_rules(&rules)?;
        Ok(Self { rules })
    }

    pub fn reference() -> Self {
        let rule = |id: u32, name: &str, reducer: Reducer, column: &str| AggregationRule {
            id,
            output_name: name.to_string(),
            source_columns: vec![column.to_string()],
            reducer,
        };

        Self {
            rules: vec![
                rule(1, "Raw Score", Reducer::Mean, "Act"),
                rule(2, "Percent Score", Reducer::Percent, "Act"),
                rule(3, "Temperature", Reducer::Mean, "T"),
                rule(4, "Light", Reducer::Mean, "Light"),
                rule(5, "Battery Voltage", Reducer::Mean, "Vbat"),
            ],
        }
    }

    pub fn from_json_str(raw: &str, policy: ReducerPolicy) -> Result<Self, PipelineError> {
        let entries: BTreeMap<u32, RuleEntry> = serde_json::from_str(raw).map_err(|err| {
            PipelineError::Configuration(format!("unreadable aggregation schedule: {err}"))
        })?;

        let mut rules = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            let reducer = match entry.summarize.as_deref() {
                None => Reducer::Mean,
                Some(name) => resolve_reducer(id, name, policy)?,
            };
            rules.push(AggregationRule {
                id,
                output_name: entry.name.unwrap_or_else(|| format!("Bin_{id}")),
                source_columns: entry.columns,
                reducer,
            });
        }

        Self::new(rules)
    }

    pub fn from_json_path(path: &Path, policy: ReducerPolicy) -> Result<Self, PipelineError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw, policy)
    }

    pub fn rules(&self) -> &[AggregationRule] {
        &self.rules
    }

    pub fn output_names(&self) -> Vec<String> {
        self.rules
            .iter()
            .map(|rule| rule.output_name.clone())
            .collect()
    }

    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for rule in &self.rules {
            hasher.update(rule.id.to_le_bytes());
            hasher.update(rule.output_name.as_bytes());
            hasher.update([0u8]);
            hasher.update(rule.reducer.as_str().as_bytes());
            hasher.update([0u8]);
            for column in &rule.source_columns {
                hasher.update(column.as_bytes());
                hasher.update([0u8]);
            }
            hasher.update([0xffu8]);
        }
        hex::encode(hasher.finalize())
    }
}

impl Default for AggregationSchedule {
    fn default() -> Self {
        Self::reference()
    }
}

fn resolve_reducer(id: u32, name: &str, policy: ReducerPolicy) -> Result<Reducer, PipelineError> {
    if let Some(reducer) = Reducer::from_name(name) {
        return Ok(reducer);
    }

    match policy {
        ReducerPolicy::Strict => Err(PipelineError::Configuration(format!(
            "rule {id} uses unknown reducer '{name}'"
        ))),
        ReducerPolicy::FallbackToMean => {
            warn!(
                component = "schedule",
                event = "schedule.reducer.fallback",
                rule_id = id,
                reducer = name,
                fallback = Reducer::Mean.as_str()
            );
            Ok(Reducer::Mean)
        }
    }
}

fn validate_rules(rules: &[AggregationRule]) -> Result<(), PipelineError> {
    if rules.is_empty() {
        return Err(PipelineError::Configuration(
            "aggregation schedule has no rules".to_string(),
        ));
    }

    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    for rule in rules {
        if !ids.insert(rule.id) {
            return Err(PipelineError::Configuration(format!(
                "rule id {} is defined more than once",
                rule.id
            )));
        }
        if rule.output_name.trim().is_empty() {
            return Err(PipelineError::Configuration(format!(
                "rule {} has an empty output name",
                rule.id
            )));
        }
        if !names.insert(rule.output_name.as_str()) {
            return Err(PipelineError::Configuration(format!(
                "output name '{}' is used by more than one rule",
                rule.output_name
            )));
        }
        if rule.source_columns.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "rule {} ('{}') names no source columns",
                rule.id, rule.output_name
            )));
        }
    }

    Ok(())
}
