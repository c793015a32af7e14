//! Error taxonomy shared by the reshape and binning stages.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("required column '{column}' is absent")]
    Schema { column: String },
    #[error("invalid interval '{input}': {reason}")]
    InvalidInterval { input: String, reason: String },
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("pipeline run cancelled during {stage}")]
    Cancelled { stage: &'static str },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub(crate) fn missing_column(column: &str) -> Self {
        Self::Schema {
            column: column.to_string(),
        }
    }

    pub(crate) fn invalid_interval(input: &str, reason: impl Into<String>) -> Self {
        Self::InvalidInterval {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}
