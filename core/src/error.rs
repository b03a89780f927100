use thiserror::Error;

use crate::case::CaseState;

#[derive(Error, Debug)]
pub enum SarError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{record} error (ID: {id}): {reason}")]
    Validation {
        record: &'static str,
        id: String,
        reason: String,
    },

    #[error("Failed to parse {stage} output: {reason}")]
    StageOutput { stage: &'static str, reason: String },

    #[error("Case {case_id}: cannot move from {from} to {to}")]
    InvalidTransition {
        case_id: String,
        from: CaseState,
        to: CaseState,
    },

    #[error("Case {case_id} already has a recorded decision")]
    DuplicateDecision { case_id: String },

    #[error("Case {case_id} cannot be filed: {reason}")]
    FilingRefused { case_id: String, reason: String },

    #[error("Case {case_id} not found")]
    CaseNotFound { case_id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SarResult<T> = Result<T, SarError>;

impl SarError {
    pub fn validation(record: &'static str, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            record,
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn stage_output(stage: &'static str, reason: impl Into<String>) -> Self {
        Self::StageOutput {
            stage,
            reason: reason.into(),
        }
    }
}
