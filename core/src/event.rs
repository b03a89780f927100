//! The pipeline event log.
//!
//! RULE: Every state change a stage makes is announced as an event.
//! The engine persists events in emission order; replaying the log
//! reproduces the run's outcome.

use crate::{
    agent_output::Classification,
    case::CaseState,
    decision_gate_stage::DecisionOutcome,
    schema::RiskLevel,
    types::{CaseId, CaseSeq, EntityId, RunId},
};
use serde::{Deserialize, Serialize};

/// Every event emitted during a run.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    // ── Engine events ──────────────────────────────
    RunInitialized {
        run_id: RunId,
        seed: u64,
    },
    CaseStarted {
        seq: CaseSeq,
        case_id: CaseId,
        customer_id: EntityId,
    },
    CaseCompleted {
        seq: CaseSeq,
        case_id: CaseId,
        final_state: CaseState,
    },

    // ── Stage 1: risk analysis ─────────────────────
    RiskAssessed {
        seq: CaseSeq,
        case_id: CaseId,
        classification: Classification,
        risk_level: RiskLevel,
        confidence_score: f64,
        fallback: bool,
    },

    // ── Decision gate ──────────────────────────────
    DecisionRecorded {
        seq: CaseSeq,
        case_id: CaseId,
        outcome: DecisionOutcome,
        reviewer: String,
        confidence_score: f64,
    },

    // ── Stage 2: compliance narrative ──────────────
    NarrativeGenerated {
        seq: CaseSeq,
        case_id: CaseId,
        word_count: usize,
        completeness_check: bool,
        fallback: bool,
    },
    StageSkipped {
        seq: CaseSeq,
        case_id: CaseId,
        stage: String,
        state: CaseState,
    },

    // ── Filing ─────────────────────────────────────
    SarFiled {
        seq: CaseSeq,
        case_id: CaseId,
        sar_id: String,
        file_name: String,
    },
}

impl PipelineEvent {
    /// Stable name stored in the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunInitialized { .. }     => "run_initialized",
            Self::CaseStarted { .. }        => "case_started",
            Self::CaseCompleted { .. }      => "case_completed",
            Self::RiskAssessed { .. }       => "risk_assessed",
            Self::DecisionRecorded { .. }   => "decision_recorded",
            Self::NarrativeGenerated { .. } => "narrative_generated",
            Self::StageSkipped { .. }       => "stage_skipped",
            Self::SarFiled { .. }           => "sar_filed",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub seq: CaseSeq,
    pub stage: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized PipelineEvent
}
