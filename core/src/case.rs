//! Case lifecycle and the in-flight case context handed from stage to stage.
//!
//! Lifecycle (the only legal moves):
//!   screened -> approved -> filed
//!   screened -> rejected

use crate::{
    agent_output::{ComplianceNarrative, RiskAssessment},
    decision_gate_stage::Decision,
    error::{SarError, SarResult},
    sar_filer_stage::SarFiling,
    schema::CaseData,
    types::CaseSeq,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    Screened,
    Approved,
    Rejected,
    Filed,
}

impl CaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Screened => "screened",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Filed => "filed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "screened" => Some(Self::Screened),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "filed" => Some(Self::Filed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: CaseState) -> bool {
        matches!(
            (self, next),
            (Self::Screened, Self::Approved)
                | (Self::Screened, Self::Rejected)
                | (Self::Approved, Self::Filed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Filed)
    }
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the pipeline knows about one case while it is processed.
#[derive(Debug, Clone)]
pub struct CaseContext {
    pub seq: CaseSeq,
    pub case: CaseData,
    state: CaseState,
    pub assessment: Option<RiskAssessment>,
    pub risk_fallback: bool,
    pub decision: Option<Decision>,
    pub narrative: Option<ComplianceNarrative>,
    pub narrative_fallback: bool,
    pub filing: Option<SarFiling>,
}

impl CaseContext {
    pub fn new(seq: CaseSeq, case: CaseData) -> Self {
        Self {
            seq,
            case,
            state: CaseState::Screened,
            assessment: None,
            risk_fallback: false,
            decision: None,
            narrative: None,
            narrative_fallback: false,
            filing: None,
        }
    }

    pub fn state(&self) -> CaseState {
        self.state
    }

    pub fn case_id(&self) -> &str {
        &self.case.case_id
    }

    /// Move to `next`, refusing anything outside the lifecycle.
    pub fn transition(&mut self, next: CaseState) -> SarResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(SarError::InvalidTransition {
                case_id: self.case.case_id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}
