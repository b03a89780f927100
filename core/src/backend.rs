//! Backends behind the two analysis stages.
//!
//! A backend turns a case into a raw text response, the way an external
//! model would. The stages own parsing, validation and fallback; a
//! backend only has to produce text.

use crate::{
    agent_output::RiskAssessment,
    error::{SarError, SarResult},
    schema::CaseData,
};
use std::collections::VecDeque;

pub trait RiskBackend {
    fn name(&self) -> &str;

    fn analyze(&mut self, case: &CaseData) -> SarResult<String>;
}

pub trait NarrativeBackend {
    fn name(&self) -> &str;

    fn draft(&mut self, case: &CaseData, assessment: &RiskAssessment) -> SarResult<String>;
}

/// Replays canned responses in order. Used by tests and dry runs.
/// When the script runs out every further call fails.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    responses: VecDeque<Result<String, String>>,
    calls: usize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, raw: impl Into<String>) -> Self {
        self.responses.push_back(Ok(raw.into()));
        self
    }

    /// Queue a backend failure (as opposed to malformed output).
    pub fn fail(mut self, reason: impl Into<String>) -> Self {
        self.responses.push_back(Err(reason.into()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    fn next(&mut self) -> SarResult<String> {
        self.calls += 1;
        match self.responses.pop_front() {
            Some(Ok(raw)) => Ok(raw),
            Some(Err(reason)) => Err(SarError::Other(anyhow::anyhow!(reason))),
            None => Err(SarError::Other(anyhow::anyhow!("scripted backend exhausted"))),
        }
    }
}

impl RiskBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn analyze(&mut self, _case: &CaseData) -> SarResult<String> {
        self.next()
    }
}

impl NarrativeBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn draft(&mut self, _case: &CaseData, _assessment: &RiskAssessment) -> SarResult<String> {
        self.next()
    }
}
