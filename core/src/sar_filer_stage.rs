//! SAR filer: writes the filing document for approved, narrated cases.
//!
//! RULE: Nothing is written unless the case is approved, carries an
//! APPROVE decision and has both a risk assessment and a narrative.
//! Filing documents are never overwritten.

use crate::{
    agent_output::{Classification, ComplianceNarrative, RiskAssessment},
    audit::AuditRecord,
    case::{CaseContext, CaseState},
    decision_gate_stage::DecisionOutcome,
    error::{SarError, SarResult},
    event::PipelineEvent,
    metrics::format_usd,
    rng::StageSlot,
    stage::{PipelineStage, StageEnv},
    types::{CaseId, EntityId},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

/// The document written to `SAR_<sar_id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SarDocument {
    pub sar_id: String,
    pub case_id: CaseId,
    pub customer_id: EntityId,
    pub customer_name: String,
    pub filed_at: DateTime<Utc>,
    pub risk_assessment: RiskAssessment,
    pub narrative: String,
    pub narrative_reasoning: String,
    pub regulatory_citations: Vec<String>,
    pub completeness_check: bool,
    pub suspicious_amount: f64,
    pub activity_start: Option<NaiveDate>,
    pub activity_end: Option<NaiveDate>,
    pub reviewer: String,
}

/// What was filed, as recorded in the case ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct SarFiling {
    pub sar_id: String,
    pub case_id: CaseId,
    pub file_name: String,
    pub path: PathBuf,
    pub classification: Classification,
    pub suspicious_amount: f64,
    pub completeness_check: bool,
    pub filed_at: DateTime<Utc>,
}

pub struct SarFilerStage {
    filing_dir: PathBuf,
}

impl SarFilerStage {
    pub fn new(filing_dir: impl Into<PathBuf>) -> Self {
        Self {
            filing_dir: filing_dir.into(),
        }
    }

    fn refuse(ctx: &CaseContext, reason: impl Into<String>) -> SarError {
        SarError::FilingRefused {
            case_id: ctx.case_id().to_string(),
            reason: reason.into(),
        }
    }

    /// Check eligibility before anything touches the disk.
    fn eligible<'c>(ctx: &'c CaseContext) -> SarResult<(&'c RiskAssessment, &'c ComplianceNarrative, &'c str)> {
        if ctx.state() != CaseState::Approved {
            return Err(Self::refuse(ctx, format!("case is {}, not approved", ctx.state())));
        }
        let decision = ctx
            .decision
            .as_ref()
            .filter(|d| d.outcome == DecisionOutcome::Approve)
            .ok_or_else(|| Self::refuse(ctx, "no APPROVE decision on record"))?;
        let assessment = ctx
            .assessment
            .as_ref()
            .ok_or_else(|| Self::refuse(ctx, "no risk assessment"))?;
        let narrative = ctx
            .narrative
            .as_ref()
            .ok_or_else(|| Self::refuse(ctx, "no compliance narrative"))?;
        Ok((assessment, narrative, decision.reviewer.as_str()))
    }

    /// Write the SAR document, record it and move the case to filed.
    pub fn file(&self, ctx: &mut CaseContext, env: &mut StageEnv<'_>) -> SarResult<SarFiling> {
        let (assessment, narrative, reviewer) = Self::eligible(ctx)?;
        let started = Instant::now();
        let case = &ctx.case;
        let sar_id = env.rng.uuid().to_string();
        let filed_at = env.clock.now();
        let window = case.activity_window();

        let doc = SarDocument {
            sar_id: sar_id.clone(),
            case_id: case.case_id.clone(),
            customer_id: case.customer.customer_id.clone(),
            customer_name: case.customer.name.clone(),
            filed_at,
            risk_assessment: assessment.clone(),
            narrative: narrative.narrative.clone(),
            narrative_reasoning: narrative.narrative_reasoning.clone(),
            regulatory_citations: narrative.regulatory_citations.clone(),
            completeness_check: narrative.completeness_check,
            suspicious_amount: case.gross_volume(),
            activity_start: window.map(|w| w.0),
            activity_end: window.map(|w| w.1),
            reviewer: reviewer.to_string(),
        };

        std::fs::create_dir_all(&self.filing_dir)?;
        let file_name = format!("SAR_{sar_id}.json");
        let path = self.filing_dir.join(&file_name);
        let json = serde_json::to_string_pretty(&doc)?;
        // create_new: an existing document is never replaced.
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        drop(file);

        let filing = SarFiling {
            sar_id,
            case_id: doc.case_id.clone(),
            file_name,
            path,
            classification: assessment.classification,
            suspicious_amount: doc.suspicious_amount,
            completeness_check: doc.completeness_check,
            filed_at,
        };

        if let Err(e) = env.store.record_filing(env.run_id, &filing) {
            // No ledger row, so no document either.
            if let Err(rm) = std::fs::remove_file(&filing.path) {
                log::warn!("case={} could not remove {}: {rm}", ctx.seq, filing.path.display());
            }
            return Err(e);
        }
        ctx.transition(CaseState::Filed)?;

        env.audit.record(
            AuditRecord::new("SarFiler", "file_sar", &filing.case_id, started)
                .input(format!("classification={} amount={}", filing.classification, format_usd(filing.suspicious_amount)))
                .output(format!("sar_id={} file={}", filing.sar_id, filing.file_name))
                .reasoning(format!("completeness_check={}", filing.completeness_check)),
        );

        ctx.filing = Some(filing.clone());
        Ok(filing)
    }
}

impl PipelineStage for SarFilerStage {
    fn name(&self) -> &'static str {
        "sar_filer"
    }

    fn slot(&self) -> StageSlot {
        StageSlot::Filer
    }

    fn applies_to(&self, state: CaseState) -> bool {
        state == CaseState::Approved
    }

    fn process(&mut self, ctx: &mut CaseContext, env: &mut StageEnv<'_>) -> SarResult<Vec<PipelineEvent>> {
        let filing = self.file(ctx, env)?;
        log::info!("case={} filed {}", ctx.seq, filing.file_name);
        Ok(vec![PipelineEvent::SarFiled {
            seq: ctx.seq,
            case_id: filing.case_id,
            sar_id: filing.sar_id,
            file_name: filing.file_name,
        }])
    }
}
