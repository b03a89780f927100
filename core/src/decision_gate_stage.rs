//! Decision gate: the human approval step between the two stages.
//!
//! A reviewer sees the case and its risk assessment and approves or
//! rejects it. Only approved cases continue to the compliance stage,
//! which is where the cost avoidance comes from.
//!
//! RULE: A case gets exactly one decision. It is written once to the
//! audit trail and the store, and never revised.

use crate::{
    agent_output::RiskAssessment,
    audit::AuditRecord,
    case::{CaseContext, CaseState},
    config::ReviewPolicyConfig,
    error::{SarError, SarResult},
    event::PipelineEvent,
    metrics::format_usd,
    rng::StageSlot,
    schema::CaseData,
    stage::{PipelineStage, StageEnv},
    types::{CaseId, EntityId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionOutcome {
    Approve,
    Reject,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::Reject => "REJECT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "APPROVE" => Some(Self::Approve),
            "REJECT" => Some(Self::Reject),
            _ => None,
        }
    }

    fn next_state(&self) -> CaseState {
        match self {
            Self::Approve => CaseState::Approved,
            Self::Reject => CaseState::Rejected,
        }
    }
}

impl fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The recorded gate decision for one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub case_id: CaseId,
    pub outcome: DecisionOutcome,
    /// The analyst confidence the reviewer decided on.
    pub confidence_score: f64,
    pub reviewer: String,
    pub rationale: String,
    pub decided_at: DateTime<Utc>,
}

/// What a reviewer returns.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewVerdict {
    pub outcome: DecisionOutcome,
    pub rationale: String,
}

pub trait Reviewer {
    fn name(&self) -> &str;

    fn review(&mut self, case: &CaseData, assessment: &RiskAssessment) -> SarResult<ReviewVerdict>;
}

// ── Simulated reviewer ───────────────────────────────────────────────────────

/// Approves when the assessed level is in the policy's set and the
/// analyst is confident enough. Fallback assessments are always rejected.
pub struct PolicyReviewer {
    policy: ReviewPolicyConfig,
}

impl PolicyReviewer {
    pub fn new(policy: ReviewPolicyConfig) -> Self {
        Self { policy }
    }
}

impl Reviewer for PolicyReviewer {
    fn name(&self) -> &str {
        "policy_reviewer"
    }

    fn review(&mut self, _case: &CaseData, a: &RiskAssessment) -> SarResult<ReviewVerdict> {
        let verdict = if a.is_fallback() {
            ReviewVerdict {
                outcome: DecisionOutcome::Reject,
                rationale: "automated analysis unavailable; not eligible for simulated approval".into(),
            }
        } else if !self.policy.approve_levels.contains(&a.risk_level) {
            ReviewVerdict {
                outcome: DecisionOutcome::Reject,
                rationale: format!("risk level {} below filing policy", a.risk_level),
            }
        } else if a.confidence_score < self.policy.min_confidence {
            ReviewVerdict {
                outcome: DecisionOutcome::Reject,
                rationale: format!(
                    "confidence {:.2} below required {:.2}",
                    a.confidence_score, self.policy.min_confidence
                ),
            }
        } else {
            ReviewVerdict {
                outcome: DecisionOutcome::Approve,
                rationale: format!(
                    "{} risk {} with confidence {:.2}",
                    a.risk_level, a.classification, a.confidence_score
                ),
            }
        };
        Ok(verdict)
    }
}

// ── Scripted reviewer ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedDecision {
    pub decision: DecisionOutcome,
    #[serde(default)]
    pub note: Option<String>,
}

/// Pre-recorded decisions keyed by customer id. Customers without an
/// entry are rejected.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReviewer {
    decisions: HashMap<EntityId, ScriptedDecision>,
}

impl ScriptedReviewer {
    pub fn new(decisions: HashMap<EntityId, ScriptedDecision>) -> Self {
        Self { decisions }
    }

    /// Load `{"CUST_0001": {"decision": "APPROVE", "note": "..."}, ...}`.
    pub fn from_file(path: &Path) -> SarResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let decisions = serde_json::from_str(&content)?;
        Ok(Self { decisions })
    }

    pub fn with(mut self, customer_id: &str, decision: DecisionOutcome) -> Self {
        self.decisions.insert(
            customer_id.to_string(),
            ScriptedDecision { decision, note: None },
        );
        self
    }
}

impl Reviewer for ScriptedReviewer {
    fn name(&self) -> &str {
        "scripted_reviewer"
    }

    fn review(&mut self, case: &CaseData, _a: &RiskAssessment) -> SarResult<ReviewVerdict> {
        Ok(match self.decisions.get(&case.customer.customer_id) {
            Some(d) => ReviewVerdict {
                outcome: d.decision,
                rationale: d.note.clone().unwrap_or_else(|| "scripted decision".into()),
            },
            None => ReviewVerdict {
                outcome: DecisionOutcome::Reject,
                rationale: "no scripted decision for customer".into(),
            },
        })
    }
}

// ── Interactive reviewer ─────────────────────────────────────────────────────

/// Prompts a human on a terminal. Accepts `y`/`approve` or `n`/`reject`,
/// optionally followed by a free-text rationale. End of input rejects.
pub struct InteractiveReviewer<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> InteractiveReviewer<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn show(&mut self, case: &CaseData, a: &RiskAssessment) -> std::io::Result<()> {
        let w = &mut self.output;
        writeln!(w)?;
        writeln!(w, "── Case {} ──", case.case_id)?;
        writeln!(w, "  customer:       {} ({})", case.customer.name, case.customer.customer_id)?;
        writeln!(w, "  rating:         {}", case.customer.risk_rating)?;
        writeln!(w, "  transactions:   {} ({} gross)", case.transactions.len(), format_usd(case.gross_volume()))?;
        writeln!(w, "  classification: {}", a.classification)?;
        writeln!(w, "  risk level:     {}", a.risk_level)?;
        writeln!(w, "  confidence:     {:.2}", a.confidence_score)?;
        writeln!(w, "  indicators:     {}", a.key_indicators.join("; "))?;
        writeln!(w, "  reasoning:      {}", a.reasoning)?;
        Ok(())
    }
}

impl<R: BufRead, W: Write> Reviewer for InteractiveReviewer<R, W> {
    fn name(&self) -> &str {
        "human_reviewer"
    }

    fn review(&mut self, case: &CaseData, a: &RiskAssessment) -> SarResult<ReviewVerdict> {
        self.show(case, a)?;
        let mut line = String::new();
        loop {
            write!(self.output, "Approve SAR filing? [y/n] (optional note): ")?;
            self.output.flush()?;
            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(ReviewVerdict {
                    outcome: DecisionOutcome::Reject,
                    rationale: "no reviewer input".into(),
                });
            }
            let trimmed = line.trim();
            let (head, note) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
            let outcome = match head.to_ascii_lowercase().as_str() {
                "y" | "yes" | "approve" => DecisionOutcome::Approve,
                "n" | "no" | "reject" => DecisionOutcome::Reject,
                _ => {
                    writeln!(self.output, "  please answer y or n")?;
                    continue;
                }
            };
            let rationale = if note.trim().is_empty() {
                format!("reviewer answered {}", outcome.as_str().to_lowercase())
            } else {
                note.trim().to_string()
            };
            return Ok(ReviewVerdict { outcome, rationale });
        }
    }
}

// ── Stage ────────────────────────────────────────────────────────────────────

pub struct DecisionGateStage {
    reviewer: Box<dyn Reviewer>,
    decided: HashSet<CaseId>,
}

impl DecisionGateStage {
    pub fn new(reviewer: Box<dyn Reviewer>) -> Self {
        Self {
            reviewer,
            decided: HashSet::new(),
        }
    }

    /// Obtain, record and apply the decision for one case.
    pub fn decide(&mut self, ctx: &mut CaseContext, env: &mut StageEnv<'_>) -> SarResult<Decision> {
        let case_id = ctx.case.case_id.clone();
        if self.decided.contains(&case_id) || ctx.decision.is_some() {
            return Err(SarError::DuplicateDecision { case_id });
        }
        let assessment = ctx.assessment.clone().ok_or_else(|| {
            SarError::Other(anyhow::anyhow!("case {case_id} reached the gate without an assessment"))
        })?;

        let started = Instant::now();
        let verdict = self.reviewer.review(&ctx.case, &assessment)?;
        let decision = Decision {
            case_id: case_id.clone(),
            outcome: verdict.outcome,
            confidence_score: assessment.confidence_score,
            reviewer: self.reviewer.name().to_string(),
            rationale: verdict.rationale,
            decided_at: env.clock.now(),
        };

        env.store.insert_decision(env.run_id, &decision)?;
        ctx.transition(decision.outcome.next_state())?;
        env.store
            .update_case_state(&case_id, ctx.state(), &decision.decided_at.to_rfc3339())?;
        self.decided.insert(case_id.clone());

        env.audit.record(
            AuditRecord::new("HumanReviewer", "review_case", &case_id, started)
                .input(format!(
                    "risk_level={} confidence={:.2}",
                    assessment.risk_level, assessment.confidence_score
                ))
                .output(format!("decision={} reviewer={}", decision.outcome, decision.reviewer))
                .reasoning(decision.rationale.clone()),
        );

        ctx.decision = Some(decision.clone());
        Ok(decision)
    }
}

impl PipelineStage for DecisionGateStage {
    fn name(&self) -> &'static str {
        "decision_gate"
    }

    fn slot(&self) -> StageSlot {
        StageSlot::DecisionGate
    }

    fn applies_to(&self, state: CaseState) -> bool {
        state == CaseState::Screened
    }

    fn process(&mut self, ctx: &mut CaseContext, env: &mut StageEnv<'_>) -> SarResult<Vec<PipelineEvent>> {
        let decision = self.decide(ctx, env)?;
        log::info!(
            "case={} gate: {} by {} ({})",
            ctx.seq,
            decision.outcome,
            decision.reviewer,
            decision.rationale
        );
        Ok(vec![PipelineEvent::DecisionRecorded {
            seq: ctx.seq,
            case_id: decision.case_id,
            outcome: decision.outcome,
            reviewer: decision.reviewer,
            confidence_score: decision.confidence_score,
        }])
    }
}
