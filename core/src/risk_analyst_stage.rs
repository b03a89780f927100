//! Risk Analyst stage: stage 1 of the two-stage screen.
//!
//! This stage:
//!   1. Asks its backend for an assessment of the case
//!   2. Extracts and validates the JSON assessment from the raw response
//!   3. Substitutes a fallback assessment when the response is unusable
//!   4. Records the outcome in the audit trail
//!
//! Runs for every screened case.

use crate::{
    agent_output::{parse_stage_output, Classification, RiskAssessment},
    audit::{AuditRecord, AuditTrail},
    backend::RiskBackend,
    case::{CaseContext, CaseState},
    config::RiskRuleConfig,
    error::SarResult,
    event::PipelineEvent,
    metrics::format_usd,
    rng::StageSlot,
    schema::{CaseData, RiskLevel},
    stage::{PipelineStage, StageEnv},
};
use std::time::Instant;

const STAGE: &str = "Risk Analyst";
const AGENT: &str = "RiskAnalyst";
const ACTION: &str = "analyze_case";

// ── Stage ────────────────────────────────────────────────────────────────────

pub struct RiskAnalystStage {
    backend: Box<dyn RiskBackend>,
}

impl RiskAnalystStage {
    pub fn new(backend: Box<dyn RiskBackend>) -> Self {
        Self { backend }
    }

    /// Assess one case. Never fails: unusable backend output is replaced
    /// by the fallback assessment. The flag reports whether that happened.
    pub fn analyze(&mut self, case: &CaseData, audit: &mut AuditTrail) -> (RiskAssessment, bool) {
        let started = Instant::now();
        let record = AuditRecord::new(AGENT, ACTION, &case.case_id, started)
            .input(format!("customer_id={} backend={}", case.customer.customer_id, self.backend.name()));

        let parsed = self
            .backend
            .analyze(case)
            .and_then(|raw| parse_stage_output(STAGE, &raw, RiskAssessment::validate));

        match parsed {
            Ok(assessment) => {
                audit.record(
                    record
                        .output(format!(
                            "classification={} risk_level={} confidence={:.2}",
                            assessment.classification, assessment.risk_level, assessment.confidence_score
                        ))
                        .reasoning(assessment.reasoning.clone()),
                );
                (assessment, false)
            }
            Err(e) => {
                let reason = e.to_string();
                log::warn!(
                    "risk analyst: unusable output for case {}, substituting fallback: {reason}",
                    case.case_id
                );
                audit.record(
                    record
                        .reasoning(format!("JSON parsing failed: {reason}"))
                        .failed(reason.clone()),
                );
                (RiskAssessment::fallback(&reason), true)
            }
        }
    }
}

impl PipelineStage for RiskAnalystStage {
    fn name(&self) -> &'static str {
        "risk_analyst"
    }

    fn slot(&self) -> StageSlot {
        StageSlot::RiskAnalyst
    }

    fn applies_to(&self, state: CaseState) -> bool {
        state == CaseState::Screened
    }

    fn process(&mut self, ctx: &mut CaseContext, env: &mut StageEnv<'_>) -> SarResult<Vec<PipelineEvent>> {
        let (assessment, fallback) = self.analyze(&ctx.case, env.audit);

        log::info!(
            "case={} risk: {} {} (confidence {:.2}){}",
            ctx.seq,
            assessment.classification,
            assessment.risk_level,
            assessment.confidence_score,
            if fallback { " [fallback]" } else { "" }
        );

        let event = PipelineEvent::RiskAssessed {
            seq: ctx.seq,
            case_id: ctx.case.case_id.clone(),
            classification: assessment.classification,
            risk_level: assessment.risk_level,
            confidence_score: assessment.confidence_score,
            fallback,
        };
        ctx.assessment = Some(assessment);
        ctx.risk_fallback = fallback;
        Ok(vec![event])
    }
}

// ── Rule-based backend ───────────────────────────────────────────────────────

/// One detected pattern and how much it contributes to the risk score.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub classification: Classification,
    pub indicator: String,
    pub weight: f64,
}

/// Deterministic screening rules over the case's transactions.
/// Emits its assessment as a fenced JSON block, like a model would.
pub struct RuleBasedAnalyst {
    rules: RiskRuleConfig,
}

impl RuleBasedAnalyst {
    pub fn new(rules: RiskRuleConfig) -> Self {
        Self { rules }
    }

    pub fn findings(&self, case: &CaseData) -> Vec<Finding> {
        let mut out = Vec::new();
        out.extend(self.detect_structuring(case));
        out.extend(self.detect_velocity(case));
        out.extend(self.detect_rapid_movement(case));
        out.extend(self.detect_jurisdictions(case));
        out.extend(self.detect_round_amounts(case));
        match case.customer.risk_rating {
            RiskLevel::High => out.push(Finding {
                classification: Classification::Other,
                indicator: "customer risk rating High".into(),
                weight: 0.10,
            }),
            RiskLevel::Critical => out.push(Finding {
                classification: Classification::Other,
                indicator: "customer risk rating Critical".into(),
                weight: 0.20,
            }),
            _ => {}
        }
        out
    }

    /// Several cash deposits just under the CTR threshold.
    fn detect_structuring(&self, case: &CaseData) -> Option<Finding> {
        let r = &self.rules;
        let hits = case
            .transactions
            .iter()
            .filter(|t| t.is_cash() && t.amount >= r.structuring_floor && t.amount < r.ctr_threshold)
            .count();
        (hits >= r.structuring_min_count).then(|| Finding {
            classification: Classification::Structuring,
            indicator: format!(
                "{hits} cash deposits between {} and {}",
                format_usd(r.structuring_floor),
                format_usd(r.ctr_threshold)
            ),
            weight: 0.45,
        })
    }

    fn detect_velocity(&self, case: &CaseData) -> Option<Finding> {
        let r = &self.rules;
        let count = case.transactions.len();
        let volume = case.gross_volume();
        (count >= r.velocity_count && volume >= r.velocity_amount).then(|| Finding {
            classification: Classification::MoneyLaundering,
            indicator: format!("high velocity: {count} transactions moving {}", format_usd(volume)),
            weight: 0.30,
        })
    }

    /// A large deposit followed closely by a large outflow.
    fn detect_rapid_movement(&self, case: &CaseData) -> Option<Finding> {
        let r = &self.rules;
        let deposits = case
            .transactions
            .iter()
            .filter(|t| t.amount >= r.rapid_movement_amount)
            .filter_map(|t| t.date());
        let outflows: Vec<_> = case
            .transactions
            .iter()
            .filter(|t| t.amount <= -r.rapid_movement_amount)
            .filter_map(|t| t.date())
            .collect();

        let pairs = deposits
            .filter(|d| {
                outflows.iter().any(|o| {
                    let gap = (*o - *d).num_days();
                    (0..=r.rapid_movement_window_days).contains(&gap)
                })
            })
            .count();
        (pairs > 0).then(|| Finding {
            classification: Classification::MoneyLaundering,
            indicator: format!(
                "rapid movement: {pairs} deposit(s) of {} or more withdrawn within {} day(s)",
                format_usd(r.rapid_movement_amount),
                r.rapid_movement_window_days
            ),
            weight: 0.30,
        })
    }

    fn detect_jurisdictions(&self, case: &CaseData) -> Option<Finding> {
        let mut matched: Vec<&str> = Vec::new();
        for txn in &case.transactions {
            let haystack = format!(
                "{} {}",
                txn.counterparty.as_deref().unwrap_or_default(),
                txn.location.as_deref().unwrap_or_default()
            )
            .to_lowercase();
            for j in &self.rules.high_risk_jurisdictions {
                if haystack.contains(&j.to_lowercase()) && !matched.contains(&j.as_str()) {
                    matched.push(j.as_str());
                }
            }
        }
        (!matched.is_empty()).then(|| Finding {
            classification: Classification::Sanctions,
            indicator: format!("high-risk jurisdiction exposure: {}", matched.join(", ")),
            weight: 0.50,
        })
    }

    fn detect_round_amounts(&self, case: &CaseData) -> Option<Finding> {
        let round = case
            .transactions
            .iter()
            .filter(|t| t.amount.abs() >= 1_000.0 && (t.amount.abs() % 1_000.0) == 0.0)
            .count();
        (round >= 3).then(|| Finding {
            classification: Classification::Other,
            indicator: format!("{round} round-dollar transactions"),
            weight: 0.10,
        })
    }

    pub fn assess(&self, case: &CaseData) -> RiskAssessment {
        let findings = self.findings(case);
        let score: f64 = findings.iter().map(|f| f.weight).sum::<f64>().min(1.0);

        let classification = findings
            .iter()
            .filter(|f| f.classification != Classification::Other)
            .max_by(|a, b| a.weight.total_cmp(&b.weight))
            .map(|f| f.classification)
            .unwrap_or(Classification::Other);

        let risk_level = if score >= self.rules.critical_threshold {
            RiskLevel::Critical
        } else if score >= self.rules.high_threshold {
            RiskLevel::High
        } else if score >= 0.30 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let key_indicators: Vec<String> = if findings.is_empty() {
            vec!["no material indicators detected".into()]
        } else {
            findings.iter().map(|f| f.indicator.clone()).collect()
        };

        let mut reasoning = format!(
            "Reviewed {} transactions across {} account(s). {}. Classified as {} at {} risk.",
            case.transactions.len(),
            case.accounts.len(),
            key_indicators.join("; "),
            classification,
            risk_level
        );
        if let Some((idx, _)) = reasoning.char_indices().nth(crate::agent_output::REASONING_MAX_CHARS) {
            reasoning.truncate(idx);
        }

        RiskAssessment {
            classification,
            confidence_score: (score * 100.0).round() / 100.0,
            reasoning,
            key_indicators,
            risk_level,
        }
    }
}

impl RiskBackend for RuleBasedAnalyst {
    fn name(&self) -> &str {
        "rule_based"
    }

    fn analyze(&mut self, case: &CaseData) -> SarResult<String> {
        let json = serde_json::to_string_pretty(&self.assess(case))?;
        Ok(format!("```json\n{json}\n```"))
    }
}
