//! Compliance Officer stage: stage 2, approved cases only.
//!
//! Drafts the SAR narrative through its backend, then holds the draft
//! to the filing rules. Hard violations replace the draft with the
//! manual-review fallback; soft gaps are logged and the draft is kept.

use crate::{
    agent_output::{parse_stage_output, Classification, ComplianceNarrative, RiskAssessment},
    audit::{AuditRecord, AuditTrail},
    backend::NarrativeBackend,
    case::{CaseContext, CaseState},
    config::NarrativeConfig,
    error::{SarError, SarResult},
    event::PipelineEvent,
    metrics::format_usd,
    rng::StageSlot,
    schema::CaseData,
    stage::{PipelineStage, StageEnv},
};
use regex::Regex;
use std::time::Instant;

const STAGE: &str = "Compliance Officer";
const AGENT: &str = "ComplianceOfficer";

// ── Narrative rules ──────────────────────────────────────────────────────────

/// Outcome of checking a narrative. Errors block it, warnings do not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NarrativeCheck {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl NarrativeCheck {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Compiled filing rules for narratives.
pub struct NarrativeRules {
    max_words: usize,
    prohibited: Vec<String>,
    first_person: Regex,
    money: Regex,
    date: Regex,
}

impl NarrativeRules {
    pub fn new(config: &NarrativeConfig) -> SarResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| SarError::Other(anyhow::anyhow!("narrative rule {pattern}: {e}")))
        };
        Ok(Self {
            max_words: config.max_words,
            prohibited: config.prohibited_phrases.iter().map(|p| p.to_lowercase()).collect(),
            first_person: compile(r"(?i)(?:^|\s)(?:i|we)(?:\s|$)")?,
            money: compile(r"(?i)(\$\s?[\d,.]+|[\d,.]+\s?(?:USD|dollars?))")?,
            date: compile(
                r"(?i)\b((?:19|20)\d{2}|(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*|\d{1,2}[/-]\d{1,2}(?:[/-]\d{2,4})?)\b",
            )?,
        })
    }

    pub fn check(
        &self,
        narrative: &str,
        citations: &[String],
        customer_name: &str,
        indicators: &[String],
    ) -> NarrativeCheck {
        let mut out = NarrativeCheck::default();
        let lower = narrative.to_lowercase();

        for phrase in &self.prohibited {
            if lower.contains(phrase.as_str()) {
                out.errors.push(format!(
                    "prohibited advisory language: '{phrase}' (narratives must be factual)"
                ));
            }
        }
        if self.first_person.is_match(narrative) {
            out.errors.push("first-person language is not allowed in a narrative".into());
        }

        let words = narrative.split_whitespace().count();
        if words > self.max_words {
            out.errors.push(format!(
                "narrative exceeds {} word limit ({words} words)",
                self.max_words
            ));
        }
        let chars = narrative.chars().count();
        if chars > crate::agent_output::NARRATIVE_MAX_CHARS {
            out.errors.push(format!(
                "narrative exceeds {} characters ({chars})",
                crate::agent_output::NARRATIVE_MAX_CHARS
            ));
        }
        if citations.iter().all(|c| c.trim().is_empty()) {
            out.errors.push("regulatory citations list is empty".into());
        }

        if !narrative.contains(customer_name) {
            out.warnings.push(format!("narrative missing subject identity: '{customer_name}'"));
        }
        if !self.money.is_match(narrative) {
            out.warnings.push("narrative missing a specific monetary amount".into());
        }
        if !self.date.is_match(narrative) {
            out.warnings.push("narrative missing a timeframe or date".into());
        }
        if !indicators.is_empty() && !indicators.iter().any(|i| lower.contains(&i.to_lowercase())) {
            out.warnings.push("narrative does not mention any key risk indicator".into());
        }
        out
    }
}

// ── Stage ────────────────────────────────────────────────────────────────────

pub struct ComplianceStage {
    backend: Box<dyn NarrativeBackend>,
    rules: NarrativeRules,
}

impl ComplianceStage {
    pub fn new(backend: Box<dyn NarrativeBackend>, config: &NarrativeConfig) -> SarResult<Self> {
        Ok(Self {
            backend,
            rules: NarrativeRules::new(config)?,
        })
    }

    /// Draft the narrative for an approved case. Returns the narrative and
    /// whether the fallback was substituted. Refuses any other state.
    pub fn generate(
        &mut self,
        ctx: &CaseContext,
        audit: &mut AuditTrail,
    ) -> SarResult<(ComplianceNarrative, bool)> {
        if ctx.state() != CaseState::Approved {
            return Err(SarError::Other(anyhow::anyhow!(
                "case {} is {}; narratives are only generated for approved cases",
                ctx.case_id(),
                ctx.state()
            )));
        }
        let assessment = ctx.assessment.as_ref().ok_or_else(|| {
            SarError::Other(anyhow::anyhow!("case {} has no risk assessment", ctx.case_id()))
        })?;
        let case = &ctx.case;
        let started = Instant::now();

        let drafted = self
            .backend
            .draft(case, assessment)
            .and_then(|raw| parse_stage_output(STAGE, &raw, ComplianceNarrative::validate))
            .and_then(|n: ComplianceNarrative| {
                let check = self.rules.check(
                    &n.narrative,
                    &n.regulatory_citations,
                    &case.customer.name,
                    &assessment.key_indicators,
                );
                for w in &check.warnings {
                    log::warn!("compliance: case {}: {w}", case.case_id);
                }
                if check.is_valid() {
                    Ok(n)
                } else {
                    Err(SarError::stage_output(STAGE, check.errors.join("; ")))
                }
            });

        match drafted {
            Ok(narrative) => {
                audit.record(
                    AuditRecord::new(AGENT, "generate_narrative", &case.case_id, started)
                        .input(format!("risk_level={}", assessment.risk_level))
                        .output(format!(
                            "words={} citations={} complete={}",
                            narrative.narrative.split_whitespace().count(),
                            narrative.regulatory_citations.len(),
                            narrative.completeness_check
                        ))
                        .reasoning(narrative.narrative_reasoning.clone()),
                );
                Ok((narrative, false))
            }
            Err(e) => {
                let reason = e.to_string();
                log::warn!(
                    "compliance: unusable narrative for case {}, substituting fallback: {reason}",
                    case.case_id
                );
                audit.record(
                    AuditRecord::new(AGENT, "generate_narrative_fallback", &case.case_id, started)
                        .input(format!("customer_id={}", case.customer.customer_id))
                        .reasoning(format!("Fallback triggered due to: {reason}"))
                        .failed(reason.clone()),
                );
                Ok((ComplianceNarrative::fallback(&case.customer.name, &reason), true))
            }
        }
    }
}

impl PipelineStage for ComplianceStage {
    fn name(&self) -> &'static str {
        "compliance"
    }

    fn slot(&self) -> StageSlot {
        StageSlot::Compliance
    }

    fn applies_to(&self, state: CaseState) -> bool {
        state == CaseState::Approved
    }

    fn process(&mut self, ctx: &mut CaseContext, env: &mut StageEnv<'_>) -> SarResult<Vec<PipelineEvent>> {
        let (narrative, fallback) = self.generate(ctx, env.audit)?;
        let word_count = narrative.narrative.split_whitespace().count();
        log::info!(
            "case={} narrative: {word_count} words, complete={}{}",
            ctx.seq,
            narrative.completeness_check,
            if fallback { " [fallback]" } else { "" }
        );
        let event = PipelineEvent::NarrativeGenerated {
            seq: ctx.seq,
            case_id: ctx.case.case_id.clone(),
            word_count,
            completeness_check: narrative.completeness_check,
            fallback,
        };
        ctx.narrative = Some(narrative);
        ctx.narrative_fallback = fallback;
        Ok(vec![event])
    }
}

// ── Template backend ─────────────────────────────────────────────────────────

/// Drafts a short factual narrative from the case figures.
pub struct TemplateNarrator {
    config: NarrativeConfig,
}

impl TemplateNarrator {
    const MAX_INDICATORS: usize = 3;

    pub fn new(config: NarrativeConfig) -> Self {
        Self { config }
    }

    pub fn compose(&self, case: &CaseData, a: &RiskAssessment) -> ComplianceNarrative {
        let window = match case.activity_window() {
            Some((first, last)) if first == last => format!("on {first}"),
            Some((first, last)) => format!("between {first} and {last}"),
            None => "during the review period".to_string(),
        };
        let head = format!(
            "{} (customer {}) conducted {} transactions totalling {} {window} across {} account(s), \
             including {} in credits and {} in debits.",
            case.customer.name,
            case.customer.customer_id,
            case.transactions.len(),
            format_usd(case.gross_volume()),
            case.accounts.len(),
            format_usd(case.total_inflow()),
            format_usd(case.total_outflow()),
        );
        let pattern = match a.classification {
            Classification::Other => format!("The activity shows {}.", a.classification.describe()),
            c => format!(
                "The activity is consistent with {} ({}).",
                c.as_str().replace('_', " ").to_lowercase(),
                c.describe()
            ),
        };
        let tail = format!("Assessed risk level: {}.", a.risk_level);

        // Add indicators while the narrative stays within the word limit.
        let mut indicators: Vec<&str> = Vec::new();
        for ind in a.key_indicators.iter().take(Self::MAX_INDICATORS) {
            indicators.push(ind);
            let candidate = Self::assemble(&head, &pattern, &indicators, &tail);
            if candidate.split_whitespace().count() > self.config.max_words {
                indicators.pop();
                break;
            }
        }
        let narrative = Self::assemble(&head, &pattern, &indicators, &tail);

        ComplianceNarrative {
            narrative,
            narrative_reasoning: format!(
                "Drafted from {} transactions and the {} risk assessment ({} indicator(s)).",
                case.transactions.len(),
                a.classification,
                a.key_indicators.len()
            ),
            regulatory_citations: self.config.citations.clone(),
            completeness_check: !indicators.is_empty() && !a.is_fallback(),
        }
    }

    fn assemble(head: &str, pattern: &str, indicators: &[&str], tail: &str) -> String {
        if indicators.is_empty() {
            format!("{head} {pattern} {tail}")
        } else {
            format!("{head} {pattern} Indicators observed: {}. {tail}", indicators.join("; "))
        }
    }
}

impl NarrativeBackend for TemplateNarrator {
    fn name(&self) -> &str {
        "template"
    }

    fn draft(&mut self, case: &CaseData, assessment: &RiskAssessment) -> SarResult<String> {
        let json = serde_json::to_string_pretty(&self.compose(case, assessment))?;
        Ok(format!("```json\n{json}\n```"))
    }
}
