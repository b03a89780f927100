//! Structured outputs of the two analysis stages, and the extraction of
//! a JSON object from a backend's raw text response.

use crate::{
    error::{SarError, SarResult},
    schema::RiskLevel,
};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const REASONING_MAX_CHARS: usize = 500;
pub const NARRATIVE_MAX_CHARS: usize = 1000;
pub const MANUAL_REVIEW_MARKER: &str = "MANUAL_REVIEW_REQUIRED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    Structuring,
    Sanctions,
    Fraud,
    #[serde(rename = "Money_Laundering")]
    MoneyLaundering,
    Other,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structuring => "Structuring",
            Self::Sanctions => "Sanctions",
            Self::Fraud => "Fraud",
            Self::MoneyLaundering => "Money_Laundering",
            Self::Other => "Other",
        }
    }

    /// Short description used in narratives and reports.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Structuring => "transactions designed to avoid reporting thresholds",
            Self::Sanctions => "potential sanctions violations or prohibited parties",
            Self::Fraud => "fraudulent transactions or identity-related crimes",
            Self::MoneyLaundering => "complex schemes to obscure illicit fund sources",
            Self::Other => "suspicious patterns not fitting standard categories",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Risk assessment ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub classification: Classification,
    pub confidence_score: f64,
    pub reasoning: String,
    pub key_indicators: Vec<String>,
    pub risk_level: RiskLevel,
}

impl RiskAssessment {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(format!(
                "confidence_score must be between 0.0 and 1.0, got {}",
                self.confidence_score
            ));
        }
        check_text("reasoning", &self.reasoning, REASONING_MAX_CHARS)?;
        if self.key_indicators.is_empty() {
            return Err("key_indicators must list at least one indicator".into());
        }
        Ok(())
    }

    /// Substitute used when the backend output cannot be used.
    /// Never auto-approvable: the marker indicator routes it to a human.
    pub fn fallback(reason: &str) -> Self {
        let mut reasoning = format!("AUTOMATED ANALYSIS FAILED: {reason}. Manual review required.");
        truncate_chars(&mut reasoning, REASONING_MAX_CHARS);
        Self {
            classification: Classification::Other,
            confidence_score: 0.0,
            reasoning,
            key_indicators: vec![MANUAL_REVIEW_MARKER.to_string()],
            risk_level: RiskLevel::Medium,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.key_indicators.iter().any(|k| k == MANUAL_REVIEW_MARKER)
    }
}

// ── Compliance narrative ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceNarrative {
    pub narrative: String,
    pub narrative_reasoning: String,
    pub regulatory_citations: Vec<String>,
    pub completeness_check: bool,
}

impl ComplianceNarrative {
    pub fn validate(&self) -> Result<(), String> {
        check_text("narrative", &self.narrative, NARRATIVE_MAX_CHARS)?;
        check_text(
            "narrative_reasoning",
            &self.narrative_reasoning,
            REASONING_MAX_CHARS,
        )?;
        if self.regulatory_citations.is_empty() {
            return Err("regulatory_citations must list at least one regulation".into());
        }
        Ok(())
    }

    /// Placeholder narrative that keeps the case moving to human review.
    pub fn fallback(customer_name: &str, reason: &str) -> Self {
        let mut narrative_reasoning =
            format!("AUTOMATED GENERATION FAILED. Error: {reason}. Proceeding to manual review.");
        truncate_chars(&mut narrative_reasoning, REASONING_MAX_CHARS);
        Self {
            narrative: format!(
                "System Error: Unable to generate SAR narrative for Customer {customer_name}. \
                 Manual Compliance Officer review is required."
            ),
            narrative_reasoning,
            regulatory_citations: vec![MANUAL_REVIEW_MARKER.to_string()],
            completeness_check: false,
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn check_text(field: &str, value: &str, max_chars: usize) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} cannot be empty"));
    }
    let len = value.chars().count();
    if len > max_chars {
        return Err(format!("{field} exceeds {max_chars} characters ({len})"));
    }
    Ok(())
}

fn truncate_chars(s: &mut String, max_chars: usize) {
    if let Some((idx, _)) = s.char_indices().nth(max_chars) {
        s.truncate(idx);
    }
}

/// Pull the JSON object out of a raw response.
///
/// Lines opening or closing a fenced code block are dropped, then the
/// span from the first `{` to the last `}` is returned.
pub fn extract_json(stage: &'static str, raw: &str) -> SarResult<String> {
    if raw.trim().is_empty() {
        return Err(SarError::stage_output(stage, "No JSON content found in response"));
    }
    let cleaned: String = if raw.contains("```") {
        raw.lines()
            .filter(|line| !line.trim_start().starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        raw.to_string()
    };
    match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => Ok(cleaned[start..=end].to_string()),
        _ => Err(SarError::stage_output(stage, "No JSON content found")),
    }
}

/// Extract, parse and validate a stage output in one step.
pub fn parse_stage_output<T, F>(stage: &'static str, raw: &str, validate: F) -> SarResult<T>
where
    T: serde::de::DeserializeOwned,
    F: FnOnce(&T) -> Result<(), String>,
{
    let json = extract_json(stage, raw)?;
    let parsed: T = serde_json::from_str(&json)
        .map_err(|e| SarError::stage_output(stage, format!("invalid JSON: {e}")))?;
    validate(&parsed).map_err(|reason| SarError::stage_output(stage, reason))?;
    Ok(parsed)
}
