use crate::schema::RiskLevel;
use serde::{Deserialize, Serialize};

// ── Cost model ─────────────────────────────────────────────────────

/// Per-case cost of running each stage, in dollars.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub risk_stage_cost: f64,
    pub compliance_stage_cost: f64,
}

impl CostModel {
    /// Cost of running both stages on one case.
    pub fn per_case_full(&self) -> f64 {
        self.risk_stage_cost + self.compliance_stage_cost
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            risk_stage_cost: 0.15,
            compliance_stage_cost: 0.45,
        }
    }
}

// ── Rule-based risk analyst ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskRuleConfig {
    /// Cash amount that triggers a currency transaction report.
    pub ctr_threshold: f64,
    /// Lower bound of the "just under CTR" band.
    pub structuring_floor: f64,
    /// Deposits in the band needed to flag structuring.
    pub structuring_min_count: usize,
    pub velocity_amount: f64,
    pub velocity_count: usize,
    pub rapid_movement_amount: f64,
    pub rapid_movement_window_days: i64,
    /// Matched case-insensitively against counterparty and location.
    pub high_risk_jurisdictions: Vec<String>,
    /// Score at which the assessed level becomes High.
    pub high_threshold: f64,
    /// Score at which the assessed level becomes Critical.
    pub critical_threshold: f64,
}

impl Default for RiskRuleConfig {
    fn default() -> Self {
        Self {
            ctr_threshold: 10_000.0,
            structuring_floor: 9_000.0,
            structuring_min_count: 3,
            velocity_amount: 50_000.0,
            velocity_count: 10,
            rapid_movement_amount: 5_000.0,
            rapid_movement_window_days: 1,
            high_risk_jurisdictions: vec![
                "Iran".into(),
                "North Korea".into(),
                "Syria".into(),
                "Cuba".into(),
                "Myanmar".into(),
            ],
            high_threshold: 0.60,
            critical_threshold: 0.80,
        }
    }
}

// ── Decision gate ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewPolicyConfig {
    /// Risk levels the simulated reviewer will approve.
    pub approve_levels: Vec<RiskLevel>,
    /// Minimum analyst confidence for approval.
    pub min_confidence: f64,
}

impl Default for ReviewPolicyConfig {
    fn default() -> Self {
        Self {
            approve_levels: vec![RiskLevel::High, RiskLevel::Critical],
            min_confidence: 0.70,
        }
    }
}

// ── Compliance narrative ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    pub max_words: usize,
    /// Citations the template narrator attaches.
    pub citations: Vec<String>,
    /// Advisory or opinion language that fails a narrative outright.
    pub prohibited_phrases: Vec<String>,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            max_words: 120,
            citations: vec![
                "31 CFR 1020.320 (BSA)".into(),
                "12 CFR 21.11 (SAR Filing)".into(),
                "FinCEN SAR Instructions".into(),
            ],
            prohibited_phrases: [
                "warrant further investigation",
                "recommend review",
                "should be investigated",
                "please investigate",
                "we believe",
                "i believe",
                "we feel",
                "i feel",
                "opinion is",
                "suggest checking",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

// ── Top level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// How many customers the loader selects for screening.
    pub top_n: usize,
    #[serde(default)]
    pub cost_model: CostModel,
    #[serde(default)]
    pub risk_rules: RiskRuleConfig,
    #[serde(default)]
    pub review_policy: ReviewPolicyConfig,
    #[serde(default)]
    pub narrative: NarrativeConfig,
}

impl PipelineConfig {
    /// Load from `<data_dir>/pipeline.json`.
    /// In tests, use PipelineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/pipeline.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.check()?;
        Ok(config)
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            top_n: 5,
            cost_model: CostModel::default(),
            risk_rules: RiskRuleConfig::default(),
            review_policy: ReviewPolicyConfig::default(),
            narrative: NarrativeConfig::default(),
        }
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.top_n == 0 {
            anyhow::bail!("top_n must be at least 1");
        }
        if self.cost_model.risk_stage_cost < 0.0 || self.cost_model.compliance_stage_cost < 0.0 {
            anyhow::bail!("stage costs cannot be negative");
        }
        if !(0.0..=1.0).contains(&self.review_policy.min_confidence) {
            anyhow::bail!("review_policy.min_confidence must be within [0, 1]");
        }
        if self.risk_rules.high_threshold > self.risk_rules.critical_threshold {
            anyhow::bail!("risk_rules.high_threshold must not exceed critical_threshold");
        }
        Ok(())
    }
}
