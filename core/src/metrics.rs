//! Run metrics and cost avoidance.
//!
//! Baseline: both stages run on every screened case.
//! Actual: stage 1 runs on every case, stage 2 only on approved ones.

use crate::{
    case::{CaseContext, CaseState},
    config::CostModel,
    error::SarResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const REPORT_FILE_NAME: &str = "metrics_report.md";

/// `$1,234,567.89`; negatives as `-$12.00`.
pub fn format_usd(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub per_case_full: f64,
    pub theoretical_cost: f64,
    pub actual_cost: f64,
    pub net_savings: f64,
    /// Fraction of the baseline avoided, in [0, 1].
    pub cost_reduction: f64,
}

impl CostSummary {
    pub fn compute(total: usize, approved: usize, model: &CostModel) -> Self {
        let per_case_full = model.per_case_full();
        let theoretical_cost = total as f64 * per_case_full;
        let actual_cost =
            total as f64 * model.risk_stage_cost + approved as f64 * model.compliance_stage_cost;
        let net_savings = theoretical_cost - actual_cost;
        Self {
            per_case_full,
            theoretical_cost,
            actual_cost,
            net_savings,
            cost_reduction: ratio(net_savings, theoretical_cost),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub total_cases: usize,
    pub approved: usize,
    pub rejected: usize,
    pub filed: usize,
    pub risk_fallbacks: usize,
    pub narrative_fallbacks: usize,
    pub load_failures: usize,
    pub approval_rate: f64,
    pub rejection_rate: f64,
    pub cost: CostSummary,
}

impl PipelineMetrics {
    /// Metrics from raw counts. `approved` counts every case that passed
    /// the gate, filed or not.
    pub fn compute(total: usize, approved: usize, rejected: usize, filed: usize, model: &CostModel) -> Self {
        Self {
            total_cases: total,
            approved,
            rejected,
            filed,
            risk_fallbacks: 0,
            narrative_fallbacks: 0,
            load_failures: 0,
            approval_rate: ratio(approved as f64, total as f64),
            rejection_rate: ratio(rejected as f64, total as f64),
            cost: CostSummary::compute(total, approved, model),
        }
    }

    pub fn from_cases(cases: &[CaseContext], load_failures: usize, model: &CostModel) -> Self {
        let approved = cases
            .iter()
            .filter(|c| matches!(c.state(), CaseState::Approved | CaseState::Filed))
            .count();
        let rejected = cases.iter().filter(|c| c.state() == CaseState::Rejected).count();
        let filed = cases.iter().filter(|c| c.state() == CaseState::Filed).count();

        let mut m = Self::compute(cases.len(), approved, rejected, filed, model);
        m.risk_fallbacks = cases.iter().filter(|c| c.risk_fallback).count();
        m.narrative_fallbacks = cases.iter().filter(|c| c.narrative_fallback).count();
        m.load_failures = load_failures;
        m
    }

    pub fn render_markdown(&self, run_id: &str, generated_at: DateTime<Utc>) -> String {
        let c = &self.cost;
        format!(
            "# SAR Pipeline Metrics Report\n\
             \n\
             - Run: `{run_id}`\n\
             - Generated: {generated}\n\
             \n\
             ## Case Outcomes\n\
             \n\
             | Metric | Value |\n\
             |---|---|\n\
             | Cases screened | {total} |\n\
             | Approved | {approved} |\n\
             | Rejected | {rejected} |\n\
             | SARs filed | {filed} |\n\
             | Approval rate | {approval_rate:.1}% |\n\
             | Rejection rate | {rejection_rate:.1}% |\n\
             | Risk analysis fallbacks | {risk_fallbacks} |\n\
             | Narrative fallbacks | {narrative_fallbacks} |\n\
             | Records skipped at load | {load_failures} |\n\
             \n\
             ## Cost Avoidance\n\
             \n\
             | Metric | Value |\n\
             |---|---|\n\
             | Cost per case (both stages) | {per_case} |\n\
             | Theoretical cost (all cases, both stages) | {theoretical} |\n\
             | Actual cost (two-stage gate) | {actual} |\n\
             | Net savings | {savings} |\n\
             | Cost reduction | {reduction:.1}% |\n\
             \n\
             Compliance narratives were generated for {approved} of {total} screened cases; \
             the remaining {stopped} were stopped at the decision gate.\n",
            generated = generated_at.to_rfc3339(),
            total = self.total_cases,
            approved = self.approved,
            rejected = self.rejected,
            filed = self.filed,
            approval_rate = self.approval_rate * 100.0,
            rejection_rate = self.rejection_rate * 100.0,
            risk_fallbacks = self.risk_fallbacks,
            narrative_fallbacks = self.narrative_fallbacks,
            load_failures = self.load_failures,
            per_case = format_usd(c.per_case_full),
            theoretical = format_usd(c.theoretical_cost),
            actual = format_usd(c.actual_cost),
            savings = format_usd(c.net_savings),
            reduction = c.cost_reduction * 100.0,
            stopped = self.total_cases.saturating_sub(self.approved),
        )
    }

    /// Write `<dir>/metrics_report.md`, replacing any earlier report.
    pub fn write_report(&self, dir: &Path, run_id: &str, generated_at: DateTime<Utc>) -> SarResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(REPORT_FILE_NAME);
        std::fs::write(&path, self.render_markdown(run_id, generated_at))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usd_grouping() {
        assert_eq!(format_usd(0.0), "$0.00");
        assert_eq!(format_usd(1.35), "$1.35");
        assert_eq!(format_usd(9_000.0), "$9,000.00");
        assert_eq!(format_usd(1_234_567.891), "$1,234,567.89");
        assert_eq!(format_usd(-250.5), "-$250.50");
    }

    #[test]
    fn empty_run_has_zero_rates() {
        let m = PipelineMetrics::compute(0, 0, 0, 0, &CostModel::default());
        assert_eq!(m.approval_rate, 0.0);
        assert_eq!(m.cost.cost_reduction, 0.0);
    }
}
