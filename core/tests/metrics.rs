//! Cost avoidance arithmetic and the markdown report.

use chrono::{TimeZone, Utc};
use sar_core::{
    config::CostModel,
    metrics::{format_usd, CostSummary, PipelineMetrics, REPORT_FILE_NAME},
};

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn two_of_five_approved() {
    let m = PipelineMetrics::compute(5, 2, 3, 2, &CostModel::default());
    assert!(close(m.approval_rate, 0.4));
    assert!(close(m.rejection_rate, 0.6));
    assert!(close(m.cost.per_case_full, 0.60));
    assert!(close(m.cost.theoretical_cost, 3.00));
    assert!(close(m.cost.actual_cost, 1.65));
    assert!(close(m.cost.net_savings, 1.35));
    assert!(close(m.cost.cost_reduction, 0.45));
}

#[test]
fn nothing_saved_when_everything_is_approved() {
    let c = CostSummary::compute(4, 4, &CostModel::default());
    assert!(close(c.theoretical_cost, c.actual_cost));
    assert!(close(c.cost_reduction, 0.0));
}

#[test]
fn custom_stage_costs_are_used() {
    let model = CostModel {
        risk_stage_cost: 1.0,
        compliance_stage_cost: 3.0,
    };
    let c = CostSummary::compute(10, 1, &model);
    assert!(close(c.theoretical_cost, 40.0));
    assert!(close(c.actual_cost, 13.0));
    assert!(close(c.cost_reduction, 0.675));
}

#[test]
fn report_shows_counts_costs_and_reduction() {
    let dir = tempfile::tempdir().unwrap();
    let at = Utc.with_ymd_and_hms(2024, 12, 19, 12, 0, 0).unwrap();
    let m = PipelineMetrics::compute(5, 2, 3, 2, &CostModel::default());

    let path = m.write_report(dir.path(), "run-42", at).unwrap();
    assert_eq!(path.file_name().and_then(|n| n.to_str()), Some(REPORT_FILE_NAME));

    let report = std::fs::read_to_string(&path).unwrap();
    assert!(report.contains("`run-42`"));
    assert!(report.contains("| Cases screened | 5 |"));
    assert!(report.contains("| Approval rate | 40.0% |"));
    assert!(report.contains(&format_usd(3.0)));
    assert!(report.contains("$1.65"));
    assert!(report.contains("$1.35"));
    assert!(report.contains("| Cost reduction | 45.0% |"));

    // A second write replaces the first.
    let empty = PipelineMetrics::compute(0, 0, 0, 0, &CostModel::default());
    empty.write_report(dir.path(), "run-43", at).unwrap();
    let report = std::fs::read_to_string(&path).unwrap();
    assert!(report.contains("`run-43`") && !report.contains("`run-42`"));
}

#[test]
fn report_layout_is_stable() {
    let at = Utc.with_ymd_and_hms(2024, 12, 19, 12, 0, 0).unwrap();
    let mut m = PipelineMetrics::compute(5, 2, 3, 2, &CostModel::default());
    m.load_failures = 1;
    let report = m.render_markdown("run-7", at);
    let lines: Vec<&str> = report.lines().collect();

    assert_eq!(lines[0], "# SAR Pipeline Metrics Report");
    assert_eq!(lines[2], "- Run: `run-7`");
    assert_eq!(lines[3], "- Generated: 2024-12-19T12:00:00+00:00");
    assert_eq!(lines[5], "## Case Outcomes");
    assert_eq!(lines[9], "| Cases screened | 5 |");
    assert_eq!(lines[17], "| Records skipped at load | 1 |");
    assert_eq!(lines[19], "## Cost Avoidance");
    assert_eq!(lines[23], "| Cost per case (both stages) | $0.60 |");
    assert_eq!(lines[24], "| Theoretical cost (all cases, both stages) | $3.00 |");
    assert_eq!(lines[25], "| Actual cost (two-stage gate) | $1.65 |");
    assert_eq!(lines[26], "| Net savings | $1.35 |");
    assert_eq!(lines[27], "| Cost reduction | 45.0% |");
    assert_eq!(
        lines.last().copied(),
        Some(
            "Compliance narratives were generated for 2 of 5 screened cases; \
             the remaining 3 were stopped at the decision gate."
        )
    );
    assert!(report.ends_with(".\n"));
    assert_eq!(lines.len(), 30);
}
