//! Decision gate: reviewers, one decision per case, lifecycle moves.

use chrono::{TimeZone, Utc};
use sar_core::{
    agent_output::{Classification, RiskAssessment},
    audit::AuditTrail,
    case::{CaseContext, CaseState},
    clock::PipelineClock,
    config::ReviewPolicyConfig,
    decision_gate_stage::{
        DecisionGateStage, DecisionOutcome, InteractiveReviewer, PolicyReviewer, Reviewer,
        ScriptedReviewer,
    },
    error::SarError,
    rng::{StageRng, StageSlot},
    schema::{
        AccountData, AccountStatus, AccountType, CaseData, CustomerData, RiskLevel, SsnLast4,
        TransactionData,
    },
    stage::{PipelineStage, StageEnv},
    store::SarStore,
};
use std::collections::BTreeMap;
use std::io::Cursor;

const RUN: &str = "gate-test";

fn clock() -> PipelineClock {
    PipelineClock::fixed(Utc.with_ymd_and_hms(2024, 12, 19, 12, 0, 0).unwrap())
}

fn case(customer_id: &str, case_id: &str) -> CaseData {
    let customer = CustomerData {
        customer_id: customer_id.into(),
        name: "Ava Lind".into(),
        date_of_birth: "1982-02-02".into(),
        ssn_last_4: SsnLast4::new("9012"),
        address: "8 Pine St".into(),
        customer_since: "2018-03-03".into(),
        risk_rating: RiskLevel::High,
        phone: None,
        occupation: None,
        annual_income: None,
    };
    let account = AccountData {
        account_id: format!("ACC_{customer_id}"),
        customer_id: customer_id.into(),
        account_type: AccountType::Savings,
        opening_date: "2018-03-03".into(),
        current_balance: 10.0,
        average_monthly_balance: 10.0,
        status: AccountStatus::Active,
    };
    let txn = TransactionData {
        transaction_id: format!("T_{customer_id}"),
        account_id: format!("ACC_{customer_id}"),
        transaction_date: "2024-11-01".into(),
        transaction_type: "Cash_Deposit".into(),
        amount: 9500.00,
        description: "Cash deposit".into(),
        method: "Teller".into(),
        counterparty: None,
        location: None,
    };
    CaseData::new(case_id.into(), customer, vec![account], vec![txn], clock().now(), BTreeMap::new()).unwrap()
}

fn assessment(level: RiskLevel, confidence: f64) -> RiskAssessment {
    RiskAssessment {
        classification: Classification::Structuring,
        confidence_score: confidence,
        reasoning: "Repeated deposits under the threshold.".into(),
        key_indicators: vec!["cash deposits under $10,000".into()],
        risk_level: level,
    }
}

fn store_with(cases: &[&CaseContext]) -> SarStore {
    let store = SarStore::in_memory().unwrap();
    store.migrate().unwrap();
    store.insert_run(RUN, 1, "test", "2024-12-19T12:00:00+00:00").unwrap();
    for ctx in cases {
        store
            .insert_case(RUN, ctx.case_id(), ctx.seq, &ctx.case.customer.customer_id, "2024-12-19T12:00:00+00:00")
            .unwrap();
    }
    store
}

fn screened(seq: u64, customer_id: &str, a: RiskAssessment) -> CaseContext {
    let mut ctx = CaseContext::new(seq, case(customer_id, &format!("case-{seq}")));
    ctx.assessment = Some(a);
    ctx
}

#[test]
fn policy_reviewer_applies_level_and_confidence() {
    let mut reviewer = PolicyReviewer::new(ReviewPolicyConfig::default());
    let c = case("CUST_1", "c1");

    let approve = reviewer.review(&c, &assessment(RiskLevel::High, 0.75)).unwrap();
    assert_eq!(approve.outcome, DecisionOutcome::Approve);

    let low_conf = reviewer.review(&c, &assessment(RiskLevel::Critical, 0.65)).unwrap();
    assert_eq!(low_conf.outcome, DecisionOutcome::Reject);

    let medium = reviewer.review(&c, &assessment(RiskLevel::Medium, 0.95)).unwrap();
    assert_eq!(medium.outcome, DecisionOutcome::Reject);
}

#[test]
fn fallback_assessment_is_never_auto_approved() {
    let policy = ReviewPolicyConfig {
        approve_levels: vec![RiskLevel::Low, RiskLevel::Medium, RiskLevel::High, RiskLevel::Critical],
        min_confidence: 0.0,
    };
    let mut reviewer = PolicyReviewer::new(policy);
    let verdict = reviewer
        .review(&case("CUST_1", "c1"), &RiskAssessment::fallback("bad json"))
        .unwrap();
    assert_eq!(verdict.outcome, DecisionOutcome::Reject);
}

#[test]
fn scripted_reviewer_rejects_unknown_customers() {
    let mut reviewer = ScriptedReviewer::default().with("CUST_1", DecisionOutcome::Approve);
    let a = assessment(RiskLevel::Low, 0.1);
    assert_eq!(reviewer.review(&case("CUST_1", "c1"), &a).unwrap().outcome, DecisionOutcome::Approve);
    assert_eq!(reviewer.review(&case("CUST_2", "c2"), &a).unwrap().outcome, DecisionOutcome::Reject);
}

#[test]
fn scripted_decisions_load_from_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("decisions.json");
    std::fs::write(
        &path,
        r#"{"CUST_1": {"decision": "APPROVE", "note": "confirmed by analyst"},
            "CUST_2": {"decision": "REJECT"}}"#,
    )
    .unwrap();
    let mut reviewer = ScriptedReviewer::from_file(&path).unwrap();
    let a = assessment(RiskLevel::High, 0.9);
    let v = reviewer.review(&case("CUST_1", "c1"), &a).unwrap();
    assert_eq!(v.outcome, DecisionOutcome::Approve);
    assert_eq!(v.rationale, "confirmed by analyst");
    assert_eq!(reviewer.review(&case("CUST_2", "c2"), &a).unwrap().outcome, DecisionOutcome::Reject);
}

#[test]
fn interactive_reviewer_reads_answers() {
    let input = Cursor::new("maybe\ny structuring pattern confirmed\n");
    let mut out = Vec::new();
    let mut reviewer = InteractiveReviewer::new(input, &mut out);
    let v = reviewer.review(&case("CUST_1", "c1"), &assessment(RiskLevel::High, 0.8)).unwrap();
    assert_eq!(v.outcome, DecisionOutcome::Approve);
    assert_eq!(v.rationale, "structuring pattern confirmed");
    drop(reviewer);

    let shown = String::from_utf8(out).unwrap();
    assert!(shown.contains("please answer y or n"));
    assert!(shown.contains("Structuring"));
}

#[test]
fn interactive_reviewer_rejects_on_end_of_input() {
    let mut reviewer = InteractiveReviewer::new(Cursor::new(""), Vec::new());
    let v = reviewer.review(&case("CUST_1", "c1"), &assessment(RiskLevel::High, 0.8)).unwrap();
    assert_eq!(v.outcome, DecisionOutcome::Reject);
}

#[test]
fn decision_is_recorded_once_and_moves_the_case() {
    let mut ctx = screened(1, "CUST_1", assessment(RiskLevel::High, 0.8));
    let store = store_with(&[&ctx]);
    let mut audit = AuditTrail::in_memory(RUN.into(), clock(), StageRng::new(3, StageSlot::Audit as u64));
    let mut rng = StageRng::new(3, StageSlot::DecisionGate as u64);
    let mut gate = DecisionGateStage::new(Box::new(PolicyReviewer::new(ReviewPolicyConfig::default())));

    let mut env = StageEnv { run_id: RUN, store: &store, audit: &mut audit, rng: &mut rng, clock: clock() };
    let events = gate.process(&mut ctx, &mut env).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(ctx.state(), CaseState::Approved);

    let second = gate.decide(&mut ctx, &mut env);
    assert!(matches!(second, Err(SarError::DuplicateDecision { .. })));

    assert_eq!(store.case_state(ctx.case_id()).unwrap(), Some(CaseState::Approved));
    let row = store.decision_for_case(ctx.case_id()).unwrap().unwrap();
    assert_eq!(row.outcome, DecisionOutcome::Approve);
    assert_eq!(row.confidence_score, 0.8);

    let reviews: Vec<_> = audit
        .entries()
        .iter()
        .filter(|e| e.agent_type == "HumanReviewer" && e.action == "review_case")
        .collect();
    assert_eq!(reviews.len(), 1, "the second decision must not reach the audit trail");
}

#[test]
fn rejection_is_terminal() {
    let mut ctx = screened(1, "CUST_1", assessment(RiskLevel::Low, 0.2));
    let store = store_with(&[&ctx]);
    let mut audit = AuditTrail::in_memory(RUN.into(), clock(), StageRng::new(3, StageSlot::Audit as u64));
    let mut rng = StageRng::new(3, StageSlot::DecisionGate as u64);
    let mut gate = DecisionGateStage::new(Box::new(PolicyReviewer::new(ReviewPolicyConfig::default())));
    let mut env = StageEnv { run_id: RUN, store: &store, audit: &mut audit, rng: &mut rng, clock: clock() };

    gate.process(&mut ctx, &mut env).unwrap();
    assert_eq!(ctx.state(), CaseState::Rejected);
    assert!(ctx.state().is_terminal());
    assert!(ctx.transition(CaseState::Filed).is_err());
    assert!(!gate.applies_to(ctx.state()));
}

#[test]
fn store_refuses_a_second_decision_from_another_gate() {
    let mut ctx = screened(1, "CUST_1", assessment(RiskLevel::High, 0.9));
    let store = store_with(&[&ctx]);
    let mut audit = AuditTrail::in_memory(RUN.into(), clock(), StageRng::new(3, StageSlot::Audit as u64));
    let mut rng = StageRng::new(3, StageSlot::DecisionGate as u64);
    let mut env = StageEnv { run_id: RUN, store: &store, audit: &mut audit, rng: &mut rng, clock: clock() };

    let mut first = DecisionGateStage::new(Box::new(PolicyReviewer::new(ReviewPolicyConfig::default())));
    first.decide(&mut ctx, &mut env).unwrap();

    // A fresh context for the same case, as a replayed run would build.
    let mut replay = screened(1, "CUST_1", assessment(RiskLevel::High, 0.9));
    let mut second = DecisionGateStage::new(Box::new(ScriptedReviewer::default()));
    let err = second.decide(&mut replay, &mut env).unwrap_err();
    assert!(matches!(err, SarError::DuplicateDecision { .. }));
    assert_eq!(replay.state(), CaseState::Screened);
}
