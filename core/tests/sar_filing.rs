//! SAR filer: eligibility, document contents, no overwrites.

use chrono::{TimeZone, Utc};
use sar_core::{
    agent_output::{Classification, ComplianceNarrative, RiskAssessment},
    audit::AuditTrail,
    case::{CaseContext, CaseState},
    clock::PipelineClock,
    decision_gate_stage::{Decision, DecisionOutcome},
    error::SarError,
    rng::{StageRng, StageSlot},
    sar_filer_stage::{SarDocument, SarFilerStage},
    schema::{
        AccountData, AccountStatus, AccountType, CaseData, CustomerData, RiskLevel, SsnLast4,
        TransactionData,
    },
    stage::StageEnv,
    store::SarStore,
};
use std::collections::BTreeMap;

const RUN: &str = "filer-test";

fn clock() -> PipelineClock {
    PipelineClock::fixed(Utc.with_ymd_and_hms(2024, 12, 19, 12, 0, 0).unwrap())
}

fn case() -> CaseData {
    let customer = CustomerData {
        customer_id: "CUST_2".into(),
        name: "Leila Farahani".into(),
        date_of_birth: "1985-09-02".into(),
        ssn_last_4: SsnLast4::new("0932"),
        address: "77 Harbor Point Rd".into(),
        customer_since: "2019-02-18".into(),
        risk_rating: RiskLevel::High,
        phone: None,
        occupation: None,
        annual_income: None,
    };
    let account = AccountData {
        account_id: "ACC_2".into(),
        customer_id: "CUST_2".into(),
        account_type: AccountType::BusinessChecking,
        opening_date: "2019-02-18".into(),
        current_balance: 31520.40,
        average_monthly_balance: 28410.75,
        status: AccountStatus::Active,
    };
    let wire = |id: &str, date: &str, amount: f64| TransactionData {
        transaction_id: id.into(),
        account_id: "ACC_2".into(),
        transaction_date: date.into(),
        transaction_type: "Wire_Transfer".into(),
        amount,
        description: "International wire".into(),
        method: "Wire".into(),
        counterparty: None,
        location: None,
    };
    CaseData::new(
        "case-2".into(),
        customer,
        vec![account],
        vec![wire("T1", "2024-10-14", 48250.00), wire("T2", "2024-10-15", -47900.00)],
        clock().now(),
        BTreeMap::new(),
    )
    .unwrap()
}

fn ready_to_file() -> CaseContext {
    let mut ctx = CaseContext::new(1, case());
    ctx.assessment = Some(RiskAssessment {
        classification: Classification::Sanctions,
        confidence_score: 0.9,
        reasoning: "Wire from a sanctioned jurisdiction moved out the next day.".into(),
        key_indicators: vec!["high-risk jurisdiction exposure: Iran".into()],
        risk_level: RiskLevel::Critical,
    });
    ctx.decision = Some(Decision {
        case_id: ctx.case.case_id.clone(),
        outcome: DecisionOutcome::Approve,
        confidence_score: 0.9,
        reviewer: "policy_reviewer".into(),
        rationale: "Critical risk".into(),
        decided_at: clock().now(),
    });
    ctx.narrative = Some(ComplianceNarrative {
        narrative: "Leila Farahani received $48,250.00 from Iran on 2024-10-14.".into(),
        narrative_reasoning: "Summarised the wire pair.".into(),
        regulatory_citations: vec!["31 CFR 1020.320 (BSA)".into()],
        completeness_check: true,
    });
    ctx.transition(CaseState::Approved).unwrap();
    ctx
}

fn store_for(ctx: &CaseContext) -> SarStore {
    let store = SarStore::in_memory().unwrap();
    store.migrate().unwrap();
    store.insert_run(RUN, 5, "test", "2024-12-19T12:00:00+00:00").unwrap();
    store
        .insert_case(RUN, ctx.case_id(), ctx.seq, &ctx.case.customer.customer_id, "2024-12-19T12:00:00+00:00")
        .unwrap();
    store
        .update_case_state(ctx.case_id(), CaseState::Approved, "2024-12-19T12:00:00+00:00")
        .unwrap();
    store
}

fn trail() -> AuditTrail {
    AuditTrail::in_memory(RUN.into(), clock(), StageRng::new(5, StageSlot::Audit as u64))
}

#[test]
fn approved_case_is_filed_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = ready_to_file();
    let store = store_for(&ctx);
    let mut audit = trail();
    let mut rng = StageRng::new(5, StageSlot::Filer as u64);
    let filings = dir.path().join("filings");
    let filer = SarFilerStage::new(&filings);

    let mut env = StageEnv { run_id: RUN, store: &store, audit: &mut audit, rng: &mut rng, clock: clock() };
    let filing = filer.file(&mut ctx, &mut env).unwrap();

    assert_eq!(ctx.state(), CaseState::Filed);
    assert!(filing.file_name.starts_with("SAR_") && filing.file_name.ends_with(".json"));
    assert!(filing.path.exists());

    let doc: SarDocument = serde_json::from_str(&std::fs::read_to_string(&filing.path).unwrap()).unwrap();
    assert_eq!(doc.sar_id, filing.sar_id);
    assert_eq!(doc.case_id, "case-2");
    assert_eq!(doc.customer_name, "Leila Farahani");
    assert_eq!(doc.suspicious_amount, 96150.00);
    assert_eq!(doc.risk_assessment.classification, Classification::Sanctions);
    assert_eq!(doc.activity_start.map(|d| d.to_string()).as_deref(), Some("2024-10-14"));

    assert_eq!(store.case_state("case-2").unwrap(), Some(CaseState::Filed));
    assert_eq!(store.filing_count(RUN).unwrap(), 1);

    // Filed is terminal: a second attempt is refused and writes nothing.
    let again = filer.file(&mut ctx, &mut env);
    assert!(matches!(again, Err(SarError::FilingRefused { .. })));
    assert_eq!(std::fs::read_dir(&filings).unwrap().count(), 1);
    assert!(audit.entries().iter().any(|e| e.agent_type == "SarFiler" && e.action == "file_sar"));
}

#[test]
fn unapproved_or_incomplete_cases_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let filings = dir.path().join("filings");
    let filer = SarFilerStage::new(&filings);

    let mut screened = CaseContext::new(1, case());
    let mut no_narrative = ready_to_file();
    no_narrative.narrative = None;
    let mut rejected_decision = ready_to_file();
    if let Some(d) = rejected_decision.decision.as_mut() {
        d.outcome = DecisionOutcome::Reject;
    }

    for ctx in [&mut screened, &mut no_narrative, &mut rejected_decision] {
        let store = store_for(&ready_to_file());
        let mut audit = trail();
        let mut rng = StageRng::new(5, StageSlot::Filer as u64);
        let mut env = StageEnv { run_id: RUN, store: &store, audit: &mut audit, rng: &mut rng, clock: clock() };
        let err = filer.file(ctx, &mut env).unwrap_err();
        assert!(matches!(err, SarError::FilingRefused { .. }), "unexpected error: {err}");
        assert_eq!(store.filing_count(RUN).unwrap(), 0);
    }
    assert!(!filings.exists(), "nothing may be written for a refused case");
}

#[test]
fn existing_document_is_never_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let filings = dir.path().join("filings");
    let mut ctx = ready_to_file();
    let store = store_for(&ctx);
    let mut audit = trail();

    // Same seed as the filer will use, so the first id collides.
    let sar_id = StageRng::new(5, StageSlot::Filer as u64).uuid();
    std::fs::create_dir_all(&filings).unwrap();
    let existing = filings.join(format!("SAR_{sar_id}.json"));
    std::fs::write(&existing, "{\"keep\": true}").unwrap();

    let mut rng = StageRng::new(5, StageSlot::Filer as u64);
    let mut env = StageEnv { run_id: RUN, store: &store, audit: &mut audit, rng: &mut rng, clock: clock() };
    let result = SarFilerStage::new(&filings).file(&mut ctx, &mut env);

    assert!(matches!(result, Err(SarError::Io(_))));
    assert_eq!(std::fs::read_to_string(&existing).unwrap(), "{\"keep\": true}");
    assert_eq!(ctx.state(), CaseState::Approved);
}

#[test]
fn failed_ledger_write_leaves_no_document() {
    let dir = tempfile::tempdir().unwrap();
    let filings = dir.path().join("filings");
    let mut ctx = ready_to_file();

    // The ledger still holds the case as screened, so the move to filed
    // is refused after the filing row went in.
    let store = SarStore::in_memory().unwrap();
    store.migrate().unwrap();
    store.insert_run(RUN, 5, "test", "2024-12-19T12:00:00+00:00").unwrap();
    store
        .insert_case(RUN, ctx.case_id(), ctx.seq, &ctx.case.customer.customer_id, "2024-12-19T12:00:00+00:00")
        .unwrap();

    let mut audit = trail();
    let mut rng = StageRng::new(5, StageSlot::Filer as u64);
    let mut env = StageEnv { run_id: RUN, store: &store, audit: &mut audit, rng: &mut rng, clock: clock() };
    let err = SarFilerStage::new(&filings).file(&mut ctx, &mut env).unwrap_err();

    assert!(matches!(err, SarError::InvalidTransition { .. }), "unexpected error: {err}");
    assert_eq!(store.filing_count(RUN).unwrap(), 0, "filing row must roll back");
    assert_eq!(store.case_state("case-2").unwrap(), Some(CaseState::Screened));
    assert_eq!(std::fs::read_dir(&filings).unwrap().count(), 0, "orphan document left behind");
    assert_eq!(ctx.state(), CaseState::Approved);
    assert!(ctx.filing.is_none());
    assert!(audit.entries().iter().all(|e| e.action != "file_sar"));

    // The unknown-case path fails on the foreign key instead.
    let mut other = ready_to_file();
    other.case.case_id = "case-404".into();
    let mut rng = StageRng::new(6, StageSlot::Filer as u64);
    let mut env = StageEnv { run_id: RUN, store: &store, audit: &mut audit, rng: &mut rng, clock: clock() };
    let err = SarFilerStage::new(&filings).file(&mut other, &mut env).unwrap_err();
    assert!(matches!(err, SarError::Database(_)), "unexpected error: {err}");
    assert_eq!(std::fs::read_dir(&filings).unwrap().count(), 0);
}
