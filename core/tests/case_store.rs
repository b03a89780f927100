//! Case ledger: lifecycle enforcement and the append-only decision table.

use chrono::{TimeZone, Utc};
use sar_core::{
    case::CaseState,
    decision_gate_stage::{Decision, DecisionOutcome},
    error::SarError,
    store::SarStore,
};

const RUN: &str = "store-test";
const AT: &str = "2024-12-19T12:00:00+00:00";

fn decision(case_id: &str, outcome: DecisionOutcome) -> Decision {
    Decision {
        case_id: case_id.into(),
        outcome,
        confidence_score: 0.8,
        reviewer: "policy_reviewer".into(),
        rationale: "High risk".into(),
        decided_at: Utc.with_ymd_and_hms(2024, 12, 19, 12, 0, 0).unwrap(),
    }
}

fn seeded(store: &SarStore) {
    store.migrate().unwrap();
    store.insert_run(RUN, 1, "test", AT).unwrap();
    store.insert_case(RUN, "case-1", 1, "CUST_1", AT).unwrap();
    store.insert_case(RUN, "case-2", 2, "CUST_2", AT).unwrap();
}

#[test]
fn lifecycle_moves_are_enforced() {
    let store = SarStore::in_memory().unwrap();
    seeded(&store);

    assert_eq!(store.case_state("case-1").unwrap(), Some(CaseState::Screened));
    let skip = store.update_case_state("case-1", CaseState::Filed, AT);
    assert!(matches!(skip, Err(SarError::InvalidTransition { .. })));

    store.update_case_state("case-1", CaseState::Approved, AT).unwrap();
    store.update_case_state("case-1", CaseState::Filed, AT).unwrap();
    store.update_case_state("case-2", CaseState::Rejected, AT).unwrap();

    let reopen = store.update_case_state("case-2", CaseState::Approved, AT);
    assert!(matches!(reopen, Err(SarError::InvalidTransition { .. })));
    let missing = store.update_case_state("case-404", CaseState::Approved, AT);
    assert!(matches!(missing, Err(SarError::CaseNotFound { .. })));

    let rows = store.cases_for_run(RUN).unwrap();
    assert_eq!(rows.iter().map(|r| r.state).collect::<Vec<_>>(), vec![CaseState::Filed, CaseState::Rejected]);
    assert_eq!(store.case_count(RUN, CaseState::Filed).unwrap(), 1);
}

#[test]
fn one_decision_per_case() {
    let store = SarStore::in_memory().unwrap();
    seeded(&store);

    store.insert_decision(RUN, &decision("case-1", DecisionOutcome::Approve)).unwrap();
    let again = store.insert_decision(RUN, &decision("case-1", DecisionOutcome::Reject));
    assert!(matches!(again, Err(SarError::DuplicateDecision { .. })));

    let row = store.decision_for_case("case-1").unwrap().unwrap();
    assert_eq!(row.outcome, DecisionOutcome::Approve);
    assert_eq!(store.decision_count(RUN, DecisionOutcome::Approve).unwrap(), 1);
    assert_eq!(store.decision_count(RUN, DecisionOutcome::Reject).unwrap(), 0);
    assert!(store.decision_for_case("case-2").unwrap().is_none());
}

#[test]
fn decisions_cannot_be_changed_in_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let path_str = path.to_str().unwrap();

    let store = SarStore::open(path_str).unwrap();
    seeded(&store);
    store.insert_decision(RUN, &decision("case-1", DecisionOutcome::Reject)).unwrap();

    // Bypass the store: the schema itself must refuse edits.
    let conn = rusqlite::Connection::open(&path).unwrap();
    let update = conn.execute("UPDATE decision SET outcome = 'APPROVE' WHERE case_id = 'case-1'", []);
    assert!(update.is_err(), "decision update must be refused");
    let delete = conn.execute("DELETE FROM decision WHERE case_id = 'case-1'", []);
    assert!(delete.is_err(), "decision delete must be refused");
    drop(conn);

    let row = store.decision_for_case("case-1").unwrap().unwrap();
    assert_eq!(row.outcome, DecisionOutcome::Reject);
}

#[test]
fn decisions_need_a_known_case() {
    let store = SarStore::in_memory().unwrap();
    seeded(&store);
    let orphan = store.insert_decision(RUN, &decision("case-404", DecisionOutcome::Approve));
    assert!(matches!(orphan, Err(SarError::Database(_))));
}
