//! Audit trail: JSONL append-only behaviour across runs.

use chrono::{TimeZone, Utc};
use sar_core::{
    audit::{read_audit_file, AuditRecord, AuditTrail, AUDIT_FILE_NAME},
    clock::PipelineClock,
    rng::{StageRng, StageSlot},
};
use std::time::Instant;

fn clock() -> PipelineClock {
    PipelineClock::fixed(Utc.with_ymd_and_hms(2024, 12, 19, 12, 0, 0).unwrap())
}

fn open(dir: &std::path::Path, run_id: &str, seed: u64) -> AuditTrail {
    AuditTrail::open(dir, run_id.into(), clock(), StageRng::new(seed, StageSlot::Audit as u64)).unwrap()
}

#[test]
fn entries_from_earlier_runs_are_kept() {
    let dir = tempfile::tempdir().unwrap();

    let mut first = open(dir.path(), "run-a", 1);
    first.record(
        AuditRecord::new("RiskAnalyst", "analyze_case", "case-1", Instant::now())
            .input("3 transactions")
            .output("Structuring/High")
            .reasoning("deposits under threshold"),
    );
    first.record(AuditRecord::new("SarFiler", "file_sar", "case-1", Instant::now()));
    drop(first);

    let mut second = open(dir.path(), "run-b", 2);
    second.record(
        AuditRecord::new("ComplianceOfficer", "generate_narrative_fallback", "case-9", Instant::now())
            .failed("narrative exceeds 120 word limit"),
    );

    let entries = read_audit_file(&dir.path().join(AUDIT_FILE_NAME)).unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].run_id, "run-a");
    assert_eq!(entries[0].input_summary, "3 transactions");
    assert_eq!(entries[0].reasoning, "deposits under threshold");
    assert_eq!(entries[2].run_id, "run-b");
    assert!(!entries[2].success);
    assert_eq!(entries[2].error_message.as_deref(), Some("narrative exceeds 120 word limit"));

    // The in-memory view holds only this run's entries.
    assert_eq!(second.entries().len(), 1);
    assert_eq!(second.path(), Some(dir.path().join(AUDIT_FILE_NAME).as_path()));
}

#[test]
fn log_ids_are_unique_and_seeded() {
    let mut a = AuditTrail::in_memory("r".into(), clock(), StageRng::new(11, StageSlot::Audit as u64));
    let mut b = AuditTrail::in_memory("r".into(), clock(), StageRng::new(11, StageSlot::Audit as u64));

    let ids_a: Vec<_> = (0..5)
        .map(|_| a.record(AuditRecord::new("DataLoader", "create_case", "c", Instant::now())))
        .collect();
    let ids_b: Vec<_> = (0..5)
        .map(|_| b.record(AuditRecord::new("DataLoader", "create_case", "c", Instant::now())))
        .collect();

    assert_eq!(ids_a, ids_b);
    let mut unique = ids_a.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 5);

    // A frozen clock records zero elapsed time so replays match exactly.
    assert!(a.entries().iter().all(|e| e.execution_time_ms == 0.0));
    assert!(a.path().is_none());
}

#[test]
fn entries_can_be_filtered_by_case() {
    let mut trail = AuditTrail::in_memory("r".into(), clock(), StageRng::new(3, StageSlot::Audit as u64));
    trail.record(AuditRecord::new("RiskAnalyst", "analyze_case", "case-1", Instant::now()));
    trail.record(AuditRecord::new("RiskAnalyst", "analyze_case", "case-2", Instant::now()));
    trail.record(AuditRecord::new("HumanReviewer", "review_case", "case-1", Instant::now()));

    let actions: Vec<_> = trail.entries_for_case("case-1").map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["analyze_case", "review_case"]);
}
