use super::SarStore;
use crate::{
    decision_gate_stage::{Decision, DecisionOutcome},
    error::{SarError, SarResult},
};
use rusqlite::{params, OptionalExtension};

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRow {
    pub case_id: String,
    pub outcome: DecisionOutcome,
    pub confidence_score: f64,
    pub reviewer: String,
    pub rationale: String,
    pub decided_at: String,
}

impl SarStore {
    // ── Decision gate ledger ──────────────────────────────────────

    /// Record the one decision a case gets. A second insert for the
    /// same case is refused.
    pub fn insert_decision(&self, run_id: &str, d: &Decision) -> SarResult<()> {
        if self.decision_for_case(&d.case_id)?.is_some() {
            return Err(SarError::DuplicateDecision {
                case_id: d.case_id.clone(),
            });
        }
        self.conn.execute(
            "INSERT INTO decision
             (case_id, run_id, outcome, confidence_score, reviewer, rationale, decided_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                d.case_id,
                run_id,
                d.outcome.as_str(),
                d.confidence_score,
                d.reviewer,
                d.rationale,
                d.decided_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn decision_for_case(&self, case_id: &str) -> SarResult<Option<DecisionRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT case_id, outcome, confidence_score, reviewer, rationale, decided_at
                 FROM decision WHERE case_id = ?1",
                params![case_id],
                |row| {
                    let outcome: String = row.get(1)?;
                    Ok(DecisionRow {
                        case_id: row.get(0)?,
                        outcome: DecisionOutcome::parse(&outcome).unwrap_or(DecisionOutcome::Reject),
                        confidence_score: row.get(2)?,
                        reviewer: row.get(3)?,
                        rationale: row.get(4)?,
                        decided_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn decision_count(&self, run_id: &str, outcome: DecisionOutcome) -> SarResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM decision WHERE run_id = ?1 AND outcome = ?2",
            params![run_id, outcome.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
