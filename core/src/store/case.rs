use super::SarStore;
use crate::{
    case::CaseState,
    error::{SarError, SarResult},
    types::CaseSeq,
};
use rusqlite::{params, OptionalExtension};

#[derive(Debug, Clone, PartialEq)]
pub struct CaseRow {
    pub case_id: String,
    pub run_id: String,
    pub seq: CaseSeq,
    pub customer_id: String,
    pub state: CaseState,
    pub created_at: String,
    pub updated_at: String,
}

impl SarStore {
    // ── Case lifecycle ────────────────────────────────────────────

    pub fn insert_case(
        &self,
        run_id: &str,
        case_id: &str,
        seq: CaseSeq,
        customer_id: &str,
        created_at: &str,
    ) -> SarResult<()> {
        self.conn.execute(
            "INSERT INTO case_record (case_id, run_id, seq, customer_id, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'screened', ?5, ?5)",
            params![case_id, run_id, seq as i64, customer_id, created_at],
        )?;
        Ok(())
    }

    /// Move a case along its lifecycle. The current state in the ledger
    /// must allow the move.
    pub fn update_case_state(&self, case_id: &str, next: CaseState, at: &str) -> SarResult<()> {
        let current = self
            .case_state(case_id)?
            .ok_or_else(|| SarError::CaseNotFound {
                case_id: case_id.to_string(),
            })?;
        if !current.can_transition_to(next) {
            return Err(SarError::InvalidTransition {
                case_id: case_id.to_string(),
                from: current,
                to: next,
            });
        }
        self.conn.execute(
            "UPDATE case_record SET state = ?1, updated_at = ?2 WHERE case_id = ?3",
            params![next.as_str(), at, case_id],
        )?;
        Ok(())
    }

    pub fn case_state(&self, case_id: &str) -> SarResult<Option<CaseState>> {
        let state: Option<String> = self
            .conn
            .query_row(
                "SELECT state FROM case_record WHERE case_id = ?1",
                params![case_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(state.as_deref().and_then(CaseState::parse))
    }

    pub fn cases_for_run(&self, run_id: &str) -> SarResult<Vec<CaseRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT case_id, run_id, seq, customer_id, state, created_at, updated_at
             FROM case_record WHERE run_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            let state: String = row.get(4)?;
            Ok(CaseRow {
                case_id: row.get(0)?,
                run_id: row.get(1)?,
                seq: row.get::<_, i64>(2)? as u64,
                customer_id: row.get(3)?,
                state: CaseState::parse(&state).unwrap_or(CaseState::Screened),
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn case_count(&self, run_id: &str, state: CaseState) -> SarResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM case_record WHERE run_id = ?1 AND state = ?2",
            params![run_id, state.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
