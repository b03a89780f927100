use super::SarStore;
use crate::{case::CaseState, error::SarResult, sar_filer_stage::SarFiling};
use rusqlite::params;

#[derive(Debug, Clone, PartialEq)]
pub struct FilingRow {
    pub sar_id: String,
    pub case_id: String,
    pub file_name: String,
    pub classification: String,
    pub suspicious_amount: f64,
    pub completeness_check: bool,
    pub filed_at: String,
}

impl SarStore {
    // ── SAR filings ───────────────────────────────────────────────

    pub fn insert_filing(&self, run_id: &str, f: &SarFiling) -> SarResult<()> {
        self.conn.execute(
            "INSERT INTO sar_filing
             (sar_id, case_id, run_id, file_name, classification,
              suspicious_amount, completeness_check, filed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                f.sar_id,
                f.case_id,
                run_id,
                f.file_name,
                f.classification.as_str(),
                f.suspicious_amount,
                if f.completeness_check { 1 } else { 0 },
                f.filed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Ledger row plus the move to filed, as one transaction.
    pub fn record_filing(&self, run_id: &str, f: &SarFiling) -> SarResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        self.insert_filing(run_id, f)?;
        self.update_case_state(&f.case_id, CaseState::Filed, &f.filed_at.to_rfc3339())?;
        tx.commit()?;
        Ok(())
    }

    pub fn filings_for_run(&self, run_id: &str) -> SarResult<Vec<FilingRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT f.sar_id, f.case_id, f.file_name, f.classification,
                    f.suspicious_amount, f.completeness_check, f.filed_at
             FROM sar_filing f
             JOIN case_record c ON c.case_id = f.case_id
             WHERE f.run_id = ?1
             ORDER BY c.seq ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(FilingRow {
                sar_id: row.get(0)?,
                case_id: row.get(1)?,
                file_name: row.get(2)?,
                classification: row.get(3)?,
                suspicious_amount: row.get(4)?,
                completeness_check: row.get::<_, i32>(5)? != 0,
                filed_at: row.get(6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn filing_count(&self, run_id: &str) -> SarResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM sar_filing WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
