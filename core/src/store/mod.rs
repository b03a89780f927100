//! SQLite persistence layer: the case ledger.
//!
//! RULE: Only the store talks to the database.
//! Stages call store methods, they never execute SQL directly.

use crate::{error::SarResult, event::EventLogEntry, types::CaseSeq};
use rusqlite::{params, Connection, OptionalExtension};

mod case;
mod decision;
mod filing;

pub use case::CaseRow;
pub use decision::DecisionRow;
pub use filing::FilingRow;

pub struct SarStore {
    conn: Connection,
}

impl SarStore {
    pub fn open(path: &str) -> SarResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only matters for real files; :memory: ignores it.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SarResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SarResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_cases.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_sar_filing.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, seed: u64, version: &str, started_at: &str) -> SarResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, seed, version, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, seed as i64, version, started_at],
        )?;
        Ok(())
    }

    pub fn run_exists(&self, run_id: &str) -> SarResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM run WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn save_run_summary(&self, run_id: &str, completed_at: &str, metrics_json: &str) -> SarResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO run_summary (run_id, completed_at, metrics_json)
             VALUES (?1, ?2, ?3)",
            params![run_id, completed_at, metrics_json],
        )?;
        Ok(())
    }

    pub fn run_summary(&self, run_id: &str) -> SarResult<Option<String>> {
        let json = self
            .conn
            .query_row(
                "SELECT metrics_json FROM run_summary WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> SarResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, seq, stage, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.seq as i64,
                entry.stage,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_case(&self, run_id: &str, seq: CaseSeq) -> SarResult<Vec<EventLogEntry>> {
        self.query_events(
            "SELECT id, run_id, seq, stage, event_type, payload
             FROM event_log WHERE run_id = ?1 AND seq = ?2
             ORDER BY id ASC",
            params![run_id, seq as i64],
        )
    }

    pub fn events_for_run(&self, run_id: &str) -> SarResult<Vec<EventLogEntry>> {
        self.query_events(
            "SELECT id, run_id, seq, stage, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY id ASC",
            params![run_id],
        )
    }

    fn query_events(&self, sql: &str, args: impl rusqlite::Params) -> SarResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let entries = stmt
            .query_map(args, |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    run_id: row.get(1)?,
                    seq: row.get::<_, i64>(2)? as u64,
                    stage: row.get(3)?,
                    event_type: row.get(4)?,
                    payload: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
