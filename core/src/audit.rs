//! Explainability audit trail.
//!
//! Every stage action (success or failure) is appended as one JSON line
//! to `<audit_dir>/sar_audit.jsonl` and kept in memory for the run.
//! The file is only ever opened in append mode: entries from earlier
//! runs are never rewritten.

use crate::{
    clock::PipelineClock,
    rng::StageRng,
    types::RunId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const AUDIT_FILE_NAME: &str = "sar_audit.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub log_id: String,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub case_id: String,
    pub agent_type: String,
    pub action: String,
    pub input_summary: String,
    pub output_summary: String,
    pub reasoning: String,
    pub execution_time_ms: f64,
    pub success: bool,
    pub error_message: Option<String>,
}

/// What a stage reports about one action. The trail adds ids and time.
#[derive(Debug, Clone)]
pub struct AuditRecord<'a> {
    pub agent_type: &'a str,
    pub action: &'a str,
    pub case_id: &'a str,
    pub input_summary: String,
    pub output_summary: String,
    pub reasoning: String,
    pub started: Instant,
    pub error_message: Option<String>,
}

impl<'a> AuditRecord<'a> {
    pub fn new(agent_type: &'a str, action: &'a str, case_id: &'a str, started: Instant) -> Self {
        Self {
            agent_type,
            action,
            case_id,
            input_summary: String::new(),
            output_summary: String::new(),
            reasoning: String::new(),
            started,
            error_message: None,
        }
    }

    pub fn input(mut self, summary: impl Into<String>) -> Self {
        self.input_summary = summary.into();
        self
    }

    pub fn output(mut self, summary: impl Into<String>) -> Self {
        self.output_summary = summary.into();
        self
    }

    pub fn reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }
}

pub struct AuditTrail {
    run_id: RunId,
    path: Option<PathBuf>,
    clock: PipelineClock,
    rng: StageRng,
    entries: Vec<AuditEntry>,
}

impl AuditTrail {
    /// A trail backed by `<audit_dir>/sar_audit.jsonl`.
    pub fn open(audit_dir: &Path, run_id: RunId, clock: PipelineClock, rng: StageRng) -> std::io::Result<Self> {
        fs::create_dir_all(audit_dir)?;
        Ok(Self {
            run_id,
            path: Some(audit_dir.join(AUDIT_FILE_NAME)),
            clock,
            rng,
            entries: Vec::new(),
        })
    }

    /// A trail that only keeps entries in memory (used in tests).
    pub fn in_memory(run_id: RunId, clock: PipelineClock, rng: StageRng) -> Self {
        Self {
            run_id,
            path: None,
            clock,
            rng,
            entries: Vec::new(),
        }
    }

    /// Append one entry and return its log id.
    pub fn record(&mut self, rec: AuditRecord<'_>) -> String {
        let log_id = self.rng.uuid().to_string();
        let execution_time_ms = if self.clock.is_fixed() {
            0.0
        } else {
            rec.started.elapsed().as_secs_f64() * 1000.0
        };
        let entry = AuditEntry {
            log_id: log_id.clone(),
            run_id: self.run_id.clone(),
            timestamp: self.clock.now(),
            case_id: rec.case_id.to_string(),
            agent_type: rec.agent_type.to_string(),
            action: rec.action.to_string(),
            input_summary: rec.input_summary,
            output_summary: rec.output_summary,
            reasoning: rec.reasoning,
            execution_time_ms,
            success: rec.error_message.is_none(),
            error_message: rec.error_message,
        };

        if let Some(path) = &self.path {
            if let Err(e) = append_line(path, &entry) {
                log::warn!("audit: could not write to {}: {e}", path.display());
            }
        }
        self.entries.push(entry);
        log_id
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn entries_for_case<'s>(&'s self, case_id: &'s str) -> impl Iterator<Item = &'s AuditEntry> + 's {
        self.entries.iter().filter(move |e| e.case_id == case_id)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn append_line(path: &Path, entry: &AuditEntry) -> std::io::Result<()> {
    let line = serde_json::to_string(entry)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

/// Read every entry back from an audit file, oldest first.
pub fn read_audit_file(path: &Path) -> crate::error::SarResult<Vec<AuditEntry>> {
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(Into::into))
        .collect()
}
