//! Pipeline clock: the single source of "now" for timestamps and
//! the future-date check on transactions.

use chrono::{DateTime, NaiveDate, Utc};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineClock {
    fixed: Option<DateTime<Utc>>,
}

impl PipelineClock {
    /// Wall-clock time.
    pub fn system() -> Self {
        Self { fixed: None }
    }

    /// Frozen time. Used by tests and replays.
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self { fixed: Some(at) }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.fixed.unwrap_or_else(Utc::now)
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// Tag used in `data_sources`, e.g. `csv_extract_20241219`.
    pub fn extract_tag(&self) -> String {
        format!("csv_extract_{}", self.now().format("%Y%m%d"))
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed.is_some()
    }
}

impl Default for PipelineClock {
    fn default() -> Self {
        Self::system()
    }
}
