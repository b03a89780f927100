//! Input record schemas and their validation rules.
//!
//! Records are deserialized straight from the CSV extracts, then
//! validated explicitly so every failure names the offending record id.
//! Enumerated columns (risk rating, account type, status) are typed and
//! fail at deserialization time instead.

use crate::{
    error::{SarError, SarResult},
    types::{CaseId, EntityId},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

// ── Constants ────────────────────────────────────────────────────────────────

pub const MAX_MONETARY_VALUE: f64 = 100_000_000_000.0;
const DATE_FORMAT: &str = "%Y-%m-%d";

// ── Enumerations ─────────────────────────────────────────────────────────────

/// Shared scale for customer risk ratings and assessed risk levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    Checking,
    Savings,
    #[serde(rename = "Money_Market")]
    MoneyMarket,
    #[serde(rename = "Business_Checking")]
    BusinessChecking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Active,
    Closed,
    Suspended,
}

// ── SSN fragment ─────────────────────────────────────────────────────────────

/// Last four SSN digits. Never printed and never serialized.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SsnLast4(String);

impl SsnLast4 {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    fn check(&self) -> Result<(), String> {
        if self.0.chars().count() != 4 {
            return Err("ssn_last_4 must consist of four digits".into());
        }
        if !self.0.chars().all(|c| c.is_ascii_digit()) {
            return Err("ssn_last_4 can only include digits".into());
        }
        if self.0 == "0000" {
            return Err("ssn_last_4 cannot be 0000".into());
        }
        Ok(())
    }
}

impl fmt::Debug for SsnLast4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SsnLast4(**********)")
    }
}

// ── Field validators ─────────────────────────────────────────────────────────

fn require_text(record: &'static str, id: &str, field: &str, value: &str) -> SarResult<()> {
    if value.trim().is_empty() {
        return Err(SarError::validation(
            record,
            id,
            format!("{field} cannot be empty or whitespace only"),
        ));
    }
    Ok(())
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_iso_date(record: &'static str, id: &str, field: &str, value: &str) -> SarResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| {
        SarError::validation(
            record,
            id,
            format!("{field} must be in YYYY-MM-DD format: {value}"),
        )
    })
}

/// Finite, within bounds, and at most two decimal places.
fn check_money(record: &'static str, id: &str, field: &str, value: f64) -> SarResult<()> {
    if !value.is_finite() {
        return Err(SarError::validation(record, id, format!("{field} must be finite")));
    }
    if value.abs() > MAX_MONETARY_VALUE {
        return Err(SarError::validation(
            record,
            id,
            format!("{field} exceeds the maximum monetary value: {value}"),
        ));
    }
    let shifted = value * 100.0;
    if (shifted - shifted.round()).abs() > 1e-9 * shifted.abs().max(1.0) {
        return Err(SarError::validation(
            record,
            id,
            format!("{field} has too many decimal places (max 2): {value}"),
        ));
    }
    Ok(())
}

// ── Customer ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerData {
    pub customer_id: EntityId,
    pub name: String,
    pub date_of_birth: String,
    #[serde(skip_serializing)]
    pub ssn_last_4: SsnLast4,
    pub address: String,
    pub customer_since: String,
    pub risk_rating: RiskLevel,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub annual_income: Option<i64>,
}

impl CustomerData {
    const RECORD: &'static str = "Customer Data";

    pub fn validate(&self) -> SarResult<()> {
        let id = self.customer_id.as_str();
        require_text(Self::RECORD, id, "customer_id", &self.customer_id)?;
        require_text(Self::RECORD, id, "name", &self.name)?;
        require_text(Self::RECORD, id, "address", &self.address)?;
        parse_iso_date(Self::RECORD, id, "date_of_birth", &self.date_of_birth)?;
        parse_iso_date(Self::RECORD, id, "customer_since", &self.customer_since)?;
        self.ssn_last_4
            .check()
            .map_err(|reason| SarError::validation(Self::RECORD, id, reason))
    }
}

// ── Account ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountData {
    pub account_id: EntityId,
    pub customer_id: EntityId,
    pub account_type: AccountType,
    pub opening_date: String,
    pub current_balance: f64,
    pub average_monthly_balance: f64,
    pub status: AccountStatus,
}

impl AccountData {
    const RECORD: &'static str = "Account Data";

    pub fn validate(&self) -> SarResult<()> {
        let id = self.account_id.as_str();
        require_text(Self::RECORD, id, "account_id", &self.account_id)?;
        require_text(Self::RECORD, id, "customer_id", &self.customer_id)?;
        parse_iso_date(Self::RECORD, id, "opening_date", &self.opening_date)?;
        check_money(Self::RECORD, id, "current_balance", self.current_balance)?;
        check_money(
            Self::RECORD,
            id,
            "average_monthly_balance",
            self.average_monthly_balance,
        )
    }
}

// ── Transaction ──────────────────────────────────────────────────────────────

/// One transaction. Negative amounts are debits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionData {
    pub transaction_id: EntityId,
    pub account_id: EntityId,
    pub transaction_date: String,
    pub transaction_type: String,
    pub amount: f64,
    pub description: String,
    pub method: String,
    #[serde(default)]
    pub counterparty: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl TransactionData {
    const RECORD: &'static str = "Transaction Data";

    /// Validate against `today`; transactions cannot be dated in the future.
    pub fn validate(&self, today: NaiveDate) -> SarResult<()> {
        let id = self.transaction_id.as_str();
        require_text(Self::RECORD, id, "transaction_id", &self.transaction_id)?;
        require_text(Self::RECORD, id, "account_id", &self.account_id)?;
        require_text(Self::RECORD, id, "transaction_type", &self.transaction_type)?;
        require_text(Self::RECORD, id, "description", &self.description)?;
        require_text(Self::RECORD, id, "method", &self.method)?;
        check_money(Self::RECORD, id, "amount", self.amount)?;

        let date = parse_iso_date(Self::RECORD, id, "transaction_date", &self.transaction_date)?;
        if date > today {
            return Err(SarError::validation(
                Self::RECORD,
                id,
                format!(
                    "transaction_date cannot be in the future: {}",
                    self.transaction_date
                ),
            ));
        }
        Ok(())
    }

    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.transaction_date, DATE_FORMAT).ok()
    }

    pub fn is_cash(&self) -> bool {
        let t = self.transaction_type.to_ascii_lowercase();
        let m = self.method.to_ascii_lowercase();
        t.contains("cash") || m == "teller" || m == "atm" || m == "cash"
    }
}

// ── Case ─────────────────────────────────────────────────────────────────────

/// A unified case: one customer, their accounts, and the transactions
/// booked on those accounts.
#[derive(Debug, Clone, Serialize)]
pub struct CaseData {
    pub case_id: CaseId,
    pub customer: CustomerData,
    pub accounts: Vec<AccountData>,
    pub transactions: Vec<TransactionData>,
    pub case_created_at: DateTime<Utc>,
    pub data_sources: BTreeMap<String, String>,
}

impl CaseData {
    const RECORD: &'static str = "Case Data";

    /// Assemble a case, enforcing referential integrity:
    /// every account belongs to the customer, every transaction to one
    /// of the accounts, and there is at least one transaction.
    pub fn new(
        case_id: CaseId,
        customer: CustomerData,
        accounts: Vec<AccountData>,
        transactions: Vec<TransactionData>,
        case_created_at: DateTime<Utc>,
        data_sources: BTreeMap<String, String>,
    ) -> SarResult<Self> {
        if transactions.is_empty() {
            return Err(SarError::validation(
                Self::RECORD,
                &customer.customer_id,
                "case requires at least one transaction",
            ));
        }
        for acc in &accounts {
            if acc.customer_id != customer.customer_id {
                return Err(SarError::validation(
                    Self::RECORD,
                    &customer.customer_id,
                    format!(
                        "account {} belongs to {}",
                        acc.account_id, acc.customer_id
                    ),
                ));
            }
        }
        let account_ids: HashSet<&str> = accounts.iter().map(|a| a.account_id.as_str()).collect();
        for txn in &transactions {
            if !account_ids.contains(txn.account_id.as_str()) {
                return Err(SarError::validation(
                    Self::RECORD,
                    &customer.customer_id,
                    format!(
                        "transaction {} refers to account {} which is not in this case",
                        txn.transaction_id, txn.account_id
                    ),
                ));
            }
        }
        Ok(Self {
            case_id,
            customer,
            accounts,
            transactions,
            case_created_at,
            data_sources,
        })
    }

    /// Sum of credits (positive amounts).
    pub fn total_inflow(&self) -> f64 {
        self.transactions
            .iter()
            .filter(|t| t.amount > 0.0)
            .map(|t| t.amount)
            .sum()
    }

    /// Sum of debits, as a positive number.
    pub fn total_outflow(&self) -> f64 {
        self.transactions
            .iter()
            .filter(|t| t.amount < 0.0)
            .map(|t| -t.amount)
            .sum()
    }

    /// Gross volume moved through the case's accounts.
    pub fn gross_volume(&self) -> f64 {
        self.transactions.iter().map(|t| t.amount.abs()).sum()
    }

    /// First and last transaction dates.
    pub fn activity_window(&self) -> Option<(NaiveDate, NaiveDate)> {
        let mut dates = self.transactions.iter().filter_map(TransactionData::date);
        let first = dates.next()?;
        Some(dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d))))
    }
}
