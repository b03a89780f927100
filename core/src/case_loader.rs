//! Case loader: CSV extracts in, validated cases out.
//!
//! Customers are ranked for screening, then a case is built for each in
//! rank order until enough cases exist. A customer whose records fail
//! validation is skipped and counted; it never stops the run.

use crate::{
    audit::{AuditRecord, AuditTrail},
    clock::PipelineClock,
    error::{SarError, SarResult},
    rng::StageRng,
    schema::{AccountData, CaseData, CustomerData, TransactionData},
};
use serde::de::DeserializeOwned;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Instant;

pub const CUSTOMERS_FILE: &str = "customers.csv";
pub const ACCOUNTS_FILE: &str = "accounts.csv";
pub const TRANSACTIONS_FILE: &str = "transactions.csv";

/// Raw records as read from the three extracts.
#[derive(Debug, Clone, Default)]
pub struct CsvData {
    pub customers: Vec<CustomerData>,
    pub accounts: Vec<AccountData>,
    pub transactions: Vec<TransactionData>,
}

/// Cases selected for screening, plus how many customers were skipped.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub cases: Vec<CaseData>,
    pub failures: usize,
}

fn read_records<T: DeserializeOwned>(path: &Path) -> SarResult<Vec<T>> {
    let name = path.display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| SarError::Other(anyhow::anyhow!("cannot open {name}: {e}")))?;
    reader
        .deserialize()
        .map(|row| row.map_err(|e| SarError::Other(anyhow::anyhow!("cannot parse {name}: {e}"))))
        .collect()
}

/// Read `customers.csv`, `accounts.csv` and `transactions.csv` from `data_dir`.
pub fn load_csv_data(data_dir: &Path) -> SarResult<CsvData> {
    let data = CsvData {
        customers: read_records(&data_dir.join(CUSTOMERS_FILE))?,
        accounts: read_records(&data_dir.join(ACCOUNTS_FILE))?,
        transactions: read_records(&data_dir.join(TRANSACTIONS_FILE))?,
    };
    log::info!(
        "loader: read {} customers, {} accounts, {} transactions from {}",
        data.customers.len(),
        data.accounts.len(),
        data.transactions.len(),
        data_dir.display()
    );
    Ok(data)
}

/// Build one case from the customer's records.
///
/// Accounts are those owned by the customer; transactions are those
/// booked on those accounts. Every record is validated. The attempt is
/// audited under `DataLoader/create_case` whether or not it succeeds.
pub fn create_case(
    customer: &CustomerData,
    accounts: &[AccountData],
    transactions: &[TransactionData],
    rng: &mut StageRng,
    clock: PipelineClock,
    audit: &mut AuditTrail,
) -> SarResult<CaseData> {
    let started = Instant::now();
    let case_id = rng.uuid().to_string();

    match build_case(case_id.clone(), customer, accounts, transactions, clock) {
        Ok(case) => {
            audit.record(
                AuditRecord::new("DataLoader", "create_case", &case_id, started)
                    .input(format!("customer_id={}", customer.customer_id))
                    .output(format!("case_id={} status=created", case.case_id))
                    .reasoning(format!(
                        "Built case for customer {} from {} account(s) and {} transaction(s).",
                        customer.customer_id,
                        case.accounts.len(),
                        case.transactions.len()
                    )),
            );
            Ok(case)
        }
        Err(e) => {
            audit.record(
                AuditRecord::new("DataLoader", "create_case", &case_id, started)
                    .input(format!("customer_id={}", customer.customer_id))
                    .reasoning(format!("Case creation failed for customer {}", customer.customer_id))
                    .failed(e.to_string()),
            );
            Err(e)
        }
    }
}

fn build_case(
    case_id: String,
    customer: &CustomerData,
    accounts: &[AccountData],
    transactions: &[TransactionData],
    clock: PipelineClock,
) -> SarResult<CaseData> {
    customer.validate()?;

    let owned: Vec<AccountData> = accounts
        .iter()
        .filter(|a| a.customer_id == customer.customer_id)
        .cloned()
        .collect();
    for acc in &owned {
        acc.validate()?;
    }
    let account_ids: HashSet<&str> = owned.iter().map(|a| a.account_id.as_str()).collect();

    let today = clock.today();
    let booked: Vec<TransactionData> = transactions
        .iter()
        .filter(|t| account_ids.contains(t.account_id.as_str()))
        .cloned()
        .collect();
    for txn in &booked {
        txn.validate(today)?;
    }

    let tag = clock.extract_tag();
    let data_sources = BTreeMap::from([
        ("customer_source".to_string(), tag.clone()),
        ("account_source".to_string(), tag.clone()),
        ("transaction_source".to_string(), tag),
    ]);
    CaseData::new(case_id, customer.clone(), owned, booked, clock.now(), data_sources)
}

impl CsvData {
    /// Gross transaction volume per customer id.
    fn volume_by_customer(&self) -> HashMap<&str, f64> {
        let owner: HashMap<&str, &str> = self
            .accounts
            .iter()
            .map(|a| (a.account_id.as_str(), a.customer_id.as_str()))
            .collect();
        let mut volume: HashMap<&str, f64> = HashMap::new();
        for txn in &self.transactions {
            if let Some(&cust) = owner.get(txn.account_id.as_str()) {
                *volume.entry(cust).or_insert(0.0) += txn.amount.abs();
            }
        }
        volume
    }

    /// Customers in screening order: risk rating (Critical first), then
    /// gross volume descending, then customer id.
    pub fn rank_customers(&self) -> Vec<&CustomerData> {
        let volume = self.volume_by_customer();
        let vol = |c: &CustomerData| volume.get(c.customer_id.as_str()).copied().unwrap_or(0.0);
        let mut ranked: Vec<&CustomerData> = self.customers.iter().collect();
        ranked.sort_by(|a, b| {
            b.risk_rating
                .cmp(&a.risk_rating)
                .then_with(|| vol(b).partial_cmp(&vol(a)).unwrap_or(Ordering::Equal))
                .then_with(|| a.customer_id.cmp(&b.customer_id))
        });
        ranked
    }

    pub fn create_case(
        &self,
        customer: &CustomerData,
        rng: &mut StageRng,
        clock: PipelineClock,
        audit: &mut AuditTrail,
    ) -> SarResult<CaseData> {
        create_case(customer, &self.accounts, &self.transactions, rng, clock, audit)
    }

    /// Build up to `n` cases in rank order, skipping customers whose
    /// case cannot be built.
    pub fn select_top_n(
        &self,
        n: usize,
        rng: &mut StageRng,
        clock: PipelineClock,
        audit: &mut AuditTrail,
    ) -> LoadOutcome {
        let mut cases = Vec::with_capacity(n);
        let mut failures = 0;
        for customer in self.rank_customers() {
            if cases.len() >= n {
                break;
            }
            match self.create_case(customer, rng, clock, audit) {
                Ok(case) => cases.push(case),
                Err(e) => {
                    failures += 1;
                    log::warn!("loader: skipping customer {}: {e}", customer.customer_id);
                }
            }
        }
        if cases.len() < n {
            log::warn!("loader: only {} of {n} requested cases could be built", cases.len());
        }
        LoadOutcome { cases, failures }
    }
}
