//! Ledger retrieval.
//!
//! Defines the `LedgerSource` trait (overview discovery + per-account
//! transaction retrieval) and the batch type both surfaces return.
//!
//! Row policy: skip-and-collect. A row that cannot be decoded does not
//! become a record; it is kept in `LedgerBatch::skipped` with its line
//! number and reason, so nothing disappears silently. Structural problems
//! (truncated export, missing columns, unreadable document) fail the batch.

pub mod csv_export;
pub mod locale;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::warn;

use crate::session::Session;
use crate::types::{AccountSummary, BankError, BankResult, TransactionRecord};

/// Metadata lines (account, period, balance) ahead of the CSV header row.
pub const EXPORT_PREAMBLE_LINES: usize = 6;

/// Inclusive booking-date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> BankResult<Self> {
        if from > to {
            return Err(BankError::Config(format!(
                "date range starts after it ends ({from} > {to})"
            )));
        }
        Ok(Self { from, to })
    }

    /// The `days` days up to and including `today`.
    pub fn last_days(today: NaiveDate, days: i64) -> BankResult<Self> {
        if days < 1 {
            return Err(BankError::Config(format!("lookback must be at least one day, got {days}")));
        }
        let from = Duration::try_days(days - 1)
            .and_then(|span| today.checked_sub_signed(span))
            .ok_or_else(|| {
                BankError::Config(format!("lookback of {days} days reaches before any valid date"))
            })?;
        Self::new(from, today)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

/// A row that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
    /// 1-based line (CSV) or item index (JSON) in the source document.
    pub line: u64,
    pub raw: String,
    pub reason: String,
}

/// Records for one account plus the rows that were skipped.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerBatch {
    pub account: String,
    pub records: Vec<TransactionRecord>,
    pub skipped: Vec<SkippedRow>,
}

impl LedgerBatch {
    pub fn new(account: &str) -> Self {
        Self {
            account: account.to_string(),
            ..Default::default()
        }
    }

    /// Keep a decoded record, or collect a row-scoped failure. Any other
    /// error is handed back to abort the batch.
    pub(crate) fn accept(
        &mut self,
        line: u64,
        raw: impl FnOnce() -> String,
        decoded: BankResult<TransactionRecord>,
    ) -> BankResult<()> {
        match decoded {
            Ok(record) => {
                self.records.push(record);
                Ok(())
            }
            Err(err) if err.is_record_scoped() => {
                let row = SkippedRow {
                    line,
                    raw: raw(),
                    reason: err.to_string(),
                };
                warn!(account = %self.account, line, reason = %row.reason, "Skipping transaction row");
                self.skipped.push(row);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// True when every row became a record.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Overview discovery and transaction retrieval for one surface.
#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// Every financial product visible to the user, depots included.
    async fn accounts(&self, session: &Session) -> BankResult<Vec<AccountSummary>>;

    /// Transactions of one account. Depots are the caller's to exclude.
    async fn transactions(
        &self,
        session: &Session,
        account: &AccountSummary,
        range: &DateRange,
    ) -> BankResult<LedgerBatch>;

    /// Whether reads are stateless and may run concurrently on one session.
    fn stateless_reads(&self) -> bool {
        false
    }
}
