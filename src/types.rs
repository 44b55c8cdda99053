//! Shared types for BANKFETCH.
//!
//! These types form the data model used across all modules: MFA methods
//! and challenges produced during login, and the account / transaction
//! value objects handed back to callers. They carry no reference to the
//! session that produced them.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// The step of an authenticated run an error or log event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    LoginPage,
    AntiForgeryBootstrap,
    CredentialSubmit,
    MfaMethods,
    ChallengeCreate,
    ChallengePoll,
    Finalize,
    Overview,
    TransactionSearch,
    TransactionExport,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::LoginPage => "login page",
            Step::AntiForgeryBootstrap => "anti-forgery bootstrap",
            Step::CredentialSubmit => "credential submit",
            Step::MfaMethods => "mfa methods",
            Step::ChallengeCreate => "challenge create",
            Step::ChallengePoll => "challenge poll",
            Step::Finalize => "finalize",
            Step::Overview => "overview",
            Step::TransactionSearch => "transaction search",
            Step::TransactionExport => "transaction export",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// MFA
// ---------------------------------------------------------------------------

/// An enrolled out-of-band confirmation device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaMethod {
    pub id: String,
    pub device_label: String,
    /// "seal_one" on the structured surface, "app" on the web surface.
    pub method_type: String,
    /// Missing timestamps rank as the oldest enrollment.
    pub enrolled_at: Option<DateTime<Utc>>,
    pub locked: bool,
    pub remaining_attempts: Option<u32>,
    pub preferred: bool,
}

impl fmt::Display for MfaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.device_label, self.method_type)?;
        if let Some(at) = self.enrolled_at {
            write!(f, ", enrolled {}", at.format("%Y-%m-%d"))?;
        }
        if self.locked {
            write!(f, ", locked")?;
        }
        Ok(())
    }
}

/// Verification status of a challenge, normalized across surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeStatus {
    Pending,
    Processed,
    Expired,
    Failed,
}

impl ChallengeStatus {
    /// Normalize a raw status string. Comparison is case-insensitive so the
    /// JSON:API `processed` and the HTML surface's `PROCESSED` agree.
    /// Unrecognised values stay non-terminal.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "processed" => ChallengeStatus::Processed,
            "expired" | "canceled" | "cancelled" => ChallengeStatus::Expired,
            "failed" | "rejected" | "declined" => ChallengeStatus::Failed,
            _ => ChallengeStatus::Pending,
        }
    }
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeStatus::Pending => write!(f, "pending"),
            ChallengeStatus::Processed => write!(f, "processed"),
            ChallengeStatus::Expired => write!(f, "expired"),
            ChallengeStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A server-side out-of-band confirmation request. One per handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfaChallenge {
    /// Poll key. On the web surface this is the confirmation action URL.
    pub id: String,
    pub method_id: String,
    pub correlation_id: Option<String>,
    pub status: ChallengeStatus,
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Kind of financial product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountKind {
    Checking,
    Depot,
    CreditCard,
}

impl AccountKind {
    /// Depots hold positions, not a transaction ledger. Callers are expected
    /// to skip them before asking for transactions.
    pub fn has_ledger(&self) -> bool {
        !matches!(self, AccountKind::Depot)
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountKind::Checking => write!(f, "checking"),
            AccountKind::Depot => write!(f, "depot"),
            AccountKind::CreditCard => write!(f, "credit card"),
        }
    }
}

/// One financial product visible on the overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub display_name: String,
    /// IBAN for accounts, masked PAN for cards.
    pub identifier: String,
    pub kind: AccountKind,
    /// Surface-specific reference used to reach the transaction listing:
    /// a relative page link (web) or an endpoint path (structured API).
    pub transaction_ref: String,
    pub balance: Option<Decimal>,
    pub balance_date: Option<NaiveDate>,
}

impl fmt::Display for AccountSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {}", self.kind, self.display_name, self.identifier)?;
        if let Some(balance) = self.balance {
            write!(f, " ({balance})")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Reference codes attached to a booking. All optional; which ones are
/// present depends on the account kind and the surface.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReferenceCodes {
    pub account_number: Option<String>,
    pub bank_code: Option<String>,
    pub creditor_id: Option<String>,
    pub mandate_reference: Option<String>,
    pub customer_reference: Option<String>,
    pub end_to_end_id: Option<String>,
}

impl ReferenceCodes {
    pub fn is_empty(&self) -> bool {
        *self == ReferenceCodes::default()
    }
}

/// A single normalized booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub booking_date: NaiveDate,
    pub value_date: NaiveDate,
    pub counterpart: String,
    pub purpose: String,
    /// Signed: debits are negative.
    pub amount: Decimal,
    pub currency: String,
    /// Posting text (CSV) or transaction type (API).
    pub posting_text: String,
    /// Credit cards only: whether the row is already settled.
    pub settled: Option<bool>,
    pub references: ReferenceCodes,
}

impl fmt::Display for TransactionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:>12} {} | {} | {}",
            self.booking_date.format("%d.%m.%Y"),
            self.amount,
            self.currency,
            self.counterpart,
            self.purpose,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for BANKFETCH.
#[derive(Debug, thiserror::Error)]
pub enum BankError {
    #[error("Transport error during {step}: {message}")]
    Transport { step: Step, message: String },

    #[error("Session has no anti-forgery token yet")]
    NotAuthenticated,

    #[error("Request carries a stale anti-forgery token (generation {issued}, current {current})")]
    StaleAntiForgeryToken { issued: u64, current: u64 },

    #[error("Expected field `{field}` missing during {step}")]
    HandshakeFieldMissing { step: Step, field: String },

    #[error("Credentials rejected during {step} (HTTP {status})")]
    CredentialsRejected { step: Step, status: u16 },

    #[error("Server re-rendered the login form during {step}; cannot tell whether credentials were rejected")]
    AmbiguousCredentials { step: Step },

    #[error("No enrolled MFA methods")]
    NoEnrolledMethods,

    #[error("Invalid MFA method selection {index} (choose 1..={available})")]
    InvalidSelection { index: usize, available: usize },

    #[error("MFA challenge {challenge_id} expired")]
    ChallengeExpired { challenge_id: String },

    #[error("MFA challenge {challenge_id} failed")]
    ChallengeFailed { challenge_id: String },

    #[error("MFA challenge {challenge_id} not confirmed after {attempts} polls")]
    TimedOut { challenge_id: String, attempts: u32 },

    #[error("MFA polling for {challenge_id} cancelled after {attempts} polls")]
    Cancelled { challenge_id: String, attempts: u32 },

    #[error("Finalizing the confirmed challenge failed (HTTP {status})")]
    FinalizationFailed { status: u16 },

    #[error("Session expired during {step}")]
    SessionExpired { step: Step },

    #[error("Unexpected HTTP {status} during {step}")]
    UnexpectedStatus { step: Step, status: u16 },

    #[error("Failed to decode response during {step}: {message}")]
    Decode { step: Step, message: String },

    #[error("Cannot parse amount {raw:?}")]
    AmountParse { raw: String },

    #[error("Cannot parse date {raw:?}")]
    DateParse { raw: String },

    #[error("Cannot decode record on line {line}: {message}")]
    RecordDecode { line: u64, message: String },

    #[error("Export for {account} has only {lines} lines, shorter than its preamble")]
    ExportTruncated { account: String, lines: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Account {account}: {source}")]
    ForAccount {
        account: String,
        #[source]
        source: Box<BankError>,
    },
}

impl BankError {
    /// Whether asking the user again (different credentials, another device,
    /// confirming faster) could lead to a different outcome.
    pub fn is_user_actionable(&self) -> bool {
        if let BankError::ForAccount { source, .. } = self {
            return source.is_user_actionable();
        }
        matches!(
            self,
            BankError::CredentialsRejected { .. }
                | BankError::AmbiguousCredentials { .. }
                | BankError::NoEnrolledMethods
                | BankError::InvalidSelection { .. }
                | BankError::ChallengeExpired { .. }
                | BankError::ChallengeFailed { .. }
                | BankError::TimedOut { .. }
        )
    }

    /// Row-scoped errors are collected per batch instead of aborting it.
    pub fn is_record_scoped(&self) -> bool {
        if let BankError::ForAccount { source, .. } = self {
            return source.is_record_scoped();
        }
        matches!(
            self,
            BankError::AmountParse { .. }
                | BankError::DateParse { .. }
                | BankError::RecordDecode { .. }
        )
    }

    /// Attach the account an error happened on.
    pub fn for_account(self, account: &str) -> Self {
        match self {
            BankError::ForAccount { .. } => self,
            other => BankError::ForAccount {
                account: account.to_string(),
                source: Box::new(other),
            },
        }
    }

    pub(crate) fn transport(step: Step, err: impl fmt::Display) -> Self {
        BankError::Transport {
            step,
            message: err.to_string(),
        }
    }

    pub(crate) fn decode(step: Step, err: impl fmt::Display) -> Self {
        BankError::Decode {
            step,
            message: err.to_string(),
        }
    }

    pub(crate) fn missing(step: Step, field: &str) -> Self {
        BankError::HandshakeFieldMissing {
            step,
            field: field.to_string(),
        }
    }
}

pub type BankResult<T> = std::result::Result<T, BankError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
