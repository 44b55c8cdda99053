//! Web-surface CSV export decoding.
//!
//! An export is ISO-8859-15 text: a fixed metadata preamble (account,
//! period, balance), then a `;`-delimited table with a header row.
//! Checking accounts and credit cards use different tables.

use csv::{ReaderBuilder, StringRecord};
use tracing::debug;

use super::locale::{decode_latin9, parse_amount, parse_date, skip_lines};
use super::{LedgerBatch, EXPORT_PREAMBLE_LINES};
use crate::types::{AccountKind, BankError, BankResult, ReferenceCodes, Step, TransactionRecord};

const CURRENCY: &str = "EUR";

// Checking account columns
const COL_BOOKING_DATE: &str = "Buchungstag";
const COL_VALUE_DATE: &str = "Wertstellung";
const COL_POSTING_TEXT: &str = "Buchungstext";
const COL_COUNTERPART: &str = "Auftraggeber / Begünstigter";
const COL_PURPOSE: &str = "Verwendungszweck";
const COL_ACCOUNT_NUMBER: &str = "Kontonummer";
const COL_BANK_CODE: &str = "Bankleitzahl";
const COL_AMOUNT: &str = "Betrag (EUR)";
const COL_CREDITOR_ID: &str = "Gläubiger-ID";
const COL_MANDATE: &str = "Mandatsreferenz";
const COL_CUSTOMER_REF: &str = "Kundenreferenz";

// Credit card columns
const COL_SETTLED: &str = "Umsatz abgerechnet und nicht im Saldo enthalten";
const COL_RECEIPT_DATE: &str = "Belegdatum";
const COL_DESCRIPTION: &str = "Beschreibung";

/// Decode an export with the standard six-line preamble.
pub fn parse_export(bytes: &[u8], kind: AccountKind, account: &str) -> BankResult<LedgerBatch> {
    parse_export_with_preamble(bytes, kind, account, EXPORT_PREAMBLE_LINES)
}

/// Decode an export after skipping exactly `preamble` lines. A header row
/// lacking any expected column fails the whole batch.
pub fn parse_export_with_preamble(
    bytes: &[u8],
    kind: AccountKind,
    account: &str,
    preamble: usize,
) -> BankResult<LedgerBatch> {
    let text = decode_latin9(bytes);
    let table = skip_lines(&text, preamble).ok_or_else(|| BankError::ExportTruncated {
        account: account.to_string(),
        lines: text.lines().count(),
    })?;

    let mut reader = ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .from_reader(table.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| BankError::decode(Step::TransactionExport, e))?
        .clone();
    let layout = Layout::resolve(kind, &headers)?;

    let mut batch = LedgerBatch::new(account);
    for result in reader.records() {
        let row = match result {
            Ok(row) => row,
            Err(err) => {
                let line = err.position().map(|p| p.line()).unwrap_or(0) + preamble as u64;
                batch.accept(line, String::new, Err(BankError::RecordDecode {
                    line,
                    message: err.to_string(),
                }))?;
                continue;
            }
        };
        if row.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        let line = row.position().map(|p| p.line()).unwrap_or(0) + preamble as u64;
        batch.accept(line, || join_raw(&row), layout.decode(&row))?;
    }

    debug!(
        account = %account,
        kind = %kind,
        records = batch.records.len(),
        skipped = batch.skipped.len(),
        "Parsed CSV export"
    );
    Ok(batch)
}

fn join_raw(row: &StringRecord) -> String {
    row.iter().collect::<Vec<_>>().join(";")
}

// ---------------------------------------------------------------------------
// Column layouts
// ---------------------------------------------------------------------------

enum Layout {
    Checking(CheckingColumns),
    CreditCard(CardColumns),
}

struct CheckingColumns {
    booking_date: usize,
    value_date: usize,
    posting_text: usize,
    counterpart: usize,
    purpose: usize,
    account_number: usize,
    bank_code: usize,
    amount: usize,
    creditor_id: usize,
    mandate: usize,
    customer_ref: usize,
}

struct CardColumns {
    settled: usize,
    value_date: usize,
    receipt_date: usize,
    description: usize,
    amount: usize,
}

fn column(headers: &StringRecord, name: &str) -> BankResult<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| BankError::decode(Step::TransactionExport, format!("missing column {name:?}")))
}

fn field(row: &StringRecord, index: usize) -> &str {
    row.get(index).map(str::trim).unwrap_or("")
}

fn optional(row: &StringRecord, index: usize) -> Option<String> {
    let value = field(row, index);
    (!value.is_empty()).then(|| value.to_string())
}

impl Layout {
    fn resolve(kind: AccountKind, headers: &StringRecord) -> BankResult<Self> {
        match kind {
            AccountKind::CreditCard => Ok(Layout::CreditCard(CardColumns {
                settled: column(headers, COL_SETTLED)?,
                value_date: column(headers, COL_VALUE_DATE)?,
                receipt_date: column(headers, COL_RECEIPT_DATE)?,
                description: column(headers, COL_DESCRIPTION)?,
                amount: column(headers, COL_AMOUNT)?,
            })),
            AccountKind::Checking | AccountKind::Depot => Ok(Layout::Checking(CheckingColumns {
                booking_date: column(headers, COL_BOOKING_DATE)?,
                value_date: column(headers, COL_VALUE_DATE)?,
                posting_text: column(headers, COL_POSTING_TEXT)?,
                counterpart: column(headers, COL_COUNTERPART)?,
                purpose: column(headers, COL_PURPOSE)?,
                account_number: column(headers, COL_ACCOUNT_NUMBER)?,
                bank_code: column(headers, COL_BANK_CODE)?,
                amount: column(headers, COL_AMOUNT)?,
                creditor_id: column(headers, COL_CREDITOR_ID)?,
                mandate: column(headers, COL_MANDATE)?,
                customer_ref: column(headers, COL_CUSTOMER_REF)?,
            })),
        }
    }

    fn decode(&self, row: &StringRecord) -> BankResult<TransactionRecord> {
        match self {
            Layout::Checking(cols) => Ok(TransactionRecord {
                booking_date: parse_date(field(row, cols.booking_date))?,
                value_date: parse_date(field(row, cols.value_date))?,
                counterpart: field(row, cols.counterpart).to_string(),
                purpose: field(row, cols.purpose).to_string(),
                amount: parse_amount(field(row, cols.amount))?,
                currency: CURRENCY.to_string(),
                posting_text: field(row, cols.posting_text).to_string(),
                settled: None,
                references: ReferenceCodes {
                    account_number: optional(row, cols.account_number),
                    bank_code: optional(row, cols.bank_code),
                    creditor_id: optional(row, cols.creditor_id),
                    mandate_reference: optional(row, cols.mandate),
                    customer_reference: optional(row, cols.customer_ref),
                    end_to_end_id: None,
                },
            }),
            Layout::CreditCard(cols) => {
                let booking_date = parse_date(field(row, cols.receipt_date))?;
                let value_date = match field(row, cols.value_date) {
                    "" => booking_date,
                    raw => parse_date(raw)?,
                };
                let description = field(row, cols.description).to_string();
                Ok(TransactionRecord {
                    booking_date,
                    value_date,
                    counterpart: description.clone(),
                    purpose: description,
                    amount: parse_amount(field(row, cols.amount))?,
                    currency: CURRENCY.to_string(),
                    posting_text: String::new(),
                    settled: Some(field(row, cols.settled).eq_ignore_ascii_case("ja")),
                    references: ReferenceCodes::default(),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
