//! German-locale field handling for the web surface's exports.
//!
//! - Dates are `DD.MM.YYYY`.
//! - Amounts use `.` for thousands and `,` for decimals (`-1.234,56`).
//! - Export text is ISO-8859-15, not UTF-8.

use chrono::NaiveDate;
use encoding_rs::ISO_8859_15;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::types::{BankError, BankResult};

/// Date format used in exports, the overview and the search form.
pub const DATE_FORMAT: &str = "%d.%m.%Y";

/// Strip thousands separators, then turn the decimal comma into a point.
pub fn normalize_amount(raw: &str) -> String {
    raw.trim().replace('.', "").replace(',', ".")
}

/// Whether `s` is `-?digits(.digits)?`. `Decimal::from_str` alone also
/// takes exponents, `_` separators and a leading `+`.
fn is_plain_decimal(s: &str) -> bool {
    let unsigned = s.strip_prefix('-').unwrap_or(s);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };
    let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    digits(int_part) && frac_part.map_or(true, digits)
}

/// Parse a German-formatted amount. Anything that is not a number after
/// normalization is an error, never zero.
pub fn parse_amount(raw: &str) -> BankResult<Decimal> {
    let normalized = normalize_amount(raw);
    let err = || BankError::AmountParse {
        raw: raw.to_string(),
    };
    if !is_plain_decimal(&normalized) {
        return Err(err());
    }
    Decimal::from_str(&normalized).map_err(|_| err())
}

pub fn parse_date(raw: &str) -> BankResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| BankError::DateParse {
        raw: raw.to_string(),
    })
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Transcode ISO-8859-15 bytes. Every byte maps to a character, so this
/// cannot fail.
pub fn decode_latin9(bytes: &[u8]) -> String {
    let (text, _had_errors) = ISO_8859_15.decode_without_bom_handling(bytes);
    text.into_owned()
}

/// Drop the first `n` lines (`\n` or `\r\n` terminated). `None` if the
/// text has fewer than `n` complete lines.
pub fn skip_lines(text: &str, n: usize) -> Option<&str> {
    let mut rest = text;
    for _ in 0..n {
        let end = rest.find('\n')?;
        rest = &rest[end + 1..];
    }
    Some(rest)
}
