//! Price text normalization and currency inference
//!
//! Turns noisy retail price strings ("$1,234.50", "AED 99", "£19.99 inc. VAT")
//! into canonical decimal text. Amounts stay as strings end to end: currency
//! values never pass through binary floating point.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Currency codes the capture flow understands.
///
/// Closed set on purpose: a currency we cannot name stays `None` downstream,
/// it is never defaulted to USD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "GBP")]
    Gbp,
    #[serde(rename = "AED")]
    Aed,
    #[serde(rename = "EUR")]
    Eur,
    #[serde(rename = "USD")]
    Usd,
}

impl Currency {
    /// ISO 4217 code for this currency.
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Gbp => "GBP",
            Currency::Aed => "AED",
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
        }
    }

    /// Parse an explicit currency code as declared by page metadata.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_uppercase().as_str() {
            "GBP" => Some(Currency::Gbp),
            "AED" => Some(Currency::Aed),
            "EUR" => Some(Currency::Eur),
            "USD" => Some(Currency::Usd),
            _ => None,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalize a raw price string to canonical decimal text.
///
/// Finds the first contiguous numeric run (digits with `.`/`,` separators)
/// and strips everything except digits and the decimal point. Commas are
/// assumed to be thousands separators, never decimal separators; locales
/// that write "1.234,50" are a known limitation of this contract.
///
/// Returns `None` when the input contains no numeric run at all.
pub fn normalize_price(raw: &str) -> Option<String> {
    let number_re = Regex::new(r"\d[\d.,]*").unwrap();
    let matched = number_re.find(raw)?.as_str();

    let cleaned: String = matched
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Infer a currency from a symbol found next to a price.
///
/// Fixed table only. Unrecognized symbols return `None`; callers must treat
/// that as "unknown", not "USD". Note that `$` maps to USD even though the
/// symbol is shared by CAD, AUD and others; no locale signal is consulted.
pub fn infer_currency(symbol: &str) -> Option<Currency> {
    match symbol.trim() {
        "£" => Some(Currency::Gbp),
        "AED" => Some(Currency::Aed),
        "€" => Some(Currency::Eur),
        "$" => Some(Currency::Usd),
        _ => None,
    }
}
