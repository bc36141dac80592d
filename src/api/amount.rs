//! Amount extraction from payment notification text

use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::error;

/// `None` only if the pattern failed to compile, which is logged once
static CURRENCY_AMOUNT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:Rs\.?|₹|INR)\s*([\d,]+\.\d{2})")
        .map_err(|e| error!("Currency amount pattern failed to compile: {}", e))
        .ok()
});

/// Finds the paid amount in a bank or wallet notification
///
/// Takes the first currency-prefixed figure (`Rs 1,234.56`, `₹49.01`,
/// `INR 10.00`); failing that, the whole body must be a bare decimal.
///
/// # Returns
/// `None` if no positive amount can be read
pub fn extract_amount(body: &str) -> Option<Decimal> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    let from_prefix = CURRENCY_AMOUNT
        .as_ref()
        .and_then(|re| re.captures(body))
        .and_then(|caps| caps.get(1))
        .map(|figure| figure.as_str().to_string());
    let raw = from_prefix.unwrap_or_else(|| body.to_string());

    Decimal::from_str(&raw.replace(',', ""))
        .ok()
        .filter(|amount| *amount > Decimal::ZERO)
}
