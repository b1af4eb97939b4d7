//! Display formatting for balances, fiat prices, and staleness captions.
//!
//! This is the whole formatting contract: the engine produces
//! [`DisplayValue`]s here and nowhere else, so the UI never formats raw
//! numbers itself.

use chrono::{DateTime, Utc};
use num_traits::FromPrimitive;
use rust_decimal::Decimal;

use crate::models::{AssetId, DisplayValue};

/// Format a native-unit balance, e.g. `0.01 BTC`.
pub fn balance(asset: AssetId, amount: Decimal) -> DisplayValue {
    let rounded = amount.round_dp(asset.display_decimals()).normalize();
    DisplayValue::new(format!("{} {}", rounded, asset.symbol()), amount)
}

/// Format a USD price, e.g. `$64,230.10`. Sub-dollar prices keep six decimal
/// places so micro-cap tokens do not render as `$0.00`.
pub fn fiat_price(usd: f64) -> DisplayValue {
    let amount = Decimal::from_f64(usd).unwrap_or_default();
    let places = if usd.abs() < 1.0 { 6 } else { 2 };
    let rounded = amount.round_dp(places);
    DisplayValue::new(
        format!("${}", group_thousands(&format!("{rounded:.places$}", places = places as usize))),
        amount,
    )
}

/// Relative "updated N ago" caption shown next to stale values.
pub fn updated_ago(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(at).num_seconds().max(0);
    if secs < 60 {
        "updated just now".to_string()
    } else if secs < 3600 {
        format!("updated {}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("updated {}h ago", secs / 3600)
    } else {
        format!("updated {}d ago", secs / 86_400)
    }
}

/// Insert thousands separators into the integer part of a plain decimal
/// string. The input is `Decimal` display output: digits, at most one dot,
/// optional leading minus.
fn group_thousands(plain: &str) -> String {
    let (sign, unsigned) = match plain.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", plain),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    match frac_part {
        Some(f) => format!("{sign}{grouped}.{f}"),
        None => format!("{sign}{grouped}"),
    }
}
