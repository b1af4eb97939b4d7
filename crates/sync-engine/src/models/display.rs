//! Renderable values and their cached form.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A formatted string plus the numeric value it was derived from.
///
/// The numeric side exists so portfolio totals can be aggregated without
/// re-parsing display strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplayValue {
    /// What the UI renders, e.g. `"0.01 BTC"` or `"$64,230.10"`.
    pub formatted: String,
    /// The underlying amount.
    pub amount: Decimal,
}

impl DisplayValue {
    pub fn new(formatted: impl Into<String>, amount: Decimal) -> Self {
        Self {
            formatted: formatted.into(),
            amount,
        }
    }
}

/// The last known-good result for an asset, independent of fetch status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedValue {
    pub value: DisplayValue,
    pub last_updated: DateTime<Utc>,
}

impl CachedValue {
    pub fn new(value: DisplayValue, last_updated: DateTime<Utc>) -> Self {
        Self {
            value,
            last_updated,
        }
    }

    /// Age of this entry relative to `now`. Clock skew can make this
    /// negative; callers treat negative ages as fresh.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_updated)
    }
}
