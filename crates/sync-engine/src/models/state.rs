//! Renderable fetch state for one asset.
//!
//! Balance and price lines share the same state machine, so a single enum
//! serves both; the aliases exist for readability at call sites.
//!
//! ```text
//! Idle       -> Loading                on start of tracking
//! Loading    -> Loaded | Failed        on fetch completion
//! Loaded     -> Refreshing             on next scheduled/triggered fetch
//! Refreshing -> Loaded | Stale         on fetch completion
//! Stale      -> Refreshing             on retry
//! Failed     -> Loading                on retry
//! any        -> (removed)              on clear_all
//! ```
//!
//! Invariants: `Stale` and `Refreshing` exist only when a cached value exists
//! for the asset; `Failed` exists only when none does. Once a value has ever
//! been obtained, a failure degrades to `Stale` and never blanks the display.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::display::DisplayValue;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssetState {
    /// Tracked but never fetched.
    Idle,
    /// First fetch in flight, nothing to show yet.
    Loading,
    /// A refresh is in flight; `previous` keeps the display populated.
    Refreshing {
        previous: DisplayValue,
        since: DateTime<Utc>,
    },
    /// Fresh value.
    Loaded {
        value: DisplayValue,
        at: DateTime<Utc>,
    },
    /// The last fetch failed but an older value is still shown.
    Stale {
        value: DisplayValue,
        at: DateTime<Utc>,
        reason: String,
    },
    /// Fetch failed and no value was ever obtained.
    Failed { reason: String },
}

/// State of one tracked balance line.
pub type BalanceState = AssetState;
/// State of one tracked fiat price line.
pub type PriceState = AssetState;

impl AssetState {
    /// The value the UI should render right now, if any exists.
    pub fn display_value(&self) -> Option<&DisplayValue> {
        match self {
            AssetState::Refreshing { previous, .. } => Some(previous),
            AssetState::Loaded { value, .. } | AssetState::Stale { value, .. } => Some(value),
            AssetState::Idle | AssetState::Loading | AssetState::Failed { .. } => None,
        }
    }

    /// The failure reason attached to a degraded state, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            AssetState::Stale { reason, .. } | AssetState::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    /// Whether a fetch is currently in flight for this state.
    pub fn is_fetching(&self) -> bool {
        matches!(self, AssetState::Loading | AssetState::Refreshing { .. })
    }
}
