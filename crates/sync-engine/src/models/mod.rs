//! Core data model: asset identity, renderable values, and fetch state.

mod asset;
mod display;
mod state;

pub use asset::AssetId;
pub use display::{CachedValue, DisplayValue};
pub use state::{AssetState, BalanceState, PriceState};
