//! Data-source capabilities and the bundled provider implementations.
//!
//! A provider is one (chain, data source) pair. The engine never talks to a
//! provider directly: the aggregators in [`aggregator`] fan one logical fetch
//! out across an ordered provider list, and the scheduler owns retry cadence.

pub mod aggregator;
pub mod blockstream;
pub mod coinbase;
pub mod coingecko;
pub mod evm_rpc;
pub mod solana_rpc;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::errors::ChainFetchError;
use crate::models::{AssetId, DisplayValue};

pub use aggregator::{BalanceAggregator, PriceAggregator};
pub use blockstream::BlockstreamProvider;
pub use coinbase::CoinbaseProvider;
pub use coingecko::CoinGeckoProvider;
pub use evm_rpc::EvmRpcProvider;
pub use solana_rpc::SolanaRpcProvider;

/// One balance data source for one chain.
///
/// Implementations must normalize every failure into [`ChainFetchError`];
/// nothing else crosses this boundary.
#[async_trait]
pub trait ChainBalanceProvider: Send + Sync {
    /// Stable identifier used for logging and failover diagnostics.
    fn id(&self) -> &'static str;

    /// Fetch the current balance of `address`, formatted for display.
    async fn fetch_balance(&self, address: &str) -> Result<DisplayValue, ChainFetchError>;
}

/// A batched fiat price source: one call resolves every requested asset.
#[async_trait]
pub trait FiatPriceProvider: Send + Sync {
    /// Stable identifier used for logging and failover diagnostics.
    fn id(&self) -> &'static str;

    /// Fetch USD prices for the given assets in a single round trip.
    ///
    /// Assets the provider cannot quote are simply absent from the result;
    /// an entirely empty result for a non-empty request is an error.
    async fn fetch_prices(
        &self,
        assets: &HashSet<AssetId>,
    ) -> Result<HashMap<AssetId, f64>, ChainFetchError>;
}
