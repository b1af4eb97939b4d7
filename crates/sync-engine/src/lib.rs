//! Balance and fiat price synchronization engine for a multi-chain wallet.
//!
//! The engine keeps one renderable state per tracked asset and drives it
//! from the network: per-asset balance fetches on demand, one batched fiat
//! price round trip on a timer. Failures degrade the display to a stale
//! value with a reason instead of blanking it, and every successful value is
//! persisted so a restart never starts from an empty screen.
//!
//! ```text
//!                      ┌─────────────────┐
//!    host triggers ───►│  FetchScheduler │  one task per balance asset,
//!  (track, refresh,    └────────┬────────┘  one shared price task
//!   lock, unlock)               │
//!                ┌──────────────┼──────────────┐
//!                ▼              ▼              ▼
//!       ┌────────────────┐ ┌─────────┐ ┌──────────────┐
//!       │  Aggregators   │ │ Backoff │ │AssetStateStore│──► broadcast to UI
//!       │ (failover over │ └─────────┘ └──────┬───────┘
//!       │   providers)   │                    ▼
//!       └───────┬────────┘             PersistentCache
//!               ▼
//!    Blockstream / EVM RPC / Solana RPC / CoinGecko / Coinbase
//! ```
//!
//! The host integrates through four calls on [`FetchScheduler`]:
//! `start_tracking`, `refresh_now`, `stop_all`, `resume` — plus
//! [`AssetStateStore::subscribe`] to observe state transitions.

pub mod backoff;
pub mod cache;
pub mod config;
pub mod errors;
pub mod format;
pub mod models;
pub mod provider;
pub mod scheduler;
pub mod store;

pub use backoff::{BackoffProfile, BackoffRegistry, BackoffTracker};
pub use cache::{CacheError, MemoryCache, PersistentCache};
pub use config::SyncConfig;
pub use errors::{ChainFetchError, SyncError};
pub use models::{AssetId, AssetState, BalanceState, CachedValue, DisplayValue, PriceState};
pub use provider::{
    BalanceAggregator, BlockstreamProvider, ChainBalanceProvider, CoinGeckoProvider,
    CoinbaseProvider, EvmRpcProvider, FiatPriceProvider, PriceAggregator, SolanaRpcProvider,
};
pub use scheduler::{BalanceRoute, CancelToken, FetchScheduler, RefreshTarget};
pub use store::{AssetStateStore, StateChange};
