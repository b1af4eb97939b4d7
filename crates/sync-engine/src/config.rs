//! Engine configuration.
//!
//! Every numeric constant here is an empirically tuned default, not a
//! contract; hosts may override any of them through [`SyncConfig`].

use std::time::Duration;

use crate::backoff::BackoffProfile;

/// Timeout applied to every individual provider call.
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 15;

/// Interval between successful batched price fetches.
pub const DEFAULT_PRICE_POLL_INTERVAL_SECS: u64 = 120;

/// Cached values younger than this prime as `Loaded`; older ones as `Stale`.
pub const DEFAULT_CACHE_FRESHNESS_SECS: u64 = 300;

/// Tunables for the synchronization engine.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Per-call timeout for every provider request.
    pub provider_timeout: Duration,
    /// Sleep between successful batched price rounds.
    pub price_poll_interval: Duration,
    /// Freshness threshold used when priming from the persistent cache.
    pub cache_freshness: Duration,
    /// Backoff curve for per-asset balance retries.
    pub balance_backoff: BackoffProfile,
    /// Backoff curve for the shared batched price loop.
    pub price_backoff: BackoffProfile,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
            price_poll_interval: Duration::from_secs(DEFAULT_PRICE_POLL_INTERVAL_SECS),
            cache_freshness: Duration::from_secs(DEFAULT_CACHE_FRESHNESS_SECS),
            balance_backoff: BackoffProfile::per_asset(),
            price_backoff: BackoffProfile::batched_price(),
        }
    }
}
