//! Fetch orchestration: one loop per tracked balance asset, one shared loop
//! for the batched price category.
//!
//! The scheduler owns every task handle. At most one live task exists per
//! key; issuing a new fetch for a key revokes the prior task's token before
//! the new task is spawned, so a superseded fetch can never overwrite the
//! state written by its replacement. Cancellation is cooperative: loops check
//! their token before and after every await and simply return when it is set.
//!
//! Balance loops are on-demand: fetch once on trigger, go dormant on
//! success, and only keep looping while a failure is outstanding, retrying at
//! the store's backoff delay. The price loop is perpetual: fetch, sleep the
//! poll interval (or the backoff delay after a failure), repeat.

mod cancel;

pub use cancel::CancelToken;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::backoff::BackoffTracker;
use crate::cache::PersistentCache;
use crate::config::SyncConfig;
use crate::errors::{ChainFetchError, SyncError};
use crate::format;
use crate::models::{AssetId, AssetState};
use crate::provider::{
    BalanceAggregator, ChainBalanceProvider, FiatPriceProvider, PriceAggregator,
};
use crate::store::AssetStateStore;

/// What a manual refresh applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshTarget {
    Asset(AssetId),
    All,
}

/// Where one asset's balance comes from: the watched address and the
/// ordered provider chain that can resolve it.
pub struct BalanceRoute {
    pub address: String,
    pub providers: Vec<Arc<dyn ChainBalanceProvider>>,
}

/// Resolved route: the provider chain wrapped in a failover aggregator
/// carrying the configured per-call timeout.
#[derive(Clone)]
struct Route {
    address: String,
    aggregator: Arc<BalanceAggregator>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum TaskKey {
    Balance(AssetId),
    Price,
}

struct TaskHandle {
    token: CancelToken,
    join: JoinHandle<()>,
}

/// Live task handles, at most one per key.
#[derive(Default)]
struct TaskRegistry {
    tasks: Mutex<HashMap<TaskKey, TaskHandle>>,
}

impl TaskRegistry {
    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<TaskKey, TaskHandle>> {
        self.tasks.lock().unwrap_or_else(|poisoned| {
            warn!("task registry mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Revoke the prior task for `key`, then spawn `future` as its
    /// replacement. The prior token is cancelled before the new task runs,
    /// so the old task can never observe a world where it is still current.
    fn replace<F>(&self, key: TaskKey, make: impl FnOnce(CancelToken) -> F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.lock_tasks();
        if let Some(prior) = tasks.remove(&key) {
            prior.token.cancel();
        }
        let token = CancelToken::new();
        let join = tokio::spawn(make(token.clone()));
        tasks.insert(key, TaskHandle { token, join });
    }

    fn cancel_all(&self) {
        let mut tasks = self.lock_tasks();
        for handle in tasks.values() {
            handle.token.cancel();
        }
        tasks.clear();
    }

    fn live_count(&self) -> usize {
        self.lock_tasks()
            .values()
            .filter(|h| !h.join.is_finished())
            .count()
    }
}

pub struct FetchScheduler {
    config: SyncConfig,
    routes: HashMap<AssetId, Route>,
    price_aggregator: Arc<PriceAggregator>,
    balance_store: Arc<AssetStateStore>,
    price_store: Arc<AssetStateStore>,
    tasks: TaskRegistry,
    tracked: Mutex<HashSet<AssetId>>,
}

impl FetchScheduler {
    /// Build the whole fetch stack from one [`SyncConfig`]: stores carry the
    /// configured freshness window and backoff profiles, aggregators carry
    /// the configured per-call timeout. Every config field is consumed here.
    pub fn new(
        config: SyncConfig,
        routes: HashMap<AssetId, BalanceRoute>,
        price_providers: Vec<Arc<dyn FiatPriceProvider>>,
        balance_cache: Arc<dyn PersistentCache>,
        price_cache: Arc<dyn PersistentCache>,
    ) -> Self {
        let balance_store = Arc::new(AssetStateStore::new(
            balance_cache,
            config.cache_freshness,
            config.balance_backoff.clone(),
        ));
        let price_store = Arc::new(AssetStateStore::new(
            price_cache,
            config.cache_freshness,
            config.price_backoff.clone(),
        ));
        let price_aggregator = Arc::new(PriceAggregator::new(
            price_providers,
            config.provider_timeout,
        ));
        let routes = routes
            .into_iter()
            .map(|(asset, route)| {
                let aggregator = Arc::new(BalanceAggregator::new(
                    route.providers,
                    config.provider_timeout,
                ));
                (
                    asset,
                    Route {
                        address: route.address,
                        aggregator,
                    },
                )
            })
            .collect();
        Self {
            config,
            routes,
            price_aggregator,
            balance_store,
            price_store,
            tasks: TaskRegistry::default(),
            tracked: Mutex::new(HashSet::new()),
        }
    }

    /// The balance-side store, for subscriptions and direct reads.
    pub fn balance_store(&self) -> Arc<AssetStateStore> {
        self.balance_store.clone()
    }

    /// The price-side store, for subscriptions and direct reads.
    pub fn price_store(&self) -> Arc<AssetStateStore> {
        self.price_store.clone()
    }

    fn lock_tracked(&self) -> MutexGuard<'_, HashSet<AssetId>> {
        self.tracked.lock().unwrap_or_else(|poisoned| {
            warn!("tracked-set mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Seed both stores from their persistent caches so last known values
    /// render before any network round trip completes.
    pub async fn prime(&self) {
        self.balance_store.prime_from_cache().await;
        self.price_store.prime_from_cache().await;
    }

    /// Begin tracking `assets`: spawn a balance fetch per asset and
    /// (re)start the shared price loop over the full tracked set. Every
    /// asset must have a configured route.
    pub fn start_tracking(&self, assets: &HashSet<AssetId>) -> Result<(), SyncError> {
        for &asset in assets {
            let route = self
                .routes
                .get(&asset)
                .ok_or(SyncError::MissingProvider(asset))?;
            if route.address.trim().is_empty() {
                return Err(SyncError::MissingAddress(asset));
            }
        }

        {
            let mut tracked = self.lock_tracked();
            tracked.extend(assets.iter().copied());
        }

        for &asset in assets {
            self.balance_store.begin_tracking(asset);
            self.price_store.begin_tracking(asset);
            self.spawn_balance_fetch(asset);
        }
        self.restart_price_loop();
        info!("tracking {} assets", self.lock_tracked().len());
        Ok(())
    }

    /// Manually trigger a refresh. A per-asset target respawns that asset's
    /// balance fetch; `All` respawns every tracked balance fetch and
    /// restarts the price loop, which begins with an immediate fetch.
    pub fn refresh_now(&self, target: RefreshTarget) -> Result<(), SyncError> {
        match target {
            RefreshTarget::Asset(asset) => {
                if !self.routes.contains_key(&asset) {
                    return Err(SyncError::MissingProvider(asset));
                }
                debug!("manual refresh for {asset}");
                self.spawn_balance_fetch(asset);
            }
            RefreshTarget::All => {
                debug!("manual refresh for all tracked assets");
                let tracked: Vec<AssetId> = self.lock_tracked().iter().copied().collect();
                for asset in tracked {
                    self.spawn_balance_fetch(asset);
                }
                self.restart_price_loop();
            }
        }
        Ok(())
    }

    /// Lock/background path: revoke every task and drop every state entry.
    /// The tracked set survives so [`resume`](Self::resume) can restart.
    pub fn stop_all(&self) {
        info!("stopping all synchronization tasks");
        self.tasks.cancel_all();
        self.balance_store.clear_all();
        self.price_store.clear_all();
    }

    /// Unlock/foreground path: re-prime from cache and restart tracking
    /// from scratch rather than resuming old tasks.
    pub async fn resume(&self) -> Result<(), SyncError> {
        self.prime().await;
        let tracked: HashSet<AssetId> = self.lock_tracked().iter().copied().collect();
        if tracked.is_empty() {
            return Ok(());
        }
        self.start_tracking(&tracked)
    }

    /// Number of spawned tasks that have not yet run to completion.
    pub fn live_task_count(&self) -> usize {
        self.tasks.live_count()
    }

    pub fn balance_states(&self) -> HashMap<AssetId, AssetState> {
        self.balance_store.snapshot()
    }

    pub fn price_states(&self) -> HashMap<AssetId, AssetState> {
        self.price_store.snapshot()
    }

    fn spawn_balance_fetch(&self, asset: AssetId) {
        let Some(route) = self.routes.get(&asset).cloned() else {
            warn!("no balance route for {asset}, skipping");
            return;
        };
        let store = self.balance_store.clone();
        self.tasks.replace(TaskKey::Balance(asset), move |token| {
            run_balance_loop(asset, route, store, token)
        });
    }

    fn restart_price_loop(&self) {
        let assets: HashSet<AssetId> = self.lock_tracked().iter().copied().collect();
        if assets.is_empty() {
            return;
        }
        let aggregator = self.price_aggregator.clone();
        let store = self.price_store.clone();
        let poll_interval = self.config.price_poll_interval;
        let profile = self.config.price_backoff.clone();
        self.tasks.replace(TaskKey::Price, move |token| {
            run_price_loop(assets, aggregator, store, poll_interval, profile, token)
        });
    }
}

/// One-shot balance fetch that keeps retrying at the backoff delay while a
/// failure is outstanding, and goes dormant on success.
async fn run_balance_loop(
    asset: AssetId,
    route: Route,
    store: Arc<AssetStateStore>,
    token: CancelToken,
) {
    loop {
        if token.is_cancelled() {
            return;
        }
        store.apply_loading(asset);

        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = route.aggregator.fetch(asset, &route.address) => result,
        };
        if token.is_cancelled() {
            return;
        }

        match result {
            Ok(value) => {
                store.apply_success(asset, value).await;
                return;
            }
            Err(e) => {
                warn!("balance fetch for {asset} failed: {e}");
                store.apply_failure(asset, &e.reason());
                let delay = store.backoff_failure(asset, e.is_rate_limited());
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Perpetual batched price loop: fetch, report per asset, sleep the poll
/// interval or the shared backoff delay, repeat until cancelled.
async fn run_price_loop(
    assets: HashSet<AssetId>,
    aggregator: Arc<PriceAggregator>,
    store: Arc<AssetStateStore>,
    poll_interval: std::time::Duration,
    profile: crate::backoff::BackoffProfile,
    token: CancelToken,
) {
    let mut backoff = BackoffTracker::new(profile);
    loop {
        if token.is_cancelled() {
            return;
        }
        for &asset in &assets {
            store.apply_loading(asset);
        }

        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = aggregator.fetch(&assets) => result,
        };
        if token.is_cancelled() {
            return;
        }

        // Per-asset commits interleave with awaits (cache writes), so the
        // token is re-checked before every single write: a revoked loop must
        // not put entries back into a store that was just cleared.
        let delay = match result {
            Ok(prices) => {
                for &asset in &assets {
                    if token.is_cancelled() {
                        return;
                    }
                    match prices.get(&asset) {
                        Some(&usd) => {
                            store.apply_success(asset, format::fiat_price(usd)).await;
                        }
                        None => {
                            let e = ChainFetchError::InvalidPayload(
                                "no quote available".to_string(),
                            );
                            store.apply_failure(asset, &e.reason());
                        }
                    }
                }
                backoff.register_success();
                poll_interval
            }
            Err(e) => {
                warn!("batched price fetch failed: {e}");
                for &asset in &assets {
                    if token.is_cancelled() {
                        return;
                    }
                    store.apply_failure(asset, &e.reason());
                }
                backoff.register_failure(e.is_rate_limited())
            }
        };

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_registry_replace_revokes_prior_task() {
        let registry = TaskRegistry::default();
        let first = CancelToken::new();
        let observer = first.clone();

        registry.replace(TaskKey::Price, {
            let first = first.clone();
            move |token| async move {
                // Adopt the registry token so revocation is observable.
                tokio::select! {
                    _ = token.cancelled() => first.cancel(),
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                }
            }
        });
        registry.replace(TaskKey::Price, |token| async move {
            token.cancelled().await;
        });

        tokio::time::timeout(Duration::from_secs(1), observer.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_all_revokes_everything() {
        let registry = TaskRegistry::default();
        for asset in [AssetId::Bitcoin, AssetId::Ethereum] {
            registry.replace(TaskKey::Balance(asset), |token| async move {
                token.cancelled().await;
            });
        }
        registry.replace(TaskKey::Price, |token| async move {
            token.cancelled().await;
        });

        registry.cancel_all();
        // Cooperative: give the tasks a beat to observe their tokens.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.live_count(), 0);
    }

    #[tokio::test]
    async fn test_live_count_ignores_finished_tasks() {
        let registry = TaskRegistry::default();
        registry.replace(TaskKey::Balance(AssetId::Bitcoin), |_token| async {});
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.live_count(), 0);
    }
}
