//! End-to-end scheduler flows over scripted providers: supersede races,
//! lock/unlock, cache priming, and the batched price loop.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;

use coinvault_sync::{
    AssetId, AssetState, AssetStateStore, BackoffProfile, BalanceRoute, CacheError, CachedValue,
    ChainBalanceProvider, ChainFetchError, DisplayValue, FetchScheduler, FiatPriceProvider,
    MemoryCache, PersistentCache, RefreshTarget, SyncConfig,
};

/// Replays a scripted sequence of results, one per call, repeating the last
/// step once the script is exhausted.
struct ScriptedBalanceProvider {
    script: Mutex<VecDeque<(Duration, Result<DisplayValue, ChainFetchError>)>>,
    last: (Duration, Result<DisplayValue, ChainFetchError>),
    calls: AtomicUsize,
}

impl ScriptedBalanceProvider {
    fn new(steps: Vec<(Duration, Result<DisplayValue, ChainFetchError>)>) -> Self {
        let last = steps
            .last()
            .cloned()
            .unwrap_or((Duration::ZERO, Err(ChainFetchError::RateLimited)));
        Self {
            script: Mutex::new(steps.into()),
            last,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainBalanceProvider for ScriptedBalanceProvider {
    fn id(&self) -> &'static str {
        "SCRIPTED"
    }

    async fn fetch_balance(&self, _address: &str) -> Result<DisplayValue, ChainFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, result) = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.last.clone());
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

struct FixedPriceProvider {
    prices: HashMap<AssetId, f64>,
}

#[async_trait]
impl FiatPriceProvider for FixedPriceProvider {
    fn id(&self) -> &'static str {
        "FIXED"
    }

    async fn fetch_prices(
        &self,
        assets: &HashSet<AssetId>,
    ) -> Result<HashMap<AssetId, f64>, ChainFetchError> {
        Ok(self
            .prices
            .iter()
            .filter(|(asset, _)| assets.contains(asset))
            .map(|(&asset, &usd)| (asset, usd))
            .collect())
    }
}

/// A cache whose writes take a while, to widen commit windows.
struct SlowSaveCache {
    inner: MemoryCache,
    save_delay: Duration,
}

#[async_trait]
impl PersistentCache for SlowSaveCache {
    async fn load(&self) -> Result<HashMap<AssetId, CachedValue>, CacheError> {
        self.inner.load().await
    }

    async fn save(&self, asset: AssetId, value: &CachedValue) -> Result<(), CacheError> {
        tokio::time::sleep(self.save_delay).await;
        self.inner.save(asset, value).await
    }
}

fn fast_config() -> SyncConfig {
    let fast_backoff = BackoffProfile {
        base: Duration::from_millis(10),
        cap: Duration::from_millis(50),
        jitter_fraction: 0.0,
        rate_limit_floor: None,
    };
    SyncConfig {
        provider_timeout: Duration::from_secs(1),
        price_poll_interval: Duration::from_secs(60),
        cache_freshness: Duration::from_secs(300),
        balance_backoff: fast_backoff.clone(),
        price_backoff: fast_backoff,
    }
}

struct Harness {
    scheduler: FetchScheduler,
    balance_store: Arc<AssetStateStore>,
    price_store: Arc<AssetStateStore>,
}

fn build(
    routes: HashMap<AssetId, BalanceRoute>,
    prices: HashMap<AssetId, f64>,
    balance_cache: Arc<dyn PersistentCache>,
    price_cache: Arc<dyn PersistentCache>,
) -> Harness {
    let scheduler = FetchScheduler::new(
        fast_config(),
        routes,
        vec![Arc::new(FixedPriceProvider { prices })],
        balance_cache,
        price_cache,
    );
    let balance_store = scheduler.balance_store();
    let price_store = scheduler.price_store();
    Harness {
        scheduler,
        balance_store,
        price_store,
    }
}

fn harness(
    asset: AssetId,
    balance_provider: Arc<ScriptedBalanceProvider>,
    prices: HashMap<AssetId, f64>,
    balance_cache: Arc<MemoryCache>,
) -> Harness {
    let routes = HashMap::from([(
        asset,
        BalanceRoute {
            address: "watched-address".to_string(),
            providers: vec![balance_provider],
        },
    )]);
    build(routes, prices, balance_cache, Arc::new(MemoryCache::new()))
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

#[tokio::test]
async fn superseded_fetch_never_overwrites_its_replacement() {
    // First call is slow and returns 1.0 BTC; the replacement is fast and
    // returns 2.0 BTC. The slow task is revoked, so 2.0 BTC must win.
    let provider = Arc::new(ScriptedBalanceProvider::new(vec![
        (
            Duration::from_millis(200),
            Ok(DisplayValue::new("1.0 BTC", dec!(1))),
        ),
        (
            Duration::ZERO,
            Ok(DisplayValue::new("2.0 BTC", dec!(2))),
        ),
    ]));
    let h = harness(
        AssetId::Bitcoin,
        provider.clone(),
        HashMap::new(),
        Arc::new(MemoryCache::new()),
    );

    h.scheduler
        .start_tracking(&HashSet::from([AssetId::Bitcoin]))
        .unwrap();
    // Let the slow fetch get in flight before superseding it.
    wait_for(|| provider.calls() >= 1).await;
    h.scheduler
        .refresh_now(RefreshTarget::Asset(AssetId::Bitcoin))
        .unwrap();

    wait_for(|| {
        matches!(
            h.balance_store.current_state(AssetId::Bitcoin),
            Some(AssetState::Loaded { .. })
        )
    })
    .await;
    // Give the revoked slow task time to (not) fire its completion.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let state = h.balance_store.current_state(AssetId::Bitcoin).unwrap();
    assert_eq!(state.display_value().unwrap().formatted, "2.0 BTC");
}

#[tokio::test]
async fn balance_loop_retries_until_success_then_goes_dormant() {
    let provider = Arc::new(ScriptedBalanceProvider::new(vec![
        (Duration::ZERO, Err(ChainFetchError::InvalidStatus(503))),
        (Duration::ZERO, Err(ChainFetchError::InvalidStatus(503))),
        (
            Duration::ZERO,
            Ok(DisplayValue::new("0.5 BTC", dec!(0.5))),
        ),
    ]));
    let h = harness(
        AssetId::Bitcoin,
        provider.clone(),
        HashMap::new(),
        Arc::new(MemoryCache::new()),
    );

    h.scheduler
        .start_tracking(&HashSet::from([AssetId::Bitcoin]))
        .unwrap();
    wait_for(|| {
        matches!(
            h.balance_store.current_state(AssetId::Bitcoin),
            Some(AssetState::Loaded { .. })
        )
    })
    .await;
    assert_eq!(provider.calls(), 3);

    // Dormant after success: no further polling.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn invalid_request_is_surfaced_immediately_and_still_retried() {
    // A malformed-address failure must show up as a visible reason right
    // away, while the loop keeps retrying like any transient failure.
    let provider = Arc::new(ScriptedBalanceProvider::new(vec![
        (
            Duration::ZERO,
            Err(ChainFetchError::InvalidRequest(
                "malformed address: xyz".to_string(),
            )),
        ),
        (
            Duration::ZERO,
            Err(ChainFetchError::InvalidRequest(
                "malformed address: xyz".to_string(),
            )),
        ),
        (
            Duration::ZERO,
            Ok(DisplayValue::new("0.5 BTC", dec!(0.5))),
        ),
    ]));
    let h = harness(
        AssetId::Bitcoin,
        provider.clone(),
        HashMap::new(),
        Arc::new(MemoryCache::new()),
    );

    let mut changes = h.balance_store.subscribe();
    h.scheduler
        .start_tracking(&HashSet::from([AssetId::Bitcoin]))
        .unwrap();

    let mut saw_invalid_request = false;
    loop {
        let change = tokio::time::timeout(Duration::from_secs(2), changes.recv())
            .await
            .unwrap()
            .unwrap();
        if let Some(reason) = change.state.failure_reason() {
            if reason.contains("invalid request") {
                saw_invalid_request = true;
            }
        }
        if matches!(change.state, AssetState::Loaded { .. }) {
            break;
        }
    }
    assert!(saw_invalid_request);
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn stop_all_leaves_zero_entries_and_zero_live_tasks() {
    // A provider that never answers keeps the balance task pending.
    let provider = Arc::new(ScriptedBalanceProvider::new(vec![(
        Duration::from_secs(30),
        Ok(DisplayValue::new("never", dec!(0))),
    )]));
    let h = harness(
        AssetId::Ethereum,
        provider,
        HashMap::from([(AssetId::Ethereum, 2500.0)]),
        Arc::new(MemoryCache::new()),
    );

    h.scheduler
        .start_tracking(&HashSet::from([AssetId::Ethereum]))
        .unwrap();
    assert!(h.scheduler.live_task_count() > 0);

    h.scheduler.stop_all();
    wait_for(|| h.scheduler.live_task_count() == 0).await;

    assert_eq!(h.balance_store.entry_count(), 0);
    assert_eq!(h.price_store.entry_count(), 0);
    assert!(h.scheduler.balance_states().is_empty());
}

#[tokio::test]
async fn cancelled_price_loop_never_resurrects_cleared_entries() {
    // Two assets share one price round trip; the price store's cache writes
    // are slow, so the loop is parked mid-commit between the two assets when
    // stop_all lands. The revoked loop must not write the second asset back
    // into the cleared store.
    let routes = HashMap::from([
        (
            AssetId::Bitcoin,
            BalanceRoute {
                address: "watched-btc".to_string(),
                providers: vec![Arc::new(ScriptedBalanceProvider::new(vec![(
                    Duration::ZERO,
                    Ok(DisplayValue::new("0.5 BTC", dec!(0.5))),
                )])) as Arc<dyn ChainBalanceProvider>],
            },
        ),
        (
            AssetId::Ethereum,
            BalanceRoute {
                address: "watched-eth".to_string(),
                providers: vec![Arc::new(ScriptedBalanceProvider::new(vec![(
                    Duration::ZERO,
                    Ok(DisplayValue::new("1.5 ETH", dec!(1.5))),
                )])) as Arc<dyn ChainBalanceProvider>],
            },
        ),
    ]);
    let h = build(
        routes,
        HashMap::from([(AssetId::Bitcoin, 64000.0), (AssetId::Ethereum, 2500.0)]),
        Arc::new(MemoryCache::new()),
        Arc::new(SlowSaveCache {
            inner: MemoryCache::new(),
            save_delay: Duration::from_millis(300),
        }),
    );

    h.scheduler
        .start_tracking(&HashSet::from([AssetId::Bitcoin, AssetId::Ethereum]))
        .unwrap();
    // The first per-asset commit lands, then the loop parks in its slow
    // cache write; revoke it right there.
    wait_for(|| {
        h.price_store
            .snapshot()
            .values()
            .any(|state| matches!(state, AssetState::Loaded { .. }))
    })
    .await;
    h.scheduler.stop_all();
    assert_eq!(h.price_store.entry_count(), 0);

    // Let the revoked loop run past its remaining commits.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.price_store.entry_count(), 0);
    assert_eq!(h.balance_store.entry_count(), 0);
}

#[tokio::test]
async fn priming_respects_the_freshness_window() {
    let fresh = CachedValue::new(
        DisplayValue::new("0.5 BTC", dec!(0.5)),
        Utc::now() - ChronoDuration::minutes(2),
    );
    let cache = Arc::new(MemoryCache::with_entries(HashMap::from([(
        AssetId::Bitcoin,
        fresh,
    )])));
    let provider = Arc::new(ScriptedBalanceProvider::new(vec![]));
    let h = harness(AssetId::Bitcoin, provider, HashMap::new(), cache);

    h.scheduler.prime().await;
    let state = h.balance_store.current_state(AssetId::Bitcoin).unwrap();
    assert!(matches!(state, AssetState::Loaded { .. }));

    // An entry past the freshness window primes as stale-awaiting-refresh.
    let old = CachedValue::new(
        DisplayValue::new("1500 XRP", dec!(1500)),
        Utc::now() - ChronoDuration::minutes(10),
    );
    let cache = Arc::new(MemoryCache::with_entries(HashMap::from([(
        AssetId::Xrp,
        old,
    )])));
    let provider = Arc::new(ScriptedBalanceProvider::new(vec![]));
    let h = harness(AssetId::Xrp, provider, HashMap::new(), cache);

    h.scheduler.prime().await;
    let state = h.balance_store.current_state(AssetId::Xrp).unwrap();
    assert!(matches!(state, AssetState::Stale { .. }));
    assert_eq!(state.display_value().unwrap().formatted, "1500 XRP");
}

#[tokio::test]
async fn price_loop_serves_every_tracked_asset_from_one_round_trip() {
    let provider = Arc::new(ScriptedBalanceProvider::new(vec![(
        Duration::ZERO,
        Ok(DisplayValue::new("0.5 BTC", dec!(0.5))),
    )]));
    let h = harness(
        AssetId::Bitcoin,
        provider,
        HashMap::from([(AssetId::Bitcoin, 64230.1)]),
        Arc::new(MemoryCache::new()),
    );

    h.scheduler
        .start_tracking(&HashSet::from([AssetId::Bitcoin]))
        .unwrap();
    wait_for(|| {
        matches!(
            h.price_store.current_state(AssetId::Bitcoin),
            Some(AssetState::Loaded { .. })
        )
    })
    .await;

    let state = h.price_store.current_state(AssetId::Bitcoin).unwrap();
    assert_eq!(state.display_value().unwrap().formatted, "$64,230.10");
}

#[tokio::test]
async fn resume_restarts_tracking_from_scratch() {
    let provider = Arc::new(ScriptedBalanceProvider::new(vec![
        (
            Duration::ZERO,
            Ok(DisplayValue::new("0.5 BTC", dec!(0.5))),
        ),
        (
            Duration::ZERO,
            Ok(DisplayValue::new("0.7 BTC", dec!(0.7))),
        ),
    ]));
    let h = harness(
        AssetId::Bitcoin,
        provider.clone(),
        HashMap::new(),
        Arc::new(MemoryCache::new()),
    );

    h.scheduler
        .start_tracking(&HashSet::from([AssetId::Bitcoin]))
        .unwrap();
    wait_for(|| {
        matches!(
            h.balance_store.current_state(AssetId::Bitcoin),
            Some(AssetState::Loaded { .. })
        )
    })
    .await;

    h.scheduler.stop_all();
    wait_for(|| h.scheduler.live_task_count() == 0).await;
    assert_eq!(h.balance_store.entry_count(), 0);

    // Resume primes the last persisted value, then refetches.
    h.scheduler.resume().await.unwrap();
    wait_for(|| provider.calls() >= 2).await;
    wait_for(|| {
        h.balance_store
            .current_state(AssetId::Bitcoin)
            .and_then(|s| s.display_value().map(|v| v.formatted.clone()))
            == Some("0.7 BTC".to_string())
    })
    .await;
}

#[tokio::test]
async fn tracking_an_unrouted_asset_is_rejected() {
    let provider = Arc::new(ScriptedBalanceProvider::new(vec![]));
    let h = harness(
        AssetId::Bitcoin,
        provider,
        HashMap::new(),
        Arc::new(MemoryCache::new()),
    );

    let err = h
        .scheduler
        .start_tracking(&HashSet::from([AssetId::Solana]))
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "no balance provider configured for Solana"
    );
    assert_eq!(h.scheduler.live_task_count(), 0);
}
