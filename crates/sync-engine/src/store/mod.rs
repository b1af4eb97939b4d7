//! Observable state store for tracked assets.
//!
//! One store instance serves one category (balances or prices). It owns the
//! renderable [`AssetState`] per asset, the per-asset retry backoff for that
//! category, and the write path into the persistent cache. Every state
//! transition is broadcast to subscribers so the UI re-renders exactly the
//! lines that changed.
//!
//! Transitions are chosen from what the asset already has: a failure after a
//! value was ever obtained degrades to `Stale` and keeps the old value on
//! screen; a failure before any value leaves `Failed`. Cache writes happen
//! outside the state lock and a cache error is logged, never propagated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, warn};
use tokio::sync::broadcast;

use crate::backoff::{BackoffProfile, BackoffRegistry};
use crate::cache::PersistentCache;
use crate::models::{AssetId, AssetState, CachedValue, DisplayValue};

/// Stale-reason caption used while a primed-from-cache value awaits its
/// first live refresh.
pub const PRIMED_STALE_REASON: &str = "Updating…";

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// One broadcast state transition.
#[derive(Clone, Debug)]
pub struct StateChange {
    pub asset: AssetId,
    pub state: AssetState,
}

struct StoreEntry {
    state: AssetState,
    cached: Option<CachedValue>,
}

pub struct AssetStateStore {
    entries: Mutex<HashMap<AssetId, StoreEntry>>,
    backoff: BackoffRegistry,
    cache: Arc<dyn PersistentCache>,
    cache_freshness: Duration,
    changes: broadcast::Sender<StateChange>,
}

impl AssetStateStore {
    pub fn new(
        cache: Arc<dyn PersistentCache>,
        cache_freshness: Duration,
        backoff_profile: BackoffProfile,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            backoff: BackoffRegistry::new(backoff_profile),
            cache,
            cache_freshness,
            changes,
        }
    }

    /// Subscribe to state transitions. A lagged receiver misses changes but
    /// can always resynchronize from [`snapshot`](Self::snapshot).
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<AssetId, StoreEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("state store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn publish(&self, asset: AssetId, state: AssetState) {
        // Send only fails when nobody is subscribed, which is fine.
        let _ = self.changes.send(StateChange { asset, state });
    }

    /// Seed states from the persistent cache so a restart shows last known
    /// values immediately. Entries fresher than the freshness window render
    /// as `Loaded`; older ones render as `Stale` awaiting their first live
    /// refresh. Tracked assets stay untouched if already present.
    pub async fn prime_from_cache(&self) {
        let persisted = match self.cache.load().await {
            Ok(persisted) => persisted,
            Err(e) => {
                error!("failed to load persistent cache, starting cold: {e}");
                return;
            }
        };

        let now = Utc::now();
        let mut entries = self.lock_entries();
        for (asset, cached) in persisted {
            if entries.contains_key(&asset) {
                continue;
            }
            let age = now
                .signed_duration_since(cached.last_updated)
                .to_std()
                .unwrap_or_default();
            let state = if age <= self.cache_freshness {
                AssetState::Loaded {
                    value: cached.value.clone(),
                    at: cached.last_updated,
                }
            } else {
                AssetState::Stale {
                    value: cached.value.clone(),
                    at: cached.last_updated,
                    reason: PRIMED_STALE_REASON.to_string(),
                }
            };
            debug!("primed {asset} from cache (age {age:?})");
            entries.insert(
                asset,
                StoreEntry {
                    state: state.clone(),
                    cached: Some(cached),
                },
            );
            self.publish(asset, state);
        }
    }

    /// Ensure an entry exists for `asset`, starting at `Idle`.
    pub fn begin_tracking(&self, asset: AssetId) {
        let mut entries = self.lock_entries();
        if !entries.contains_key(&asset) {
            entries.insert(
                asset,
                StoreEntry {
                    state: AssetState::Idle,
                    cached: None,
                },
            );
            self.publish(asset, AssetState::Idle);
        }
    }

    /// Mark a fetch as in flight: `Loading` when nothing was ever shown,
    /// `Refreshing` when a value exists to keep on screen.
    pub fn apply_loading(&self, asset: AssetId) {
        let mut entries = self.lock_entries();
        let entry = entries.entry(asset).or_insert(StoreEntry {
            state: AssetState::Idle,
            cached: None,
        });

        let state = match entry.state.display_value() {
            Some(previous) => AssetState::Refreshing {
                previous: previous.clone(),
                since: Utc::now(),
            },
            None => AssetState::Loading,
        };
        entry.state = state.clone();
        drop(entries);
        self.publish(asset, state);
    }

    /// Record a successful fetch: transition to `Loaded`, reset the asset's
    /// backoff curve, and persist the value.
    pub async fn apply_success(&self, asset: AssetId, value: DisplayValue) {
        let now = Utc::now();
        let cached = CachedValue::new(value.clone(), now);
        let state = AssetState::Loaded { value, at: now };

        {
            let mut entries = self.lock_entries();
            entries.insert(
                asset,
                StoreEntry {
                    state: state.clone(),
                    cached: Some(cached.clone()),
                },
            );
        }
        self.backoff.register_success(asset);
        self.publish(asset, state);

        if let Err(e) = self.cache.save(asset, &cached).await {
            error!("failed to persist {asset} value: {e}");
        }
    }

    /// Record a failed fetch: degrade to `Stale` when any value was ever
    /// obtained, otherwise `Failed`. The displayed value never blanks.
    pub fn apply_failure(&self, asset: AssetId, reason: &str) {
        let mut entries = self.lock_entries();
        let entry = entries.entry(asset).or_insert(StoreEntry {
            state: AssetState::Idle,
            cached: None,
        });

        let state = match &entry.cached {
            Some(cached) => AssetState::Stale {
                value: cached.value.clone(),
                at: cached.last_updated,
                reason: reason.to_string(),
            },
            None => match entry.state.display_value() {
                // A value is on screen (e.g. primed) even without a local
                // cached copy; keep it.
                Some(previous) => AssetState::Stale {
                    value: previous.clone(),
                    at: Utc::now(),
                    reason: reason.to_string(),
                },
                None => AssetState::Failed {
                    reason: reason.to_string(),
                },
            },
        };
        entry.state = state.clone();
        drop(entries);
        self.publish(asset, state);
    }

    /// Record the failure in the backoff curve and return the delay to wait
    /// before the next attempt for this asset.
    pub fn backoff_failure(&self, asset: AssetId, rate_limited: bool) -> Duration {
        self.backoff.register_failure(asset, rate_limited)
    }

    /// Outstanding backoff delay for `asset`; zero when none applies.
    pub fn remaining_backoff(&self, asset: AssetId) -> Duration {
        self.backoff.remaining_backoff(asset)
    }

    pub fn current_state(&self, asset: AssetId) -> Option<AssetState> {
        self.lock_entries().get(&asset).map(|e| e.state.clone())
    }

    pub fn cached_value(&self, asset: AssetId) -> Option<CachedValue> {
        self.lock_entries()
            .get(&asset)
            .and_then(|e| e.cached.clone())
    }

    pub fn snapshot(&self) -> HashMap<AssetId, AssetState> {
        self.lock_entries()
            .iter()
            .map(|(asset, entry)| (*asset, entry.state.clone()))
            .collect()
    }

    pub fn entry_count(&self) -> usize {
        self.lock_entries().len()
    }

    /// Drop every entry and backoff curve. The persistent cache is left
    /// intact so a later resume can prime from it again.
    pub fn clear_all(&self) {
        self.lock_entries().clear();
        self.backoff.reset_all();
    }
}
