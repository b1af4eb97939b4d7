//! Exponential backoff for failing resources.
//!
//! One [`BackoffTracker`] covers one failing resource: a single asset's
//! balance fetch, or the whole batched price round trip. Two profiles exist
//! because the two resources have very different costs: a balance retry hits
//! one endpoint for one asset, while a price retry hits an endpoint that
//! serves every tracked asset at once and must not be hammered.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::warn;
use rand::Rng;

use crate::models::AssetId;

/// Saturation point for the exponent; beyond this the cap always wins.
const MAX_EXPONENT: u32 = 20;

/// Tunable parameters for one backoff curve.
#[derive(Clone, Debug)]
pub struct BackoffProfile {
    /// Delay after the first failure.
    pub base: Duration,
    /// Upper bound on the pre-jitter delay.
    pub cap: Duration,
    /// Uniform jitter added on top, as a fraction of the computed delay.
    pub jitter_fraction: f64,
    /// Minimum delay applied when the classified failure is a rate limit.
    pub rate_limit_floor: Option<Duration>,
}

impl BackoffProfile {
    /// Fast profile for one-shot balance refresh retries.
    pub fn per_asset() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(15),
            jitter_fraction: 0.2,
            rate_limit_floor: None,
        }
    }

    /// Slow profile for the batched price loop. One price round trip serves
    /// every tracked asset, so rate limits push the delay to at least the
    /// floor.
    pub fn batched_price() -> Self {
        Self {
            base: Duration::from_secs(30),
            cap: Duration::from_secs(900),
            jitter_fraction: 0.2,
            rate_limit_floor: Some(Duration::from_secs(180)),
        }
    }
}

/// Retry-delay state for a single failing resource.
#[derive(Debug)]
pub struct BackoffTracker {
    profile: BackoffProfile,
    consecutive_failures: u32,
    next_allowed: Option<Instant>,
}

impl BackoffTracker {
    pub fn new(profile: BackoffProfile) -> Self {
        Self {
            profile,
            consecutive_failures: 0,
            next_allowed: None,
        }
    }

    /// Record a failure and return the delay until the next attempt.
    ///
    /// The pre-jitter delay is `min(base * 2^(failures - 1), cap)`, raised to
    /// the profile's rate-limit floor when `rate_limited` is set. The
    /// next-allowed deadline never moves backwards while failures accumulate.
    pub fn register_failure(&mut self, rate_limited: bool) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        let exponent = (self.consecutive_failures - 1).min(MAX_EXPONENT);
        let base_ms = self.profile.base.as_millis() as u64;
        let cap_ms = self.profile.cap.as_millis() as u64;
        let mut delay_ms = base_ms.saturating_mul(1u64 << exponent).min(cap_ms);

        if rate_limited {
            if let Some(floor) = self.profile.rate_limit_floor {
                delay_ms = delay_ms.max(floor.as_millis() as u64);
            }
        }

        delay_ms += self.jitter_ms(delay_ms);

        let now = Instant::now();
        let candidate = now + Duration::from_millis(delay_ms);
        let deadline = match self.next_allowed {
            Some(prev) if prev > candidate => prev,
            _ => candidate,
        };
        self.next_allowed = Some(deadline);

        deadline.saturating_duration_since(now)
    }

    /// Record a success, resetting the curve to its base.
    pub fn register_success(&mut self) {
        self.consecutive_failures = 0;
        self.next_allowed = None;
    }

    /// Outstanding wait before the next attempt is allowed; zero when idle.
    pub fn remaining_backoff(&self) -> Duration {
        self.next_allowed
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_in_backoff(&self) -> bool {
        self.remaining_backoff() > Duration::ZERO
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn jitter_ms(&self, delay_ms: u64) -> u64 {
        let upper = (delay_ms as f64 * self.profile.jitter_fraction) as u64;
        if upper == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..upper)
        }
    }
}

/// One [`BackoffTracker`] per asset, sharing a profile.
///
/// Thread-safe; trackers are created on demand. The state is in-memory and
/// resets on restart.
pub struct BackoffRegistry {
    profile: BackoffProfile,
    trackers: Mutex<HashMap<AssetId, BackoffTracker>>,
}

impl BackoffRegistry {
    pub fn new(profile: BackoffProfile) -> Self {
        Self {
            profile,
            trackers: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the tracker map, recovering from poison if necessary. The worst
    /// case of recovery is a slightly off retry delay, which beats panicking.
    fn lock_trackers(&self) -> MutexGuard<'_, HashMap<AssetId, BackoffTracker>> {
        self.trackers.lock().unwrap_or_else(|poisoned| {
            warn!("backoff registry mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn register_failure(&self, asset: AssetId, rate_limited: bool) -> Duration {
        let mut trackers = self.lock_trackers();
        trackers
            .entry(asset)
            .or_insert_with(|| BackoffTracker::new(self.profile.clone()))
            .register_failure(rate_limited)
    }

    pub fn register_success(&self, asset: AssetId) {
        let mut trackers = self.lock_trackers();
        if let Some(tracker) = trackers.get_mut(&asset) {
            tracker.register_success();
        }
    }

    pub fn remaining_backoff(&self, asset: AssetId) -> Duration {
        let trackers = self.lock_trackers();
        trackers
            .get(&asset)
            .map(|t| t.remaining_backoff())
            .unwrap_or(Duration::ZERO)
    }

    pub fn reset_all(&self) {
        self.lock_trackers().clear();
    }
}
