//! Error types and retry classification for the sync engine.
//!
//! Every provider failure is normalized into [`ChainFetchError`] at the
//! provider boundary; the scheduler only ever sees this taxonomy and turns it
//! into human-readable reasons on `Stale`/`Failed` states. Errors never
//! escape into the scheduler as panics or opaque boxes.

use thiserror::Error;

use crate::models::AssetId;

/// Canonical taxonomy for failures while fetching a balance or price.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainFetchError {
    /// Malformed input, e.g. a bad address. Unlikely to self-resolve, but
    /// still retried (addresses do not change mid-session) and always
    /// surfaced immediately with a visible reason.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transport-level failure: connection error, timeout, or an otherwise
    /// unreadable response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The provider answered with an unexpected HTTP status.
    #[error("unexpected HTTP status {0}")]
    InvalidStatus(u16),

    /// Transport succeeded but the body did not match the expected schema.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Explicit 429 or provider-specific throttle signal. Drives the
    /// rate-limit floor of the batched price backoff profile.
    #[error("rate limited by provider")]
    RateLimited,
}

impl ChainFetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    /// Whether the failure is likely to self-resolve on retry. Everything
    /// except `InvalidRequest` is considered transient; `InvalidRequest` is
    /// retried anyway but surfaced loudly rather than silently.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_))
    }

    /// Human-readable reason attached to `Stale`/`Failed` states.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

impl From<reqwest::Error> for ChainFetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::InvalidResponse("request timed out".to_string())
        } else if let Some(status) = e.status() {
            if status.as_u16() == 429 {
                Self::RateLimited
            } else {
                Self::InvalidStatus(status.as_u16())
            }
        } else if e.is_decode() {
            Self::InvalidPayload(e.to_string())
        } else if e.is_connect() {
            Self::InvalidResponse("connection failed".to_string())
        } else {
            Self::InvalidResponse(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ChainFetchError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}

/// Wiring mistakes caught at the validation boundary, before any task runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("no balance provider configured for {0}")]
    MissingProvider(AssetId),

    #[error("no watch address configured for {0}")]
    MissingAddress(AssetId),
}
