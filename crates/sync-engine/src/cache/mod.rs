//! Persistent cache capability.
//!
//! The engine persists every successful fetch so a restart never begins from
//! a blank screen. The storage format is the host's concern; the engine only
//! depends on this trait. Cache failures are logged by the store and never
//! interrupt synchronization.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{AssetId, CachedValue};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::Corrupt(e.to_string())
    }
}

/// Storage for last known-good values, keyed by asset.
#[async_trait]
pub trait PersistentCache: Send + Sync {
    /// Load every persisted entry. Called once, at startup priming.
    async fn load(&self) -> Result<HashMap<AssetId, CachedValue>, CacheError>;

    /// Persist one entry. Called after every successful fetch.
    async fn save(&self, asset: AssetId, value: &CachedValue) -> Result<(), CacheError>;
}

/// In-memory cache. Used in tests and by hosts that opt out of persistence.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<AssetId, CachedValue>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: HashMap<AssetId, CachedValue>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }
}

#[async_trait]
impl PersistentCache for MemoryCache {
    async fn load(&self) -> Result<HashMap<AssetId, CachedValue>, CacheError> {
        Ok(self.entries.read().await.clone())
    }

    async fn save(&self, asset: AssetId, value: &CachedValue) -> Result<(), CacheError> {
        self.entries.write().await.insert(asset, value.clone());
        Ok(())
    }
}
