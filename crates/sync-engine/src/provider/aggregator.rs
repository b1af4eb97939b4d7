//! Ordered provider failover.
//!
//! The aggregators try providers in priority order and short-circuit on the
//! first success. Every call is individually time-bounded; a timeout is just
//! another failure and moves on to the next provider. When every provider
//! has failed, the *last* provider's classified error is returned verbatim,
//! never merged or averaged. No retries happen here; retry cadence belongs
//! to the backoff trackers and the scheduler.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use super::{ChainBalanceProvider, FiatPriceProvider};
use crate::errors::ChainFetchError;
use crate::models::{AssetId, DisplayValue};

fn timeout_error(provider: &str) -> ChainFetchError {
    ChainFetchError::InvalidResponse(format!("request to '{provider}' timed out"))
}

/// Failover chain for one asset's balance.
pub struct BalanceAggregator {
    providers: Vec<Arc<dyn ChainBalanceProvider>>,
    timeout: Duration,
}

impl BalanceAggregator {
    pub fn new(providers: Vec<Arc<dyn ChainBalanceProvider>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    pub async fn fetch(
        &self,
        asset: AssetId,
        address: &str,
    ) -> Result<DisplayValue, ChainFetchError> {
        let mut last_error: Option<ChainFetchError> = None;

        for provider in &self.providers {
            match tokio::time::timeout(self.timeout, provider.fetch_balance(address)).await {
                Ok(Ok(value)) => {
                    debug!("balance for {} served by '{}'", asset, provider.id());
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    warn!(
                        "provider '{}' failed for {} balance: {}, trying next",
                        provider.id(),
                        asset,
                        e
                    );
                    last_error = Some(e);
                }
                Err(_) => {
                    let e = timeout_error(provider.id());
                    warn!("provider '{}' timed out for {} balance", provider.id(), asset);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ChainFetchError::InvalidRequest(format!("no providers configured for {asset}"))
        }))
    }
}

/// Failover chain for the batched fiat price category.
pub struct PriceAggregator {
    providers: Vec<Arc<dyn FiatPriceProvider>>,
    timeout: Duration,
}

impl PriceAggregator {
    pub fn new(providers: Vec<Arc<dyn FiatPriceProvider>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    pub async fn fetch(
        &self,
        assets: &HashSet<AssetId>,
    ) -> Result<HashMap<AssetId, f64>, ChainFetchError> {
        let mut last_error: Option<ChainFetchError> = None;

        for provider in &self.providers {
            match tokio::time::timeout(self.timeout, provider.fetch_prices(assets)).await {
                Ok(Ok(prices)) => {
                    debug!(
                        "prices for {} assets served by '{}'",
                        prices.len(),
                        provider.id()
                    );
                    return Ok(prices);
                }
                Ok(Err(e)) => {
                    warn!(
                        "price provider '{}' failed: {}, trying next",
                        provider.id(),
                        e
                    );
                    last_error = Some(e);
                }
                Err(_) => {
                    let e = timeout_error(provider.id());
                    warn!("price provider '{}' timed out", provider.id());
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ChainFetchError::InvalidRequest("no price providers configured".to_string())
        }))
    }
}
