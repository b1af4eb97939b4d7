//! Coinbase exchange-rates fallback price provider.
//!
//! A single `exchange-rates?currency=USD` call returns asset-per-USD rates
//! for every listed ticker; the USD price is the inverse of the rate. Used
//! second in the failover order because the rate table is less precise for
//! long-tail assets.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Deserialize;

use super::FiatPriceProvider;
use crate::errors::ChainFetchError;
use crate::models::AssetId;

const BASE_URL: &str = "https://api.coinbase.com/v2";

pub struct CoinbaseProvider {
    client: reqwest::Client,
    base_url: String,
}

impl CoinbaseProvider {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for CoinbaseProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeRatesResponse {
    data: ExchangeRatesData,
}

#[derive(Debug, Deserialize)]
struct ExchangeRatesData {
    rates: HashMap<String, String>,
}

/// Invert the asset-per-USD rate table into USD prices for the requested
/// assets. Unlisted tickers and unusable rates are skipped.
fn prices_from_rates(
    rates: &HashMap<String, String>,
    assets: &HashSet<AssetId>,
) -> Result<HashMap<AssetId, f64>, ChainFetchError> {
    let mut prices = HashMap::new();
    for &asset in assets {
        if let Some(rate) = rates.get(asset.price_ticker()) {
            match rate.parse::<f64>() {
                Ok(per_usd) if per_usd.is_finite() && per_usd > 0.0 => {
                    prices.insert(asset, 1.0 / per_usd);
                }
                _ => {}
            }
        }
    }

    if prices.is_empty() && !assets.is_empty() {
        return Err(ChainFetchError::InvalidPayload(
            "rate table quoted none of the requested assets".to_string(),
        ));
    }
    Ok(prices)
}

#[async_trait]
impl FiatPriceProvider for CoinbaseProvider {
    fn id(&self) -> &'static str {
        "COINBASE"
    }

    async fn fetch_prices(
        &self,
        assets: &HashSet<AssetId>,
    ) -> Result<HashMap<AssetId, f64>, ChainFetchError> {
        if assets.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!("{}/exchange-rates", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("currency", "USD")])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ChainFetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(ChainFetchError::InvalidStatus(status.as_u16()));
        }

        let payload: ExchangeRatesResponse = response
            .json()
            .await
            .map_err(|e| ChainFetchError::InvalidPayload(e.to_string()))?;

        prices_from_rates(&payload.data.rates, assets)
    }
}
