//! CoinGecko batched fiat price provider.
//!
//! One `simple/price` call quotes every requested asset. Requests are keyed
//! by CoinGecko listing id, so testnet assets collapse onto their mainnet
//! feed before the call and fan back out afterwards.

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;

use super::FiatPriceProvider;
use crate::errors::ChainFetchError;
use crate::models::AssetId;

const BASE_URL: &str = "https://api.coingecko.com/api/v3";

pub struct CoinGeckoProvider {
    client: reqwest::Client,
    base_url: String,
}

impl CoinGeckoProvider {
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

impl Default for CoinGeckoProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Deduplicated, deterministically ordered listing ids for a request.
fn listing_ids(assets: &HashSet<AssetId>) -> BTreeSet<&'static str> {
    assets.iter().map(|a| a.price_feed_id()).collect()
}

/// Fan a `{listing_id: {"usd": price}}` payload back out to the requested
/// assets. Assets the payload does not quote are absent from the result.
fn prices_from_payload(
    payload: &Value,
    assets: &HashSet<AssetId>,
) -> Result<HashMap<AssetId, f64>, ChainFetchError> {
    let object = payload.as_object().ok_or_else(|| {
        ChainFetchError::InvalidPayload("price payload is not a JSON object".to_string())
    })?;

    let mut prices = HashMap::new();
    for &asset in assets {
        if let Some(quote) = object.get(asset.price_feed_id()) {
            let usd = quote.get("usd").and_then(Value::as_f64).ok_or_else(|| {
                ChainFetchError::InvalidPayload(format!(
                    "quote for '{}' has no usd price",
                    asset.price_feed_id()
                ))
            })?;
            prices.insert(asset, usd);
        }
    }

    if prices.is_empty() && !assets.is_empty() {
        return Err(ChainFetchError::InvalidPayload(
            "price payload quoted none of the requested assets".to_string(),
        ));
    }
    Ok(prices)
}

#[async_trait]
impl FiatPriceProvider for CoinGeckoProvider {
    fn id(&self) -> &'static str {
        "COINGECKO"
    }

    async fn fetch_prices(
        &self,
        assets: &HashSet<AssetId>,
    ) -> Result<HashMap<AssetId, f64>, ChainFetchError> {
        if assets.is_empty() {
            return Ok(HashMap::new());
        }

        let ids = listing_ids(assets).into_iter().collect::<Vec<_>>().join(",");
        let url = format!("{}/simple/price", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("ids", ids.as_str()), ("vs_currencies", "usd")])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ChainFetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(ChainFetchError::InvalidStatus(status.as_u16()));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ChainFetchError::InvalidPayload(e.to_string()))?;

        prices_from_payload(&payload, assets)
    }
}
