//! Blockstream esplora balance provider for Bitcoin and Bitcoin testnet.
//!
//! Balance is derived from the address stats endpoint as
//! `funded_txo_sum - spent_txo_sum`, in satoshis.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::ChainBalanceProvider;
use crate::errors::ChainFetchError;
use crate::format;
use crate::models::{AssetId, DisplayValue};

const MAINNET_BASE_URL: &str = "https://blockstream.info/api";
const TESTNET_BASE_URL: &str = "https://blockstream.info/testnet/api";

const SATS_PER_BTC: u64 = 100_000_000;

pub struct BlockstreamProvider {
    client: reqwest::Client,
    asset: AssetId,
    base_url: String,
}

impl BlockstreamProvider {
    /// Provider for `asset`, which must be [`AssetId::Bitcoin`] or
    /// [`AssetId::BitcoinTestnet`]; the testnet variant routes to the
    /// testnet esplora instance.
    pub fn new(asset: AssetId) -> Self {
        let base_url = match asset {
            AssetId::BitcoinTestnet => TESTNET_BASE_URL,
            _ => MAINNET_BASE_URL,
        };
        Self::with_base_url(asset, base_url)
    }

    pub fn with_base_url(asset: AssetId, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            asset,
            base_url: base_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AddressStats {
    chain_stats: ChainStats,
}

#[derive(Debug, Deserialize)]
struct ChainStats {
    funded_txo_sum: u64,
    spent_txo_sum: u64,
}

fn validate_address(address: &str) -> Result<(), ChainFetchError> {
    let trimmed = address.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ChainFetchError::InvalidRequest(format!(
            "malformed Bitcoin address: {address:?}"
        )));
    }
    Ok(())
}

fn sats_to_btc(sats: u64) -> Decimal {
    Decimal::from(sats) / Decimal::from(SATS_PER_BTC)
}

#[async_trait]
impl ChainBalanceProvider for BlockstreamProvider {
    fn id(&self) -> &'static str {
        "BLOCKSTREAM"
    }

    async fn fetch_balance(&self, address: &str) -> Result<DisplayValue, ChainFetchError> {
        validate_address(address)?;

        let url = format!("{}/address/{}", self.base_url, address.trim());
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ChainFetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(ChainFetchError::InvalidStatus(status.as_u16()));
        }

        let stats: AddressStats = response
            .json()
            .await
            .map_err(|e| ChainFetchError::InvalidPayload(e.to_string()))?;

        let sats = stats
            .chain_stats
            .funded_txo_sum
            .saturating_sub(stats.chain_stats.spent_txo_sum);

        Ok(format::balance(self.asset, sats_to_btc(sats)))
    }
}
