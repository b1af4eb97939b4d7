//! JSON-RPC `eth_getBalance` provider for EVM chains.
//!
//! One provider instance serves one chain; the RPC endpoint is chosen from
//! the asset at construction. The node returns the balance as a hex-encoded
//! wei quantity which is scaled down by 18 decimals.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use super::ChainBalanceProvider;
use crate::errors::ChainFetchError;
use crate::format;
use crate::models::{AssetId, DisplayValue};

const WEI_DECIMALS: u32 = 18;

pub struct EvmRpcProvider {
    client: reqwest::Client,
    asset: AssetId,
    rpc_url: String,
}

impl EvmRpcProvider {
    /// Provider for an EVM asset, routed to a public RPC endpoint for its
    /// chain.
    pub fn new(asset: AssetId) -> Self {
        let rpc_url = match asset {
            AssetId::EthereumSepolia => "https://ethereum-sepolia-rpc.publicnode.com",
            AssetId::Polygon => "https://polygon-rpc.com",
            AssetId::Bnb => "https://bsc-dataseed.binance.org",
            AssetId::Avalanche => "https://api.avax.network/ext/bc/C/rpc",
            _ => "https://ethereum-rpc.publicnode.com",
        };
        Self::with_rpc_url(asset, rpc_url)
    }

    pub fn with_rpc_url(asset: AssetId, rpc_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            asset,
            rpc_url: rpc_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

fn validate_address(address: &str) -> Result<&str, ChainFetchError> {
    let trimmed = address.trim();
    let hex = trimmed.strip_prefix("0x").unwrap_or("");
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ChainFetchError::InvalidRequest(format!(
            "malformed EVM address: {address:?}"
        )));
    }
    Ok(trimmed)
}

/// Parse a `0x`-prefixed hex wei quantity into a native-unit amount.
fn parse_hex_wei(quantity: &str) -> Result<Decimal, ChainFetchError> {
    let hex = quantity.strip_prefix("0x").ok_or_else(|| {
        ChainFetchError::InvalidPayload(format!("balance quantity missing 0x prefix: {quantity:?}"))
    })?;
    let wei = u128::from_str_radix(hex, 16)
        .map_err(|e| ChainFetchError::InvalidPayload(format!("bad hex quantity {quantity:?}: {e}")))?;
    let wei = i128::try_from(wei).map_err(|_| {
        ChainFetchError::InvalidPayload(format!("balance overflows supported range: {quantity:?}"))
    })?;
    Decimal::try_from_i128_with_scale(wei, WEI_DECIMALS).map_err(|e| {
        ChainFetchError::InvalidPayload(format!("balance overflows supported range: {e}"))
    })
}

#[async_trait]
impl ChainBalanceProvider for EvmRpcProvider {
    fn id(&self) -> &'static str {
        "EVM_RPC"
    }

    async fn fetch_balance(&self, address: &str) -> Result<DisplayValue, ChainFetchError> {
        let address = validate_address(address)?;

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_getBalance",
            "params": [address, "latest"],
        });

        let response = self.client.post(&self.rpc_url).json(&body).send().await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ChainFetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(ChainFetchError::InvalidStatus(status.as_u16()));
        }

        let rpc: RpcResponse = response
            .json()
            .await
            .map_err(|e| ChainFetchError::InvalidPayload(e.to_string()))?;

        if let Some(error) = rpc.error {
            // Nodes signal throttling in-band as error -32005.
            if error.code == -32005 {
                return Err(ChainFetchError::RateLimited);
            }
            return Err(ChainFetchError::InvalidResponse(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        let quantity = rpc.result.ok_or_else(|| {
            ChainFetchError::InvalidPayload("RPC response carried neither result nor error".to_string())
        })?;

        Ok(format::balance(self.asset, parse_hex_wei(&quantity)?))
    }
}
