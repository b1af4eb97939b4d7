//! Solana JSON-RPC `getBalance` provider. Balances arrive in lamports and
//! are scaled down by 9 decimals.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use super::ChainBalanceProvider;
use crate::errors::ChainFetchError;
use crate::format;
use crate::models::{AssetId, DisplayValue};

const MAINNET_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

pub struct SolanaRpcProvider {
    client: reqwest::Client,
    rpc_url: String,
}

impl SolanaRpcProvider {
    pub fn new() -> Self {
        Self::with_rpc_url(MAINNET_RPC_URL)
    }

    pub fn with_rpc_url(rpc_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_url: rpc_url.into(),
        }
    }
}

impl Default for SolanaRpcProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<BalanceResult>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct BalanceResult {
    value: u64,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

fn validate_address(address: &str) -> Result<&str, ChainFetchError> {
    let trimmed = address.trim();
    // Base58 pubkeys: no 0, O, I, l, and 32..44 chars.
    let valid = (32..=44).contains(&trimmed.len())
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() && !matches!(c, '0' | 'O' | 'I' | 'l'));
    if !valid {
        return Err(ChainFetchError::InvalidRequest(format!(
            "malformed Solana address: {address:?}"
        )));
    }
    Ok(trimmed)
}

fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL)
}

#[async_trait]
impl ChainBalanceProvider for SolanaRpcProvider {
    fn id(&self) -> &'static str {
        "SOLANA_RPC"
    }

    async fn fetch_balance(&self, address: &str) -> Result<DisplayValue, ChainFetchError> {
        let address = validate_address(address)?;

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBalance",
            "params": [address],
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
            return Err(ChainFetchError::InvalidResponse(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        let result = rpc.result.ok_or_else(|| {
            ChainFetchError::InvalidPayload("RPC response carried neither result nor error".to_string())
        })?;

        Ok(format::balance(
            AssetId::Solana,
            lamports_to_sol(result.value),
        ))
    }
}
