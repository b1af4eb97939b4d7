//! Canonical asset identity.
//!
//! Every balance or price line the engine tracks is keyed by an [`AssetId`].
//! The set is closed and known at compile time; free-form chain strings from
//! wallet configuration are validated into this enum at the system edge via
//! [`AssetId::from_config_key`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier for one tracked balance or price line.
///
/// Testnet variants are distinct assets (they hold distinct balances) but
/// share their mainnet price feed, see [`price_feed_id`](Self::price_feed_id).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetId {
    Bitcoin,
    BitcoinTestnet,
    Litecoin,
    Dogecoin,
    Ethereum,
    EthereumSepolia,
    Polygon,
    Bnb,
    Avalanche,
    Solana,
    Xrp,
}

impl AssetId {
    /// Every supported asset, in display order.
    pub const ALL: [AssetId; 11] = [
        AssetId::Bitcoin,
        AssetId::BitcoinTestnet,
        AssetId::Litecoin,
        AssetId::Dogecoin,
        AssetId::Ethereum,
        AssetId::EthereumSepolia,
        AssetId::Polygon,
        AssetId::Bnb,
        AssetId::Avalanche,
        AssetId::Solana,
        AssetId::Xrp,
    ];

    /// Ticker symbol used when formatting balances.
    pub fn symbol(&self) -> &'static str {
        match self {
            AssetId::Bitcoin => "BTC",
            AssetId::BitcoinTestnet => "tBTC",
            AssetId::Litecoin => "LTC",
            AssetId::Dogecoin => "DOGE",
            AssetId::Ethereum => "ETH",
            AssetId::EthereumSepolia => "sepETH",
            AssetId::Polygon => "MATIC",
            AssetId::Bnb => "BNB",
            AssetId::Avalanche => "AVAX",
            AssetId::Solana => "SOL",
            AssetId::Xrp => "XRP",
        }
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            AssetId::Bitcoin => "Bitcoin",
            AssetId::BitcoinTestnet => "Bitcoin Testnet",
            AssetId::Litecoin => "Litecoin",
            AssetId::Dogecoin => "Dogecoin",
            AssetId::Ethereum => "Ethereum",
            AssetId::EthereumSepolia => "Ethereum Sepolia",
            AssetId::Polygon => "Polygon",
            AssetId::Bnb => "BNB Chain",
            AssetId::Avalanche => "Avalanche",
            AssetId::Solana => "Solana",
            AssetId::Xrp => "XRP",
        }
    }

    /// Number of base units per whole coin, as a power of ten.
    pub fn decimals(&self) -> u32 {
        match self {
            AssetId::Bitcoin
            | AssetId::BitcoinTestnet
            | AssetId::Litecoin
            | AssetId::Dogecoin => 8,
            AssetId::Ethereum
            | AssetId::EthereumSepolia
            | AssetId::Polygon
            | AssetId::Bnb
            | AssetId::Avalanche => 18,
            AssetId::Solana => 9,
            AssetId::Xrp => 6,
        }
    }

    /// Precision used when rendering a balance for this asset.
    pub fn display_decimals(&self) -> u32 {
        match self {
            AssetId::Bitcoin
            | AssetId::BitcoinTestnet
            | AssetId::Litecoin
            | AssetId::Dogecoin => 8,
            AssetId::Ethereum
            | AssetId::EthereumSepolia
            | AssetId::Polygon
            | AssetId::Bnb
            | AssetId::Avalanche => 6,
            AssetId::Solana => 4,
            AssetId::Xrp => 6,
        }
    }

    pub fn is_testnet(&self) -> bool {
        matches!(self, AssetId::BitcoinTestnet | AssetId::EthereumSepolia)
    }

    /// CoinGecko feed identifier. Testnet variants reuse their mainnet feed:
    /// a testnet coin has no market of its own, and showing the mainnet price
    /// beats showing nothing.
    pub fn price_feed_id(&self) -> &'static str {
        match self {
            AssetId::Bitcoin | AssetId::BitcoinTestnet => "bitcoin",
            AssetId::Litecoin => "litecoin",
            AssetId::Dogecoin => "dogecoin",
            AssetId::Ethereum | AssetId::EthereumSepolia => "ethereum",
            AssetId::Polygon => "matic-network",
            AssetId::Bnb => "binancecoin",
            AssetId::Avalanche => "avalanche-2",
            AssetId::Solana => "solana",
            AssetId::Xrp => "ripple",
        }
    }

    /// Exchange ticker used by rate-table feeds (Coinbase). Testnets map to
    /// their mainnet ticker for the same reason as [`price_feed_id`](Self::price_feed_id).
    pub fn price_ticker(&self) -> &'static str {
        match self {
            AssetId::Bitcoin | AssetId::BitcoinTestnet => "BTC",
            AssetId::Litecoin => "LTC",
            AssetId::Dogecoin => "DOGE",
            AssetId::Ethereum | AssetId::EthereumSepolia => "ETH",
            AssetId::Polygon => "MATIC",
            AssetId::Bnb => "BNB",
            AssetId::Avalanche => "AVAX",
            AssetId::Solana => "SOL",
            AssetId::Xrp => "XRP",
        }
    }

    /// Validation boundary for wallet configuration. Accepts the kebab-case
    /// keys used in config files and returns `None` for anything unknown.
    pub fn from_config_key(key: &str) -> Option<AssetId> {
        match key {
            "bitcoin" => Some(AssetId::Bitcoin),
            "bitcoin-testnet" => Some(AssetId::BitcoinTestnet),
            "litecoin" => Some(AssetId::Litecoin),
            "dogecoin" => Some(AssetId::Dogecoin),
            "ethereum" => Some(AssetId::Ethereum),
            "ethereum-sepolia" => Some(AssetId::EthereumSepolia),
            "polygon" => Some(AssetId::Polygon),
            "bnb" => Some(AssetId::Bnb),
            "avalanche" => Some(AssetId::Avalanche),
            "solana" => Some(AssetId::Solana),
            "xrp" => Some(AssetId::Xrp),
            _ => None,
        }
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
