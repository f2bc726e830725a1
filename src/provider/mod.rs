//! Upstream data-provider types and collaborator seams
//!
//! The concrete HTTP clients live behind these traits so the engine can be
//! exercised in tests without a network.

pub mod candlestick;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AlertQuery;
use crate::error::Result;

pub use candlestick::CandlestickClient;

/// One token-purchase event from the stealth-money feed
///
/// Field names follow the upstream wire format; records are immutable once
/// fetched and are snapshotted verbatim into delivery records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// UTC timestamp string, `YYYY-MM-DD HH:MM:SS`
    pub time: String,
    /// Buyer wallet address
    pub address: String,
    pub buy_token_symbol: String,
    pub buy_token_address: String,
    pub txn_value: f64,
    #[serde(default)]
    pub buy_price: Option<f64>,
    #[serde(default, rename = "fundingSource")]
    pub funding_source: Option<String>,
}

/// Per-wallet trading performance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletStats {
    pub win_rate: Option<f64>,
    pub roi: Option<f64>,
    pub coins_traded: Option<f64>,
}

/// Authentication surface of the upstream provider
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Perform a fresh credential login, returning a session token
    async fn login(&self) -> Result<String>;

    /// Whoami check; `Ok(true)` when the provider accepts the token
    async fn check_token(&self, token: &str) -> Result<bool>;

    /// Exchange a refresh token for a new session token
    ///
    /// Returns `Ok(None)` when the provider has no refresh endpoint.
    async fn refresh(&self, refresh_token: &str) -> Result<Option<String>>;
}

/// Bulk transaction feed, authenticated with a session token
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn fetch_transactions(
        &self,
        token: &str,
        query: &AlertQuery,
    ) -> Result<Vec<TransactionRecord>>;
}

/// Per-wallet win-rate/ROI lookup
#[async_trait]
pub trait WalletStatsSource: Send + Sync {
    async fn wallet_stats(&self, token: &str, address: &str) -> Result<Option<WalletStats>>;

    /// Public profile URL for a wallet, if the provider exposes one
    fn wallet_profile_url(&self, address: &str) -> Option<String>;
}
