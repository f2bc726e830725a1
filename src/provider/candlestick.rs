//! Candlestick API client
//!
//! Thin wrapper over the provider's login, whoami, stealth-money explorer
//! and trading-performance endpoints. Responses use a `code == 1` success
//! convention; everything else is surfaced as an error for the caller to
//! classify.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::{AlertQuery, ProviderConfig};
use crate::error::{Error, Result};
use crate::provider::{AuthApi, TransactionRecord, TransactionSource, WalletStats, WalletStatsSource};

lazy_static! {
    static ref ETH_ADDRESS_RE: Regex = Regex::new(r"^0x[a-fA-F0-9]{40}$").unwrap();
}

/// Check whether a string looks like an EVM address
pub fn is_eth_address(s: &str) -> bool {
    ETH_ADDRESS_RE.is_match(s)
}

const SUCCESS_CODE: i64 = 1;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    device_id: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

pub struct CandlestickClient {
    client: Client,
    config: ProviderConfig,
}

impl CandlestickClient {
    pub fn new(config: ProviderConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();

        Self { client, config }
    }

    fn search_url(&self, query: &AlertQuery) -> Result<Url> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| Error::Config(format!("Invalid provider base URL: {}", e)))?;
        url.set_path("/api/v1/stealth-money/degen-explorer-by-stealth-money");
        url.query_pairs_mut()
            .append_pair("current_page", "1")
            .append_pair("page_size", &query.page_size.to_string())
            .append_pair("sort_type", "3")
            .append_pair("oriented", "1")
            .append_pair("blockchain_id", &self.config.blockchain_id.to_string())
            .append_pair("exploreType", "token")
            .append_pair("days", &query.wallet_age_days.to_string())
            .append_pair("value_filter", &query.value_filter.to_string())
            .append_pair("include_noise_trades", "false")
            .append_pair("fundingSource", "ALL")
            .append_pair("boughtTokenLimit", &query.bought_token_limit.to_string())
            .append_pair("hide_first_mins", "0")
            .append_pair("activeSource", &self.config.active_source);
        Ok(url)
    }

    /// Opaque wallet identifier derived from the configured portfolio key
    ///
    /// The provider addresses wallets by a keyed digest rather than the raw
    /// address; the exact scheme is private to this wrapper.
    fn wallet_digest(&self, address: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.config.portfolio_key.as_bytes());
        hasher.update(address.to_lowercase().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[async_trait]
impl AuthApi for CandlestickClient {
    async fn login(&self) -> Result<String> {
        let url = format!("{}/api/v2/user/login-email", self.config.base_url);
        let body = LoginRequest {
            device_id: &self.config.device_id,
            email: &self.config.email,
            password: &self.config.hashed_password,
        };

        debug!(url = %url, "Logging in to provider");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::UpstreamFetch(format!("Login request failed: {}", e)))?;

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| Error::UpstreamDecode(format!("Login response: {}", e)))?;

        if envelope.code != SUCCESS_CODE {
            return Err(Error::LoginRejected(
                envelope.message.unwrap_or_else(|| format!("code {}", envelope.code)),
            ));
        }

        envelope
            .data
            .as_ref()
            .and_then(|d| d.get("token"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::UpstreamDecode("Login response missing token".to_string()))
    }

    async fn check_token(&self, token: &str) -> Result<bool> {
        let url = format!("{}/api/v1/user/user-info", self.config.base_url);

        let response = self
            .client
            .get(&url)
            .header("x-authorization", token)
            .send()
            .await
            .map_err(|e| Error::UpstreamFetch(format!("Whoami request failed: {}", e)))?;

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| Error::UpstreamDecode(format!("Whoami response: {}", e)))?;

        Ok(envelope.code == SUCCESS_CODE)
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<Option<String>> {
        // No refresh endpoint; callers fall through to a fresh login
        Ok(None)
    }
}

#[async_trait]
impl TransactionSource for CandlestickClient {
    async fn fetch_transactions(
        &self,
        token: &str,
        query: &AlertQuery,
    ) -> Result<Vec<TransactionRecord>> {
        let url = self.search_url(query)?;

        let response = self
            .client
            .get(url)
            .header("x-authorization", token)
            .send()
            .await
            .map_err(|e| Error::UpstreamFetch(format!("Stealth-money request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamFetch(format!(
                "Stealth-money API error {}: {}",
                status, body
            )));
        }

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| Error::UpstreamDecode(format!("Stealth-money response: {}", e)))?;

        let chart = envelope
            .data
            .as_ref()
            .and_then(|d| d.get("chart"))
            .cloned()
            .ok_or_else(|| Error::UpstreamDecode("Response missing data.chart".to_string()))?;

        let records: Vec<TransactionRecord> = serde_json::from_value(chart)
            .map_err(|e| Error::UpstreamDecode(format!("Transaction rows: {}", e)))?;

        debug!(count = records.len(), "Fetched stealth-wallet transactions");

        Ok(records)
    }
}

#[async_trait]
impl WalletStatsSource for CandlestickClient {
    async fn wallet_stats(&self, token: &str, address: &str) -> Result<Option<WalletStats>> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| Error::Config(format!("Invalid provider base URL: {}", e)))?;
        url.set_path("/api/v1/trading-performance/overall-stats");
        url.query_pairs_mut()
            .append_pair("active_in", "last_1_month")
            .append_pair("WA", &self.wallet_digest(address));

        let response = self
            .client
            .get(url)
            .header("x-authorization", token)
            .send()
            .await
            .map_err(|e| Error::Enrichment(format!("Wallet stats request failed: {}", e)))?;

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| Error::Enrichment(format!("Wallet stats response: {}", e)))?;

        if envelope.code != SUCCESS_CODE {
            return Ok(None);
        }

        let stat = match envelope.data.as_ref().and_then(|d| d.get("stat")) {
            Some(s) => s.clone(),
            None => return Ok(None),
        };

        Ok(Some(WalletStats {
            win_rate: stat.get("est_win_Rate").and_then(Value::as_f64),
            roi: stat.get("est_total_profit_ratio").and_then(Value::as_f64),
            coins_traded: stat.get("coin_traded").and_then(Value::as_f64),
        }))
    }

    fn wallet_profile_url(&self, address: &str) -> Option<String> {
        if !is_eth_address(address) {
            return None;
        }
        Some(format!(
            "{}/traderscan/trading-performance/?active_in=last_1_month&WA={}",
            self.config.base_url,
            self.wallet_digest(address)
        ))
    }
}

/// Public token page on the provider site, used in alert messages
pub fn token_page_url(base_url: &str, token_address: &str) -> String {
    format!("{}/crypto/{}", base_url, token_address)
}
