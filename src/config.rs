//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub alerts: Vec<AlertDefinition>,
}

/// Upstream stealth-money data provider
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    /// Device identifier sent with the login request
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub email: String,
    /// Pre-hashed account password, never the cleartext
    #[serde(default)]
    pub hashed_password: String,
    /// Key used to derive opaque wallet identifiers for stats lookups
    #[serde(default)]
    pub portfolio_key: String,
    #[serde(default = "default_blockchain_id")]
    pub blockchain_id: u32,
    #[serde(default = "default_active_source")]
    pub active_source: String,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            device_id: String::new(),
            email: String::new(),
            hashed_password: String::new(),
            portfolio_key: String::new(),
            blockchain_id: default_blockchain_id(),
            active_source: default_active_source(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_telegram_base_url")]
    pub base_url: String,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            base_url: default_telegram_base_url(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Alert recipients (chat or user ids)
    #[serde(default)]
    pub recipients: Vec<i64>,
    /// Replacement recipient set used when dev_mode is on
    #[serde(default)]
    pub dev_recipients: Vec<i64>,
    #[serde(default)]
    pub dev_mode: bool,
    /// Global kill switch: the pipeline still runs, nothing is sent
    #[serde(default = "default_true")]
    pub send_enabled: bool,
    /// Chat receiving operator diagnostics
    #[serde(default)]
    pub operator_chat_id: i64,
    #[serde(default = "default_max_send_attempts")]
    pub max_send_attempts: u32,
    /// Backoff unit; attempt N waits N x this
    #[serde(default = "default_retry_unit_ms")]
    pub retry_unit_ms: u64,
    #[serde(default = "default_max_table_rows")]
    pub max_table_rows: usize,
    /// Cap on per-wallet stats lookups per match
    #[serde(default = "default_wallet_stats_limit")]
    pub wallet_stats_limit: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            dev_recipients: Vec::new(),
            dev_mode: false,
            send_enabled: default_true(),
            operator_chat_id: 0,
            max_send_attempts: default_max_send_attempts(),
            retry_unit_ms: default_retry_unit_ms(),
            max_table_rows: default_max_table_rows(),
            wallet_stats_limit: default_wallet_stats_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Durable cache for the provider session credential
    #[serde(default = "default_session_cache_path")]
    pub cache_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_path: default_session_cache_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind: String,
    /// File persisting token metadata and delivery records
    #[serde(default = "default_store_path")]
    pub store_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_addr(),
            store_path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_explorer_base_url")]
    pub explorer_base_url: String,
    #[serde(default)]
    pub explorer_api_key: String,
    #[serde(default = "default_honeypot_base_url")]
    pub honeypot_base_url: String,
    #[serde(default = "default_security_base_url")]
    pub security_base_url: String,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            explorer_base_url: default_explorer_base_url(),
            explorer_api_key: String::new(),
            honeypot_base_url: default_honeypot_base_url(),
            security_base_url: default_security_base_url(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Alert definition evaluated against push events
    #[serde(default)]
    pub alert_id: u32,
    #[serde(default = "default_dedup_ttl_hours")]
    pub dedup_ttl_hours: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            alert_id: 0,
            dedup_ttl_hours: default_dedup_ttl_hours(),
        }
    }
}

/// One configured alert: what to fetch and what qualifies as a match
///
/// Immutable once loaded; evaluation never mutates a definition.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertDefinition {
    pub id: u32,
    pub name: String,
    pub query: AlertQuery,
    pub filter: AlertFilter,
    #[serde(default)]
    pub wallet_filter: Option<WalletQualityFilter>,
    #[serde(default)]
    pub display: DisplayFlags,
}

/// Upstream query parameters for one alert
#[derive(Debug, Clone, Deserialize)]
pub struct AlertQuery {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Minimum USD transaction value, applied upstream
    #[serde(default = "default_value_filter")]
    pub value_filter: u64,
    /// Only wallets younger than this many days
    pub wallet_age_days: u32,
    /// Restrict to wallets that bought at most two tokens
    #[serde(default)]
    pub bought_token_limit: bool,
}

/// Matching thresholds applied to the fetched batch
#[derive(Debug, Clone, Deserialize)]
pub struct AlertFilter {
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,
    pub min_distinct_wallets: usize,
    /// Token addresses or symbols that never alert
    #[serde(default)]
    pub excluded_tokens: Vec<String>,
}

/// Optional wallet-quality gate, applied after per-wallet stats enrichment
#[derive(Debug, Clone, Deserialize)]
pub struct WalletQualityFilter {
    pub rule: WalletRule,
    #[serde(default)]
    pub min_win_rate: f64,
    #[serde(default)]
    pub min_roi: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletRule {
    /// At least one distinct wallet must satisfy the thresholds
    Any,
    /// Every distinct wallet must satisfy the thresholds
    Every,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayFlags {
    #[serde(default = "default_true")]
    pub show_wallet_stats: bool,
    #[serde(default = "default_true")]
    pub show_wallet_links: bool,
}

impl Default for DisplayFlags {
    fn default() -> Self {
        Self {
            show_wallet_stats: default_true(),
            show_wallet_links: default_true(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_provider_base_url() -> String {
    "https://www.candlestick.io".to_string()
}
fn default_telegram_base_url() -> String {
    "https://api.telegram.org".to_string()
}
fn default_explorer_base_url() -> String {
    "https://api.etherscan.io".to_string()
}
fn default_honeypot_base_url() -> String {
    "https://api.honeypot.is".to_string()
}
fn default_security_base_url() -> String {
    "https://api.gopluslabs.io".to_string()
}
fn default_blockchain_id() -> u32 {
    2
}
fn default_active_source() -> String {
    "ETH".to_string()
}
fn default_http_timeout_ms() -> u64 {
    10_000
}
fn default_max_send_attempts() -> u32 {
    3
}
fn default_retry_unit_ms() -> u64 {
    1_000
}
fn default_max_table_rows() -> usize {
    20
}
fn default_wallet_stats_limit() -> usize {
    20
}
fn default_session_cache_path() -> String {
    "session.json".to_string()
}
fn default_store_path() -> String {
    "alert-store.json".to_string()
}
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_dedup_ttl_hours() -> u64 {
    24
}
fn default_page_size() -> u32 {
    100
}
fn default_value_filter() -> u64 {
    120
}
fn default_window_minutes() -> i64 {
    5
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix STEALTH_)
            .add_source(
                config::Environment::with_prefix("STEALTH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Reject malformed definitions at load time, not at use time
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let mut seen_ids = std::collections::HashSet::new();

        for alert in &self.alerts {
            if alert.name.trim().is_empty() {
                anyhow::bail!("alert {} has an empty name", alert.id);
            }
            if !seen_ids.insert(alert.id) {
                anyhow::bail!("duplicate alert id {}", alert.id);
            }
            if alert.query.page_size == 0 {
                anyhow::bail!("alert {}: page_size must be positive", alert.id);
            }
            if alert.filter.window_minutes <= 0 {
                anyhow::bail!("alert {}: window_minutes must be positive", alert.id);
            }
            if alert.filter.min_distinct_wallets == 0 {
                anyhow::bail!("alert {}: min_distinct_wallets must be at least 1", alert.id);
            }
            if let Some(wf) = &alert.wallet_filter {
                if wf.min_win_rate < 0.0 || wf.min_roi < 0.0 {
                    anyhow::bail!("alert {}: wallet filter thresholds must be non-negative", alert.id);
                }
            }
        }

        if self.webhook.enabled && self.alert_by_id(self.webhook.alert_id).is_none() {
            anyhow::bail!(
                "webhook.alert_id {} does not match any configured alert",
                self.webhook.alert_id
            );
        }

        if self.delivery.max_send_attempts == 0 {
            anyhow::bail!("delivery.max_send_attempts must be at least 1");
        }

        Ok(())
    }

    /// Look up an alert definition by id
    pub fn alert_by_id(&self, id: u32) -> Option<&AlertDefinition> {
        self.alerts.iter().find(|a| a.id == id)
    }

    /// Debug representation with secrets masked
    pub fn redacted(&self) -> String {
        let mask = |s: &str| {
            if s.is_empty() {
                "(unset)".to_string()
            } else {
                format!("***{}", s.len())
            }
        };
        format!(
            "provider.base_url={} provider.email={} telegram.bot_token={} alerts={} webhook.enabled={}",
            self.provider.base_url,
            mask(&self.provider.email),
            mask(&self.telegram.bot_token),
            self.alerts.len(),
            self.webhook.enabled,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_definition(id: u32) -> AlertDefinition {
        AlertDefinition {
            id,
            name: format!("Alert {}", id),
            query: AlertQuery {
                page_size: 100,
                value_filter: 120,
                wallet_age_days: 1,
                bought_token_limit: true,
            },
            filter: AlertFilter {
                window_minutes: 5,
                min_distinct_wallets: 3,
                excluded_tokens: vec!["WETH".to_string()],
            },
            wallet_filter: None,
            display: DisplayFlags::default(),
        }
    }

    fn config_with_alerts(alerts: Vec<AlertDefinition>) -> Config {
        Config {
            provider: ProviderConfig::default(),
            telegram: TelegramConfig::default(),
            delivery: DeliveryConfig::default(),
            session: SessionConfig::default(),
            server: ServerConfig::default(),
            enrichment: EnrichmentConfig::default(),
            webhook: WebhookConfig::default(),
            alerts,
        }
    }

    #[test]
    fn test_valid_config_passes() {
        let config = config_with_alerts(vec![sample_definition(1), sample_definition(2)]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_min_wallets_rejected() {
        let mut def = sample_definition(1);
        def.filter.min_distinct_wallets = 0;
        let config = config_with_alerts(vec![def]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let config = config_with_alerts(vec![sample_definition(1), sample_definition(1)]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_webhook_requires_known_alert() {
        let mut config = config_with_alerts(vec![sample_definition(1)]);
        config.webhook.enabled = true;
        config.webhook.alert_id = 99;
        assert!(config.validate().is_err());

        config.webhook.alert_id = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redacted_masks_secrets() {
        let mut config = config_with_alerts(vec![]);
        config.telegram.bot_token = "123:abc".to_string();
        let out = config.redacted();
        assert!(!out.contains("123:abc"));
    }
}
