//! Best-effort enrichment of matched tokens
//!
//! Fans out concurrently per match and per wallet to the risk-data
//! collaborators. Every lookup is optional: a failure or empty result
//! leaves the field unset and the match is still delivered with the gap
//! rendered as unknown.

pub mod explorer;
pub mod honeypot;
pub mod security;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::aggregator::TokenAggregate;
use crate::error::Result;
use crate::provider::{WalletStats, WalletStatsSource};

pub use explorer::ExplorerClient;
pub use honeypot::HoneypotClient;
pub use security::SecurityClient;

/// Enrichment fields attached to a match
#[derive(Debug, Clone, Default)]
pub struct TokenIntel {
    pub name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub honeypot: Option<HoneypotVerdict>,
    pub security: Option<SecurityVerdict>,
}

/// Whether the token's contract prevents selling, with observed taxes
#[derive(Debug, Clone)]
pub struct HoneypotVerdict {
    pub is_honeypot: bool,
    pub buy_tax: Option<f64>,
    pub sell_tax: Option<f64>,
}

/// Ownership and contract-security assessment
#[derive(Debug, Clone)]
pub struct SecurityVerdict {
    pub is_open_source: Option<bool>,
    pub hidden_owner: Option<bool>,
    pub is_mintable: Option<bool>,
    pub owner_address: Option<String>,
}

/// Contract creation and naming data from the block explorer
#[derive(Debug, Clone, Default)]
pub struct TokenProvenance {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ProvenanceSource: Send + Sync {
    async fn token_provenance(&self, address: &str) -> Result<Option<TokenProvenance>>;
}

#[async_trait]
pub trait HoneypotSource: Send + Sync {
    async fn honeypot_verdict(&self, address: &str) -> Result<Option<HoneypotVerdict>>;
}

#[async_trait]
pub trait SecuritySource: Send + Sync {
    async fn security_verdict(&self, address: &str) -> Result<Option<SecurityVerdict>>;
}

/// Fans enrichment lookups out across matches and wallets
///
/// Any collaborator can be absent (e.g. no explorer API key configured);
/// the corresponding fields simply stay unset.
pub struct EnrichmentCoordinator {
    provenance: Option<Arc<dyn ProvenanceSource>>,
    honeypot: Option<Arc<dyn HoneypotSource>>,
    security: Option<Arc<dyn SecuritySource>>,
    wallet_stats: Option<Arc<dyn WalletStatsSource>>,
    wallet_stats_limit: usize,
}

impl EnrichmentCoordinator {
    pub fn new(
        provenance: Option<Arc<dyn ProvenanceSource>>,
        honeypot: Option<Arc<dyn HoneypotSource>>,
        security: Option<Arc<dyn SecuritySource>>,
        wallet_stats: Option<Arc<dyn WalletStatsSource>>,
        wallet_stats_limit: usize,
    ) -> Self {
        Self {
            provenance,
            honeypot,
            security,
            wallet_stats,
            wallet_stats_limit,
        }
    }

    /// Coordinator with no collaborators; every field stays unset
    pub fn disabled() -> Self {
        Self::new(None, None, None, None, 0)
    }

    /// Enrich all matches in place, waiting for the full fan-out
    pub async fn enrich(&self, matches: &mut [TokenAggregate], session_token: &str) {
        if matches.is_empty() {
            return;
        }
        debug!(matches = matches.len(), "Starting enrichment fan-out");
        join_all(
            matches
                .iter_mut()
                .map(|m| self.enrich_one(m, session_token)),
        )
        .await;
    }

    async fn enrich_one(&self, aggregate: &mut TokenAggregate, session_token: &str) {
        let (provenance, honeypot, security, wallet_stats) = futures::join!(
            self.fetch_provenance(&aggregate.address),
            self.fetch_honeypot(&aggregate.address),
            self.fetch_security(&aggregate.address),
            self.fetch_wallet_stats(&aggregate.wallets, session_token),
        );

        if let Some(p) = provenance {
            aggregate.intel.name = p.name;
            aggregate.intel.created_at = p.created_at;
        }
        aggregate.intel.honeypot = honeypot;
        aggregate.intel.security = security;
        aggregate.wallet_stats = wallet_stats;
    }

    async fn fetch_provenance(&self, address: &str) -> Option<TokenProvenance> {
        let source = self.provenance.as_ref()?;
        match source.token_provenance(address).await {
            Ok(p) => p,
            Err(e) => {
                warn!(token = %address, error = %e, "Provenance lookup failed");
                None
            }
        }
    }

    async fn fetch_honeypot(&self, address: &str) -> Option<HoneypotVerdict> {
        let source = self.honeypot.as_ref()?;
        match source.honeypot_verdict(address).await {
            Ok(v) => v,
            Err(e) => {
                warn!(token = %address, error = %e, "Honeypot lookup failed");
                None
            }
        }
    }

    async fn fetch_security(&self, address: &str) -> Option<SecurityVerdict> {
        let source = self.security.as_ref()?;
        match source.security_verdict(address).await {
            Ok(v) => v,
            Err(e) => {
                warn!(token = %address, error = %e, "Security lookup failed");
                None
            }
        }
    }

    async fn fetch_wallet_stats(
        &self,
        wallets: &[String],
        session_token: &str,
    ) -> HashMap<String, WalletStats> {
        let Some(source) = self.wallet_stats.as_ref() else {
            return HashMap::new();
        };

        let lookups = wallets.iter().take(self.wallet_stats_limit).map(|wallet| {
            let wallet = wallet.clone();
            async move {
                match source.wallet_stats(session_token, &wallet).await {
                    Ok(Some(stats)) => Some((wallet, stats)),
                    Ok(None) => None,
                    Err(e) => {
                        warn!(wallet = %wallet, error = %e, "Wallet stats lookup failed");
                        None
                    }
                }
            }
        });

        join_all(lookups).await.into_iter().flatten().collect()
    }
}
