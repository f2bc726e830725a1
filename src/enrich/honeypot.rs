//! Honeypot scanner client
//!
//! Two-step lookup: resolve the token's primary pair, then ask for the
//! sell-simulation verdict against that pair. A token with no known pair
//! has no verdict.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::EnrichmentConfig;
use crate::enrich::{HoneypotSource, HoneypotVerdict};
use crate::error::{Error, Result};

const CHAIN_ID: u32 = 1;

#[derive(Debug, Deserialize)]
struct PairEntry {
    #[serde(rename = "Pair")]
    pair: Option<PairInfo>,
}

#[derive(Debug, Deserialize)]
struct PairInfo {
    #[serde(rename = "Address")]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HoneypotResponse {
    #[serde(rename = "honeypotResult")]
    honeypot_result: Option<HoneypotResult>,
    #[serde(rename = "simulationResult")]
    simulation_result: Option<SimulationResult>,
}

#[derive(Debug, Deserialize)]
struct HoneypotResult {
    #[serde(rename = "isHoneypot")]
    is_honeypot: bool,
}

#[derive(Debug, Deserialize)]
struct SimulationResult {
    #[serde(rename = "buyTax")]
    buy_tax: Option<f64>,
    #[serde(rename = "sellTax")]
    sell_tax: Option<f64>,
}

pub struct HoneypotClient {
    client: Client,
    base_url: String,
}

impl HoneypotClient {
    pub fn new(config: &EnrichmentConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.honeypot_base_url.clone(),
        }
    }

    async fn primary_pair(&self, address: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/v1/GetPairs?address={}&chainID={}",
            self.base_url, address, CHAIN_ID
        );

        let pairs: Vec<PairEntry> = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Enrichment(format!("Pair lookup failed: {}", e)))?
            .json()
            .await
            .map_err(|e| Error::Enrichment(format!("Pair response: {}", e)))?;

        Ok(pairs
            .into_iter()
            .next()
            .and_then(|entry| entry.pair)
            .and_then(|pair| pair.address))
    }
}

#[async_trait]
impl HoneypotSource for HoneypotClient {
    async fn honeypot_verdict(&self, address: &str) -> Result<Option<HoneypotVerdict>> {
        let Some(pair) = self.primary_pair(address).await? else {
            debug!(token = %address, "No pair found, skipping honeypot check");
            return Ok(None);
        };

        let url = format!(
            "{}/v1/IsHoneypot?address={}&pair={}&chainID={}",
            self.base_url, address, pair, CHAIN_ID
        );

        let body: HoneypotResponse = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Enrichment(format!("Honeypot check failed: {}", e)))?
            .json()
            .await
            .map_err(|e| Error::Enrichment(format!("Honeypot response: {}", e)))?;

        let Some(result) = body.honeypot_result else {
            return Ok(None);
        };

        Ok(Some(HoneypotVerdict {
            is_honeypot: result.is_honeypot,
            buy_tax: body.simulation_result.as_ref().and_then(|s| s.buy_tax),
            sell_tax: body.simulation_result.as_ref().and_then(|s| s.sell_tax),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_honeypot_response_decoding() {
        let json = r#"{
            "honeypotResult": { "isHoneypot": true },
            "simulationResult": { "buyTax": 0.5, "sellTax": 99.0 }
        }"#;
        let body: HoneypotResponse = serde_json::from_str(json).unwrap();

        assert!(body.honeypot_result.unwrap().is_honeypot);
        let sim = body.simulation_result.unwrap();
        assert_eq!(sim.sell_tax, Some(99.0));
    }

    #[test]
    fn test_missing_verdict_decodes_to_none() {
        let body: HoneypotResponse = serde_json::from_str("{}").unwrap();
        assert!(body.honeypot_result.is_none());
    }

    #[test]
    fn test_pair_entry_decoding() {
        let json = r#"[{ "Pair": { "Address": "0xpair" } }]"#;
        let pairs: Vec<PairEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(
            pairs[0].pair.as_ref().unwrap().address.as_deref(),
            Some("0xpair")
        );
    }
}
