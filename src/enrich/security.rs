//! Token-security score client
//!
//! The security API reports contract ownership and source flags as "0"/"1"
//! strings keyed by lowercased contract address.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::EnrichmentConfig;
use crate::enrich::{SecuritySource, SecurityVerdict};
use crate::error::{Error, Result};

const CHAIN_ID: u32 = 1;
const SUCCESS_CODE: i64 = 1;

#[derive(Debug, Deserialize)]
struct SecurityResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    result: Option<HashMap<String, Value>>,
}

fn flag(entry: &Value, key: &str) -> Option<bool> {
    entry.get(key).and_then(Value::as_str).map(|s| s == "1")
}

fn parse_verdict(entry: &Value) -> SecurityVerdict {
    SecurityVerdict {
        is_open_source: flag(entry, "is_open_source"),
        hidden_owner: flag(entry, "hidden_owner"),
        is_mintable: flag(entry, "is_mintable"),
        owner_address: entry
            .get("owner_address")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    }
}

pub struct SecurityClient {
    client: Client,
    base_url: String,
}

impl SecurityClient {
    pub fn new(config: &EnrichmentConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.security_base_url.clone(),
        }
    }
}

#[async_trait]
impl SecuritySource for SecurityClient {
    async fn security_verdict(&self, address: &str) -> Result<Option<SecurityVerdict>> {
        let url = format!(
            "{}/api/v1/token_security/{}?contract_addresses={}",
            self.base_url, CHAIN_ID, address
        );

        let body: SecurityResponse = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Enrichment(format!("Security request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| Error::Enrichment(format!("Security response: {}", e)))?;

        if body.code != SUCCESS_CODE {
            return Err(Error::Enrichment(format!(
                "Security API returned code {}",
                body.code
            )));
        }

        Ok(body
            .result
            .as_ref()
            .and_then(|map| map.get(&address.to_lowercase()))
            .map(parse_verdict))
    }
}
