//! Block-explorer client for token provenance
//!
//! Uses the token-transfer listing from the zero address: the first mint
//! transfer carries the contract's name, symbol and creation timestamp.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::EnrichmentConfig;
use crate::enrich::{ProvenanceSource, TokenProvenance};
use crate::error::{Error, Result};

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    // String when the explorer reports an error, array of rows otherwise
    #[serde(default)]
    result: Value,
}

pub struct ExplorerClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ExplorerClient {
    pub fn new(config: &EnrichmentConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.explorer_base_url.clone(),
            api_key: config.explorer_api_key.clone(),
        }
    }

    fn provenance_url(&self, token_address: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("Invalid explorer base URL: {}", e)))?;
        url.set_path("/api");
        url.query_pairs_mut()
            .append_pair("module", "account")
            .append_pair("action", "tokentx")
            .append_pair("contractaddress", token_address)
            .append_pair("address", ZERO_ADDRESS)
            .append_pair("sort", "asc")
            .append_pair("page", "1")
            .append_pair("apikey", &self.api_key);
        Ok(url)
    }
}

fn parse_first_transfer(result: &Value) -> Option<TokenProvenance> {
    let first = result.as_array()?.first()?;
    let created_at = first
        .get("timeStamp")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0));

    Some(TokenProvenance {
        name: first
            .get("tokenName")
            .and_then(Value::as_str)
            .map(str::to_string),
        symbol: first
            .get("tokenSymbol")
            .and_then(Value::as_str)
            .map(str::to_string),
        created_at,
    })
}

#[async_trait]
impl ProvenanceSource for ExplorerClient {
    async fn token_provenance(&self, address: &str) -> Result<Option<TokenProvenance>> {
        let url = self.provenance_url(address)?;

        debug!(token = %address, "Fetching token provenance");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Enrichment(format!("Explorer request failed: {}", e)))?;

        let body: ExplorerResponse = response
            .json()
            .await
            .map_err(|e| Error::Enrichment(format!("Explorer response: {}", e)))?;

        // Rate-limit and error responses carry a string result; treat them
        // as no data rather than a hard failure
        Ok(parse_first_transfer(&body.result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_first_mint_transfer() {
        let result = json!([
            {
                "tokenName": "Pepe",
                "tokenSymbol": "PEPE",
                "timeStamp": "1681718400"
            },
            {
                "tokenName": "Pepe",
                "tokenSymbol": "PEPE",
                "timeStamp": "1681720000"
            }
        ]);

        let provenance = parse_first_transfer(&result).unwrap();
        assert_eq!(provenance.name.as_deref(), Some("Pepe"));
        assert_eq!(provenance.symbol.as_deref(), Some("PEPE"));
        assert_eq!(provenance.created_at.unwrap().timestamp(), 1_681_718_400);
    }

    #[test]
    fn test_error_string_result_yields_none() {
        let result = json!("Max rate limit reached");
        assert!(parse_first_transfer(&result).is_none());

        let empty = json!([]);
        assert!(parse_first_transfer(&empty).is_none());
    }
}
