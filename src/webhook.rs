//! Push-event ingress: payload types and delivery deduplication
//!
//! The upstream provider retries webhook deliveries, so every payload id is
//! claimed against a TTL'd dedup store before any processing. A claim that
//! fails means this exact delivery was already handled and the handler
//! short-circuits as success. The claim is the one strict mutual-exclusion
//! guarantee in the system.

use dashmap::DashMap;
use serde::Deserialize;
use std::time::{Duration, Instant};

use crate::aggregator::format_utc_timestamp;
use crate::provider::TransactionRecord;

/// At-most-once claim over inbound delivery ids
///
/// `try_claim` is an atomic set-if-absent: `true` means this caller owns
/// the id for the TTL, `false` means it was already claimed.
pub trait DedupStore: Send + Sync {
    fn try_claim(&self, id: &str, ttl: Duration) -> bool;
}

/// In-memory dedup store keyed by claim deadline
#[derive(Default)]
pub struct MemoryDedupStore {
    deadlines: DashMap<String, Instant>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired claims; called opportunistically
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.deadlines.retain(|_, deadline| *deadline > now);
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

impl DedupStore for MemoryDedupStore {
    fn try_claim(&self, id: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        // The entry guard makes check-and-set atomic per key
        match self.deadlines.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if *occupied.get() > now {
                    false
                } else {
                    occupied.insert(now + ttl);
                    true
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(now + ttl);
                true
            }
        }
    }
}

/// Inbound address-activity payload
#[derive(Debug, Clone, Deserialize)]
pub struct AddressActivityPayload {
    /// Provider-side delivery id; the dedup key
    pub id: String,
    pub event: ActivityEvent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityEvent {
    #[serde(default)]
    pub activity: Vec<ActivityEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub from_address: String,
    pub to_address: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub raw_contract: Option<RawContract>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub block_num: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawContract {
    #[serde(default)]
    pub address: Option<String>,
}

/// Convert a live activity entry into the aggregation input format
///
/// The receiving wallet is the buyer; entries without a token contract are
/// not purchases and yield nothing. Live events carry no feed timestamp, so
/// the observation time stands in for it.
pub fn activity_to_record(
    entry: &ActivityEntry,
    observed_at: chrono::DateTime<chrono::Utc>,
) -> Option<TransactionRecord> {
    let token_address = entry.raw_contract.as_ref()?.address.clone()?;

    Some(TransactionRecord {
        time: format_utc_timestamp(observed_at),
        address: entry.to_address.clone(),
        buy_token_symbol: entry.asset.clone().unwrap_or_else(|| "?".to_string()),
        buy_token_address: token_address,
        txn_value: entry.value.unwrap_or(0.0),
        buy_price: None,
        funding_source: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_claim_then_duplicate_rejected() {
        let store = MemoryDedupStore::new();
        let ttl = Duration::from_secs(60);

        assert!(store.try_claim("wh_123", ttl));
        assert!(!store.try_claim("wh_123", ttl));
        // A different id is unaffected
        assert!(store.try_claim("wh_456", ttl));
    }

    #[test]
    fn test_expired_claim_can_be_retaken() {
        let store = MemoryDedupStore::new();
        let ttl = Duration::from_millis(20);

        assert!(store.try_claim("wh_123", ttl));
        std::thread::sleep(Duration::from_millis(40));
        assert!(store.try_claim("wh_123", ttl));
    }

    #[test]
    fn test_purge_drops_only_expired() {
        let store = MemoryDedupStore::new();
        store.try_claim("short", Duration::from_millis(10));
        store.try_claim("long", Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(30));
        store.purge_expired();

        assert_eq!(store.len(), 1);
        assert!(!store.try_claim("long", Duration::from_secs(60)));
    }

    #[test]
    fn test_payload_decoding() {
        let json = r#"{
            "id": "wh_9n5iiooqbvvw2p27",
            "event": {
                "activity": [{
                    "fromAddress": "0xsender",
                    "toAddress": "0xbuyer",
                    "value": 1500.0,
                    "asset": "PEPE",
                    "rawContract": { "address": "0xtoken" },
                    "hash": "0xdeadbeef",
                    "blockNum": "0x112a880"
                }]
            }
        }"#;

        let payload: AddressActivityPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.id, "wh_9n5iiooqbvvw2p27");
        assert_eq!(payload.event.activity.len(), 1);
        assert_eq!(payload.event.activity[0].to_address, "0xbuyer");
    }

    #[test]
    fn test_activity_conversion() {
        let entry = ActivityEntry {
            from_address: "0xsender".to_string(),
            to_address: "0xbuyer".to_string(),
            value: Some(1500.0),
            asset: Some("PEPE".to_string()),
            raw_contract: Some(RawContract {
                address: Some("0xtoken".to_string()),
            }),
            hash: None,
            block_num: None,
        };

        let now = Utc::now();
        let record = activity_to_record(&entry, now).unwrap();
        assert_eq!(record.address, "0xbuyer");
        assert_eq!(record.buy_token_address, "0xtoken");
        assert_eq!(record.txn_value, 1500.0);
        // Timestamp round-trips through the aggregator's parser
        assert!(crate::aggregator::parse_utc_timestamp(&record.time).is_some());
    }

    #[test]
    fn test_activity_without_contract_is_not_a_purchase() {
        let entry = ActivityEntry {
            from_address: "0xsender".to_string(),
            to_address: "0xbuyer".to_string(),
            value: Some(1.0),
            asset: Some("ETH".to_string()),
            raw_contract: None,
            hash: None,
            block_num: None,
        };
        assert!(activity_to_record(&entry, Utc::now()).is_none());
    }
}
