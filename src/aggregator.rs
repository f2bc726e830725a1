//! Time-windowed aggregation of purchase events
//!
//! Turns a raw transaction batch into per-token candidates: transactions
//! older than the window are dropped, excluded tokens are skipped before
//! they can accumulate any state, and each surviving transaction is folded
//! into its token's aggregate. A buyer address counts once toward the
//! distinct-wallet tally no matter how many purchases it made.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::enrich::TokenIntel;
use crate::provider::{TransactionRecord, WalletStats};

/// Upstream timestamp layout, interpreted as UTC
pub const UPSTREAM_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse an upstream `YYYY-MM-DD HH:MM:SS` timestamp as UTC
pub fn parse_utc_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, UPSTREAM_TIME_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Render a timestamp in the upstream layout; round-trips with the parser
pub fn format_utc_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(UPSTREAM_TIME_FORMAT).to_string()
}

/// Case-insensitive set of excluded token addresses and symbols
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    entries: HashSet<String>,
}

impl ExclusionSet {
    pub fn new(identifiers: &[String]) -> Self {
        Self {
            entries: identifiers.iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    /// True when either the token address or its symbol is excluded
    pub fn matches(&self, address: &str, symbol: &str) -> bool {
        self.entries.contains(&address.to_lowercase())
            || self.entries.contains(&symbol.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-token candidate built up over one evaluation cycle
///
/// Created on a token's first in-window transaction, mutated by subsequent
/// ones, discarded at end of cycle unless it becomes a match.
#[derive(Debug, Clone)]
pub struct TokenAggregate {
    pub address: String,
    pub symbol: String,
    pub transactions: Vec<TransactionRecord>,
    /// Distinct buyer addresses in first-seen order
    pub wallets: Vec<String>,
    wallet_set: HashSet<String>,
    pub total_value: f64,
    /// Attached by enrichment; unset fields render as unknown
    pub intel: TokenIntel,
    /// Per-wallet performance, attached by enrichment
    pub wallet_stats: HashMap<String, WalletStats>,
}

impl TokenAggregate {
    pub fn new(address: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            symbol: symbol.into(),
            transactions: Vec::new(),
            wallets: Vec::new(),
            wallet_set: HashSet::new(),
            total_value: 0.0,
            intel: TokenIntel::default(),
            wallet_stats: HashMap::new(),
        }
    }

    /// Fold one transaction into the aggregate
    pub fn push(&mut self, txn: TransactionRecord) {
        if self.wallet_set.insert(txn.address.clone()) {
            self.wallets.push(txn.address.clone());
        }
        self.total_value += txn.txn_value;
        self.transactions.push(txn);
    }

    /// Cardinality of the distinct buyer-address set
    pub fn distinct_wallets(&self) -> usize {
        self.wallet_set.len()
    }

    /// Rebuild an aggregate from a stored transaction snapshot
    ///
    /// Used by the refresh flow; the snapshot already passed windowing and
    /// exclusion when it was first delivered.
    pub fn from_transactions(transactions: &[TransactionRecord]) -> Option<Self> {
        let first = transactions.first()?;
        let mut aggregate = Self::new(
            first.buy_token_address.clone(),
            first.buy_token_symbol.clone(),
        );
        for txn in transactions {
            aggregate.push(txn.clone());
        }
        Some(aggregate)
    }
}

/// Insertion-ordered map of token address to aggregate
///
/// First-seen order is preserved so that downstream ranking can break ties
/// deterministically.
#[derive(Debug, Default)]
pub struct AggregateMap {
    index: HashMap<String, usize>,
    items: Vec<TokenAggregate>,
}

impl AggregateMap {
    pub fn upsert(&mut self, address: &str, symbol: &str) -> &mut TokenAggregate {
        if let Some(&pos) = self.index.get(address) {
            return &mut self.items[pos];
        }
        self.index.insert(address.to_string(), self.items.len());
        self.items.push(TokenAggregate::new(address, symbol));
        self.items.last_mut().unwrap()
    }

    pub fn get(&self, address: &str) -> Option<&TokenAggregate> {
        self.index.get(address).map(|&pos| &self.items[pos])
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenAggregate> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<TokenAggregate> {
        self.items
    }
}

/// Group a transaction batch into per-token aggregates
///
/// Exclusion is checked at ingestion so an excluded token never accumulates
/// partial state. Records with unparseable timestamps are skipped, not
/// fatal; an empty input yields an empty map.
pub fn aggregate(
    transactions: &[TransactionRecord],
    window_minutes: i64,
    exclusions: &ExclusionSet,
    now: DateTime<Utc>,
) -> AggregateMap {
    let cutoff = now - Duration::minutes(window_minutes);
    let mut map = AggregateMap::default();

    for txn in transactions {
        let ts = match parse_utc_timestamp(&txn.time) {
            Some(ts) => ts,
            None => {
                warn!(time = %txn.time, "Skipping transaction with unparseable timestamp");
                continue;
            }
        };
        if ts <= cutoff {
            continue;
        }
        if exclusions.matches(&txn.buy_token_address, &txn.buy_token_symbol) {
            continue;
        }
        map.upsert(&txn.buy_token_address, &txn.buy_token_symbol)
            .push(txn.clone());
    }

    debug!(
        input = transactions.len(),
        tokens = map.len(),
        window_minutes,
        "Aggregated transaction batch"
    );

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(wallet: &str, token: &str, time: &str, value: f64) -> TransactionRecord {
        TransactionRecord {
            time: time.to_string(),
            address: wallet.to_string(),
            buy_token_symbol: format!("{}SYM", token),
            buy_token_address: token.to_string(),
            txn_value: value,
            buy_price: None,
            funding_source: None,
        }
    }

    fn t(minute: u32) -> String {
        format!("2024-03-01 12:{:02}:00", minute)
    }

    fn now_at(minute: u32) -> DateTime<Utc> {
        parse_utc_timestamp(&t(minute)).unwrap()
    }

    #[test]
    fn test_timestamp_round_trip() {
        let raw = "2024-03-01 12:05:09";
        let parsed = parse_utc_timestamp(raw).unwrap();
        assert_eq!(format_utc_timestamp(parsed), raw);
    }

    #[test]
    fn test_rejects_malformed_timestamp() {
        assert!(parse_utc_timestamp("2024-03-01T12:05:09Z").is_none());
        assert!(parse_utc_timestamp("not a time").is_none());
    }

    #[test]
    fn test_empty_input_yields_empty_map() {
        let map = aggregate(&[], 5, &ExclusionSet::default(), now_at(10));
        assert!(map.is_empty());
    }

    #[test]
    fn test_distinct_wallet_count_ignores_duplicates() {
        // Worked example: 0xA buys twice, 0xB once, all within the window
        let txns = vec![
            txn("0xA", "T1", &t(0), 100.0),
            txn("0xB", "T1", &t(1), 50.0),
            txn("0xA", "T1", &t(2), 25.0),
        ];
        let map = aggregate(&txns, 5, &ExclusionSet::default(), now_at(3));

        assert_eq!(map.len(), 1);
        let agg = map.get("T1").unwrap();
        assert_eq!(agg.distinct_wallets(), 2);
        assert_eq!(agg.transactions.len(), 3);
        assert!((agg.total_value - 175.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_window_cutoff_is_strict() {
        // At now=12:10 with a 5 minute window the cutoff is 12:05; a txn at
        // exactly 12:05 is too old, one at 12:06 survives
        let txns = vec![
            txn("0xA", "T1", &t(5), 10.0),
            txn("0xB", "T1", &t(6), 20.0),
        ];
        let map = aggregate(&txns, 5, &ExclusionSet::default(), now_at(10));

        let agg = map.get("T1").unwrap();
        assert_eq!(agg.transactions.len(), 1);
        assert_eq!(agg.wallets, vec!["0xB".to_string()]);
    }

    #[test]
    fn test_excluded_token_accumulates_nothing() {
        let exclusions = ExclusionSet::new(&["T1".to_string()]);
        let txns = vec![
            txn("0xA", "T1", &t(0), 100.0),
            txn("0xB", "T1", &t(1), 50.0),
            txn("0xC", "T2", &t(1), 75.0),
        ];
        let map = aggregate(&txns, 5, &exclusions, now_at(2));

        assert!(map.get("T1").is_none());
        assert_eq!(map.len(), 1);
        assert!(map.get("T2").is_some());
    }

    #[test]
    fn test_exclusion_matches_symbol_case_insensitively() {
        let exclusions = ExclusionSet::new(&["weth".to_string()]);
        let mut record = txn("0xA", "0xc02a", &t(0), 100.0);
        record.buy_token_symbol = "WETH".to_string();

        let map = aggregate(&[record], 5, &exclusions, now_at(1));
        assert!(map.is_empty());
    }

    #[test]
    fn test_first_seen_order_preserved() {
        let txns = vec![
            txn("0xA", "T2", &t(0), 1.0),
            txn("0xB", "T1", &t(1), 1.0),
            txn("0xC", "T2", &t(2), 1.0),
        ];
        let map = aggregate(&txns, 5, &ExclusionSet::default(), now_at(3));
        let order: Vec<&str> = map.iter().map(|a| a.address.as_str()).collect();
        assert_eq!(order, vec!["T2", "T1"]);
    }

    #[test]
    fn test_rebuild_from_snapshot() {
        let txns = vec![
            txn("0xA", "T1", &t(0), 100.0),
            txn("0xB", "T1", &t(1), 50.0),
        ];
        let agg = TokenAggregate::from_transactions(&txns).unwrap();
        assert_eq!(agg.address, "T1");
        assert_eq!(agg.distinct_wallets(), 2);
        assert!((agg.total_value - 150.0).abs() < f64::EPSILON);

        assert!(TokenAggregate::from_transactions(&[]).is_none());
    }
}
