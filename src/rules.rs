//! Alert matching and ranking
//!
//! Selects qualifying aggregates for a definition and orders them. The
//! exclusion list is re-checked here even though aggregation already
//! enforces it: a match must never surface an excluded token.

use tracing::debug;

use crate::aggregator::{AggregateMap, ExclusionSet, TokenAggregate};
use crate::config::{AlertFilter, WalletQualityFilter, WalletRule};
use crate::provider::WalletStats;

/// Select aggregates satisfying the filter, ranked by distinct-wallet count
/// descending; equal counts keep first-seen order.
pub fn select_matches(aggregates: AggregateMap, filter: &AlertFilter) -> Vec<TokenAggregate> {
    let exclusions = ExclusionSet::new(&filter.excluded_tokens);

    let mut matches: Vec<TokenAggregate> = aggregates
        .into_vec()
        .into_iter()
        .filter(|agg| {
            if exclusions.matches(&agg.address, &agg.symbol) {
                return false;
            }
            agg.distinct_wallets() >= filter.min_distinct_wallets
        })
        .collect();

    // Stable sort keeps insertion order for ties
    matches.sort_by(|a, b| b.distinct_wallets().cmp(&a.distinct_wallets()));

    debug!(matches = matches.len(), "Selected matching tokens");

    matches
}

/// Non-strict threshold; missing or non-numeric stats never fail a wallet
fn stat_passes(value: Option<f64>, min: f64) -> bool {
    match value {
        None => true,
        Some(v) if v.is_nan() => true,
        Some(v) => v >= min,
    }
}

/// Whether one wallet satisfies the quality thresholds
///
/// A wallet with no stats at all passes: unknown never excludes.
pub fn wallet_passes(stats: Option<&WalletStats>, filter: &WalletQualityFilter) -> bool {
    match stats {
        None => true,
        Some(s) => {
            stat_passes(s.win_rate, filter.min_win_rate) && stat_passes(s.roi, filter.min_roi)
        }
    }
}

/// Apply the optional wallet-quality gate
///
/// Must run after enrichment has attached per-wallet stats. Absence of the
/// filter passes everything.
pub fn apply_wallet_filter(
    matches: Vec<TokenAggregate>,
    filter: Option<&WalletQualityFilter>,
) -> Vec<TokenAggregate> {
    let Some(filter) = filter else {
        return matches;
    };

    matches
        .into_iter()
        .filter(|agg| match filter.rule {
            WalletRule::Every => agg
                .wallets
                .iter()
                .all(|w| wallet_passes(agg.wallet_stats.get(w), filter)),
            WalletRule::Any => agg
                .wallets
                .iter()
                .any(|w| wallet_passes(agg.wallet_stats.get(w), filter)),
        })
        .collect()
}
