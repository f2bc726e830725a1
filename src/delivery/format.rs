//! Alert message formatting
//!
//! Produces the HTML message body: alert header with its condition summary,
//! token risk section, and monospace tables for transactions and wallet
//! stats. Missing enrichment data renders as "unknown" or "-" placeholders,
//! never as an error.

use chrono::{DateTime, Utc};

use crate::aggregator::{parse_utc_timestamp, TokenAggregate};
use crate::config::AlertDefinition;
use crate::provider::TransactionRecord;

const TXN_TABLE_HEADERS: [&str; 5] = ["Addr", "Src", "Price", "TxnVal", "Time"];
const TXN_TABLE_MIN_ROWS: usize = 2;
const WALLET_TABLE_HEADERS: [&str; 4] = ["Addr", "Win Rate", "ROI", "Tokens"];
const WALLET_TABLE_MIN_ROWS: usize = 1;

/// Escape text interpolated into HTML message bodies
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Last four characters of an address, the usual short form
pub fn short_addr(address: &str) -> &str {
    let len = address.len();
    &address[len.saturating_sub(4)..]
}

/// Thousands-separated integer rendering of a USD value
pub fn format_value(value: f64) -> String {
    let negative = value < 0.0;
    let rounded = value.abs().round() as u64;
    let digits = rounded.to_string();

    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }

    if negative {
        format!("-{}", out)
    } else {
        out
    }
}

/// Compact price rendering across magnitudes
///
/// Four significant digits down to 0.01; below that, leading zeros are
/// collapsed into a `0.0(n)` prefix so micro-cap prices stay readable.
pub fn format_price(price: Option<f64>) -> String {
    let Some(p) = price else {
        return "-".to_string();
    };
    if !p.is_finite() || p <= 0.0 {
        return if p == 0.0 { "0".to_string() } else { "-".to_string() };
    }

    if p >= 1.0 {
        let int_digits = p.log10().floor() as usize + 1;
        let decimals = 4usize.saturating_sub(int_digits);
        return format!("{:.*}", decimals, p);
    }
    if p >= 0.1 {
        return format!("{:.4}", p);
    }
    if p >= 0.01 {
        return format!("{:.5}", p);
    }

    // 0.0000001234 -> 0.0(6)1234
    let exponent = p.log10().floor() as i32;
    let zeros = (-exponent - 1) as usize;
    let mantissa = p / 10f64.powi(exponent);
    let digits = format!("{:.3}", mantissa).replace('.', "");
    format!("0.0({}){}", zeros, digits)
}

/// Table time column: hour and minute of the purchase
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%H:%M").to_string()
}

/// Human age like "2 days 3 hours ago"; "-" when unknown
pub fn age_string(created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(created) = created_at else {
        return "-".to_string();
    };

    let elapsed = now.signed_duration_since(created);
    if elapsed.num_seconds() < 0 {
        return "-".to_string();
    }

    let days = elapsed.num_days();
    let hours = elapsed.num_hours() - days * 24;
    let minutes = elapsed.num_minutes() - elapsed.num_hours() * 60;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{} {} ", days, if days > 1 { "days" } else { "day" }));
    }
    if hours > 0 {
        out.push_str(&format!("{} {} ", hours, if hours > 1 { "hours" } else { "hour" }));
    }
    if days == 0 && minutes > 0 {
        out.push_str(&format!(
            "{} {} ",
            minutes,
            if minutes > 1 { "minutes" } else { "minute" }
        ));
    }
    out.push_str("ago");
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

/// Render a padded monospace table with a markdown-style separator row
fn render_table(
    headers: &[&str],
    rows: &[Vec<String>],
    aligns: &[Align],
    min_rows: usize,
) -> String {
    let columns = headers.len();
    let mut padded_rows: Vec<Vec<String>> = rows.to_vec();
    while padded_rows.len() < min_rows {
        padded_rows.push(vec![String::new(); columns]);
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len().max(3)).collect();
    for row in &padded_rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let format_cell = |text: &str, width: usize, align: Align| match align {
        Align::Left => format!("{:<width$}", text, width = width),
        Align::Right => format!("{:>width$}", text, width = width),
    };

    let mut lines = Vec::with_capacity(padded_rows.len() + 2);
    lines.push(
        headers
            .iter()
            .enumerate()
            .map(|(i, h)| format_cell(h, widths[i], aligns[i]))
            .collect::<Vec<_>>()
            .join(" | "),
    );
    lines.push(
        widths
            .iter()
            .zip(aligns)
            .map(|(&w, &a)| match a {
                Align::Left => format!(":{}", "-".repeat(w.saturating_sub(1))),
                Align::Right => format!("{}:", "-".repeat(w.saturating_sub(1))),
            })
            .collect::<Vec<_>>()
            .join(" | "),
    );
    for row in &padded_rows {
        lines.push(
            row.iter()
                .enumerate()
                .map(|(i, cell)| format_cell(cell, widths[i], aligns[i]))
                .collect::<Vec<_>>()
                .join(" | "),
        );
    }

    lines.join("\n")
}

fn overflow_line(total: usize, shown: usize) -> String {
    if total > shown {
        format!("\n... and {} more", total - shown)
    } else {
        String::new()
    }
}

/// Transactions table block
pub fn txns_table(transactions: &[TransactionRecord], max_rows: usize) -> String {
    let shown = transactions.len().min(max_rows);
    let rows: Vec<Vec<String>> = transactions[..shown]
        .iter()
        .map(|txn| {
            let time = parse_utc_timestamp(&txn.time)
                .map(format_timestamp)
                .unwrap_or_else(|| "-".to_string());
            vec![
                short_addr(&txn.address).to_string(),
                txn.funding_source.clone().unwrap_or_else(|| "-".to_string()),
                format_price(txn.buy_price),
                format_value(txn.txn_value),
                time,
            ]
        })
        .collect();

    let table = render_table(
        &TXN_TABLE_HEADERS,
        &rows,
        &[Align::Left, Align::Left, Align::Right, Align::Right, Align::Left],
        TXN_TABLE_MIN_ROWS,
    );

    format!(
        "📈 <b>Transactions</b>\n<pre>{}{}</pre>",
        table,
        overflow_line(transactions.len(), shown)
    )
}

fn percent_cell(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.2}%", v * 100.0),
        _ => "-".to_string(),
    }
}

/// Wallet performance table block
pub fn wallets_table(aggregate: &TokenAggregate, max_rows: usize) -> String {
    let shown = aggregate.wallets.len().min(max_rows);
    let rows: Vec<Vec<String>> = aggregate.wallets[..shown]
        .iter()
        .map(|wallet| {
            let stats = aggregate.wallet_stats.get(wallet);
            let coins = match stats.and_then(|s| s.coins_traded) {
                Some(c) if c.is_finite() => format!("{}", c.round() as i64),
                _ => "-".to_string(),
            };
            vec![
                short_addr(wallet).to_string(),
                percent_cell(stats.and_then(|s| s.win_rate)),
                percent_cell(stats.and_then(|s| s.roi)),
                coins,
            ]
        })
        .collect();

    let table = render_table(
        &WALLET_TABLE_HEADERS,
        &rows,
        &[Align::Left, Align::Right, Align::Right, Align::Right],
        WALLET_TABLE_MIN_ROWS,
    );

    format!(
        "📊 <b>Wallet stats</b>\n<pre>{}{}</pre>",
        table,
        overflow_line(aggregate.wallets.len(), shown)
    )
}

/// "View wallets" link line; wallets without a profile URL are skipped
pub fn wallet_links(
    aggregate: &TokenAggregate,
    max_rows: usize,
    profile_url: &dyn Fn(&str) -> Option<String>,
) -> Option<String> {
    let links: Vec<String> = aggregate
        .wallets
        .iter()
        .take(max_rows)
        .filter_map(|wallet| {
            profile_url(wallet)
                .map(|url| format!("<a href=\"{}\">{}</a>", url, short_addr(wallet)))
        })
        .collect();

    if links.is_empty() {
        return None;
    }
    Some(format!("View wallets: {}", links.join(" | ")))
}

/// Alert name plus a one-line summary of its conditions
pub fn alert_header(definition: &AlertDefinition) -> String {
    let mut conditions = vec![
        format!("Buy ≥ ${}", format_value(definition.query.value_filter as f64)),
        format!("Wallet age ≤ {}D", definition.query.wallet_age_days),
    ];
    if definition.query.bought_token_limit {
        conditions.push("Tokens bought ≤ 2".to_string());
    }
    conditions.push(format!(
        "Distinct wallets ≥ {}",
        definition.filter.min_distinct_wallets
    ));
    conditions.push(format!("Past {} mins", definition.filter.window_minutes));

    format!(
        "<b><i>{}</i></b>\n<i>{}</i>",
        escape_html(&definition.name),
        conditions.join(", ")
    )
}

fn honeypot_line(aggregate: &TokenAggregate) -> String {
    match &aggregate.intel.honeypot {
        None => "Honeypot: unknown".to_string(),
        Some(v) => {
            let verdict = if v.is_honeypot { "YES ⚠️" } else { "No" };
            let taxes = match (v.buy_tax, v.sell_tax) {
                (Some(b), Some(s)) => format!(" (buy {:.1}%, sell {:.1}%)", b, s),
                _ => String::new(),
            };
            format!("Honeypot: {}{}", verdict, taxes)
        }
    }
}

fn security_line(aggregate: &TokenAggregate) -> String {
    match &aggregate.intel.security {
        None => "Security: unknown".to_string(),
        Some(v) => {
            let mut notes = Vec::new();
            match v.is_open_source {
                Some(true) => notes.push("open source".to_string()),
                Some(false) => notes.push("closed source".to_string()),
                None => {}
            }
            if v.hidden_owner == Some(true) {
                notes.push("hidden owner".to_string());
            }
            if v.is_mintable == Some(true) {
                notes.push("mintable".to_string());
            }
            if notes.is_empty() {
                notes.push("no flags".to_string());
            }
            format!("Security: {}", notes.join(", "))
        }
    }
}

/// Token identity and risk section
pub fn token_section(
    aggregate: &TokenAggregate,
    provider_base_url: &str,
    now: DateTime<Utc>,
) -> String {
    let symbol = aggregate.symbol.to_uppercase();
    let name = aggregate
        .intel
        .name
        .as_deref()
        .map(escape_html)
        .unwrap_or_else(|| "unknown".to_string());

    let mut lines = vec![
        format!("💊 <b>{}</b> ({})", escape_html(&symbol), name),
        format!("Age: {}", age_string(aggregate.intel.created_at, now)),
        honeypot_line(aggregate),
        security_line(aggregate),
    ];

    lines.push(format!(
        "<a href=\"{}/crypto/{}\">View {} on candlestick.io</a>",
        provider_base_url, aggregate.address, symbol
    ));

    lines.join("\n")
}

/// Activity summary plus tables, honoring the definition's display flags
pub fn activities_section(
    definition: &AlertDefinition,
    aggregate: &TokenAggregate,
    max_rows: usize,
    profile_url: &dyn Fn(&str) -> Option<String>,
) -> String {
    let mut parts = vec![
        format!("Distinct wallets: {}", aggregate.distinct_wallets()),
        format!("Total txn value: ${}", format_value(aggregate.total_value)),
        String::new(),
        txns_table(&aggregate.transactions, max_rows),
    ];

    if definition.display.show_wallet_stats {
        parts.push(wallets_table(aggregate, max_rows));
    }
    if definition.display.show_wallet_links {
        if let Some(links) = wallet_links(aggregate, max_rows, profile_url) {
            parts.push(links);
        }
    }

    parts.join("\n")
}

/// Assemble the full alert message
pub fn build_alert_message(
    definition: &AlertDefinition,
    aggregate: &TokenAggregate,
    provider_base_url: &str,
    max_rows: usize,
    now: DateTime<Utc>,
    profile_url: &dyn Fn(&str) -> Option<String>,
) -> String {
    [
        alert_header(definition),
        token_section(aggregate, provider_base_url, now),
        activities_section(definition, aggregate, max_rows, profile_url),
    ]
    .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlertFilter, AlertQuery, DisplayFlags};
    use crate::provider::WalletStats;

    fn txn(wallet: &str, minute: u32, value: f64) -> TransactionRecord {
        TransactionRecord {
            time: format!("2024-03-01 12:{:02}:00", minute),
            address: wallet.to_string(),
            buy_token_symbol: "pepe".to_string(),
            buy_token_address: "0xT1".to_string(),
            txn_value: value,
            buy_price: Some(0.0000012),
            funding_source: Some("ALL".to_string()),
        }
    }

    fn definition() -> AlertDefinition {
        AlertDefinition {
            id: 1,
            name: "Alert 1 - Stealth Wallets".to_string(),
            query: AlertQuery {
                page_size: 100,
                value_filter: 120,
                wallet_age_days: 1,
                bought_token_limit: true,
            },
            filter: AlertFilter {
                window_minutes: 5,
                min_distinct_wallets: 3,
                excluded_tokens: vec![],
            },
            wallet_filter: None,
            display: DisplayFlags::default(),
        }
    }

    fn aggregate() -> TokenAggregate {
        let mut agg = TokenAggregate::new("0xT1", "pepe");
        agg.push(txn("0xAAA1", 0, 150.0));
        agg.push(txn("0xBBB2", 1, 1_050.0));
        agg
    }

    #[test]
    fn test_format_value_groups_thousands() {
        assert_eq!(format_value(0.0), "0");
        assert_eq!(format_value(999.4), "999");
        assert_eq!(format_value(1_234.0), "1,234");
        assert_eq!(format_value(1_234_567.0), "1,234,567");
    }

    #[test]
    fn test_format_price_magnitudes() {
        assert_eq!(format_price(None), "-");
        assert_eq!(format_price(Some(0.0)), "0");
        assert_eq!(format_price(Some(123.456)), "123.5");
        assert_eq!(format_price(Some(1.5)), "1.500");
        assert_eq!(format_price(Some(0.1234)), "0.1234");
        assert_eq!(format_price(Some(0.0123)), "0.01230");
        // Sub-cent prices collapse leading zeros
        assert_eq!(format_price(Some(0.0000012)), "0.0(5)1200");
    }

    #[test]
    fn test_age_string_granularity() {
        let now = parse_utc_timestamp("2024-03-03 12:00:00").unwrap();
        let two_days = parse_utc_timestamp("2024-03-01 09:00:00").unwrap();
        assert_eq!(age_string(Some(two_days), now), "2 days 3 hours ago");

        let minutes_old = parse_utc_timestamp("2024-03-03 11:45:00").unwrap();
        assert_eq!(age_string(Some(minutes_old), now), "15 minutes ago");

        assert_eq!(age_string(None, now), "-");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("A&B <c>"), "A&amp;B &lt;c&gt;");
    }

    #[test]
    fn test_txns_table_contains_rows_and_overflow() {
        let transactions: Vec<TransactionRecord> =
            (0..25).map(|i| txn(&format!("0xW{:03}", i), 0, 10.0)).collect();
        let table = txns_table(&transactions, 20);

        assert!(table.starts_with("📈 <b>Transactions</b>\n<pre>"));
        assert!(table.contains("Addr"));
        assert!(table.contains("W000"));
        assert!(table.contains("... and 5 more"));
    }

    #[test]
    fn test_wallets_table_renders_missing_stats_as_dash() {
        let mut agg = aggregate();
        agg.wallet_stats.insert(
            "0xAAA1".to_string(),
            WalletStats {
                win_rate: Some(0.875),
                roi: Some(1.5),
                coins_traded: Some(12.0),
            },
        );

        let table = wallets_table(&agg, 20);
        assert!(table.contains("87.50%"));
        assert!(table.contains("150.00%"));
        assert!(table.contains("12"));
        // 0xBBB2 has no stats; its row shows dashes
        assert!(table.contains("BBB2"));
        assert!(table.contains("-"));
    }

    #[test]
    fn test_alert_header_summarizes_conditions() {
        let header = alert_header(&definition());
        assert!(header.contains("Alert 1 - Stealth Wallets"));
        assert!(header.contains("Buy ≥ $120"));
        assert!(header.contains("Wallet age ≤ 1D"));
        assert!(header.contains("Tokens bought ≤ 2"));
        assert!(header.contains("Distinct wallets ≥ 3"));
        assert!(header.contains("Past 5 mins"));
    }

    #[test]
    fn test_unknown_enrichment_renders_placeholders() {
        let now = parse_utc_timestamp("2024-03-01 12:10:00").unwrap();
        let section = token_section(&aggregate(), "https://www.candlestick.io", now);

        assert!(section.contains("PEPE"));
        assert!(section.contains("Age: -"));
        assert!(section.contains("Honeypot: unknown"));
        assert!(section.contains("Security: unknown"));
    }

    #[test]
    fn test_full_message_assembly() {
        let now = parse_utc_timestamp("2024-03-01 12:10:00").unwrap();
        let message = build_alert_message(
            &definition(),
            &aggregate(),
            "https://www.candlestick.io",
            20,
            now,
            &|wallet| Some(format!("https://example.com/{}", wallet)),
        );

        assert!(message.contains("Distinct wallets: 2"));
        assert!(message.contains("Total txn value: $1,200"));
        assert!(message.contains("View wallets:"));
        assert!(message.contains("View PEPE on candlestick.io"));
    }

    #[test]
    fn test_display_flags_suppress_sections() {
        let mut def = definition();
        def.display.show_wallet_stats = false;
        def.display.show_wallet_links = false;

        let section = activities_section(&def, &aggregate(), 20, &|_| None);
        assert!(!section.contains("Wallet stats"));
        assert!(!section.contains("View wallets:"));
    }
}
