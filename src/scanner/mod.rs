//! Funding-rate leaderboard across all linear perpetuals.
//!
//! One tickers call covers the whole category; symbols are filtered by
//! turnover and ranked by absolute funding rate. This feeds the `scan` CLI
//! subcommand and is not on the trading path.

use crate::config::ScannerConfig;
use crate::exchange::{BybitClient, ExchangeError, Ticker};
use crate::schedule::format_countdown;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, instrument};

/// One leaderboard row.
#[derive(Debug, Clone)]
pub struct ScanRow {
    pub symbol: String,
    /// Raw rate, e.g. 0.0001 = 0.01%
    pub funding_rate: Decimal,
    pub next_funding: Option<DateTime<Utc>>,
    pub last_price: Decimal,
    pub turnover_24h: Decimal,
}

/// Ranks linear perpetuals by funding-rate magnitude.
pub struct FundingScanner {
    config: ScannerConfig,
}

impl FundingScanner {
    /// Create a new scanner with the given configuration.
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Fetch tickers and return the top rows by |funding rate|.
    #[instrument(skip(self, client))]
    pub async fn scan(&self, client: &BybitClient) -> Result<Vec<ScanRow>, ExchangeError> {
        let tickers = client.tickers().await?;
        let total = tickers.len();
        let rows = self.rank(tickers);
        info!(
            scanned = total,
            listed = rows.len(),
            "Funding scan complete"
        );
        Ok(rows)
    }

    /// Filter and rank tickers. Pure so tests can drive it with canned data.
    fn rank(&self, tickers: Vec<Ticker>) -> Vec<ScanRow> {
        let mut rows: Vec<ScanRow> = tickers
            .into_iter()
            .filter_map(|t| {
                let funding_rate = t.funding_rate?;
                let turnover = t.turnover24h.unwrap_or(Decimal::ZERO);
                if turnover < self.config.min_turnover_24h {
                    return None;
                }
                let next_funding = t
                    .next_funding_time
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
                Some(ScanRow {
                    symbol: t.symbol,
                    funding_rate,
                    next_funding,
                    last_price: t.last_price,
                    turnover_24h: turnover,
                })
            })
            .collect();

        rows.sort_by(|a, b| b.funding_rate.abs().cmp(&a.funding_rate.abs()));
        rows.truncate(self.config.top_n);
        rows
    }
}

/// Render rows as a fixed-width table for the console.
pub fn render_table(rows: &[ScanRow], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<14} {:>10} {:>12} {:>14} {:>12}\n",
        "Symbol", "Rate %", "Countdown", "Last Price", "Turnover $M"
    ));
    for row in rows {
        let countdown = row
            .next_funding
            .map(|nf| format_countdown(nf - now))
            .unwrap_or_else(|| "--:--:--".to_string());
        out.push_str(&format!(
            "{:<14} {:>10.4} {:>12} {:>14} {:>12.1}\n",
            row.symbol,
            row.funding_rate * dec!(100),
            countdown,
            row.last_price,
            row.turnover_24h / dec!(1_000_000),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, rate: &str, turnover: &str) -> Ticker {
        serde_json::from_str(&format!(
            r#"{{
                "symbol": "{symbol}",
                "lastPrice": "1.0",
                "fundingRate": "{rate}",
                "nextFundingTime": "1700003600000",
                "turnover24h": "{turnover}"
            }}"#
        ))
        .unwrap()
    }

    fn scanner(top_n: usize) -> FundingScanner {
        FundingScanner::new(ScannerConfig {
            top_n,
            min_turnover_24h: dec!(1000000),
        })
    }

    #[test]
    fn test_rank_orders_by_rate_magnitude() {
        let rows = scanner(10).rank(vec![
            ticker("AUSDT", "0.0001", "5000000"),
            ticker("BUSDT", "-0.0030", "5000000"),
            ticker("CUSDT", "0.0005", "5000000"),
        ]);
        let symbols: Vec<_> = rows.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BUSDT", "CUSDT", "AUSDT"]);
    }

    #[test]
    fn test_rank_filters_thin_and_rateless_symbols() {
        let mut thin = ticker("THINUSDT", "0.0100", "10");
        thin.turnover24h = Some(dec!(10));
        let mut rateless = ticker("NORATEUSDT", "0.0001", "5000000");
        rateless.funding_rate = None;

        let rows = scanner(10).rank(vec![
            thin,
            rateless,
            ticker("OKUSDT", "0.0002", "5000000"),
        ]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "OKUSDT");
    }

    #[test]
    fn test_rank_truncates_to_top_n() {
        let rows = scanner(2).rank(vec![
            ticker("AUSDT", "0.0001", "5000000"),
            ticker("BUSDT", "0.0002", "5000000"),
            ticker("CUSDT", "0.0003", "5000000"),
        ]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].symbol, "CUSDT");
    }

    #[test]
    fn test_render_table_includes_countdown() {
        let rows = scanner(10).rank(vec![ticker("AUSDT", "0.0001", "5000000")]);
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let table = render_table(&rows, now);
        assert!(table.contains("AUSDT"));
        assert!(table.contains("01:00:00"));
    }
}
