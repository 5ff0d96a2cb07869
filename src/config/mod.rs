//! Configuration management for the funding sniper.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bybit API credentials
    #[serde(default)]
    pub bybit: BybitConfig,
    /// Funding-window trade parameters
    #[serde(default)]
    pub trade: TradeConfig,
    /// Polling cadence
    #[serde(default)]
    pub poll: PollConfig,
    /// Funding-rate leaderboard settings
    #[serde(default)]
    pub scanner: ScannerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BybitConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub api_secret: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeConfig {
    /// Perpetual to trade (linear category)
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Order quantity in base units
    #[serde(default = "default_qty")]
    pub qty: Decimal,
    /// Funding settlement interval in hours (1, 4 or 8 on Bybit)
    #[serde(default = "default_funding_interval_hours")]
    pub funding_interval_hours: f64,
    /// Seconds before settlement at which the entry window opens
    #[serde(default = "default_entry_lead_secs")]
    pub entry_lead_secs: f64,
    /// Seconds before settlement at which the reference price is captured
    #[serde(default = "default_close_offset_secs")]
    pub close_offset_secs: f64,
    /// Target profit as a percentage of the captured price
    #[serde(default = "default_profit_pct")]
    pub profit_pct: Decimal,
    /// Optional stop-loss distance as a percentage of the captured price
    #[serde(default)]
    pub stop_loss_pct: Option<Decimal>,
    /// Flip the funding-implied entry direction
    #[serde(default)]
    pub reverse: bool,
    /// Add |funding rate| to the profit target (close past the rate, not just
    /// the configured percentage)
    #[serde(default)]
    pub include_funding_in_target: bool,
    /// Skip windows whose |funding rate| is below this percentage (0 = off)
    #[serde(default)]
    pub min_abs_rate_pct: Decimal,
    /// Position leverage requested at startup
    #[serde(default = "default_leverage")]
    pub leverage: u8,
    /// Settlement coin for balance reporting
    #[serde(default = "default_coin")]
    pub coin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Engine tick period in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Seconds between funding snapshot refreshes
    #[serde(default = "default_snapshot_refresh_secs")]
    pub snapshot_refresh_secs: u64,
    /// Seconds between server ping measurements
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Number of symbols in the leaderboard
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Minimum 24h turnover in USDT to be listed
    #[serde(default = "default_min_turnover")]
    pub min_turnover_24h: Decimal,
}

// Default value functions
fn default_symbol() -> String {
    "XEMUSDT".to_string()
}

fn default_qty() -> Decimal {
    Decimal::new(1800, 0)
}

fn default_funding_interval_hours() -> f64 {
    1.0
}

fn default_entry_lead_secs() -> f64 {
    5.0
}

fn default_close_offset_secs() -> f64 {
    1.0
}

fn default_profit_pct() -> Decimal {
    Decimal::new(3, 1) // 0.3%
}

fn default_leverage() -> u8 {
    4
}

fn default_coin() -> String {
    "USDT".to_string()
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_snapshot_refresh_secs() -> u64 {
    60
}

fn default_ping_interval_secs() -> u64 {
    60
}

fn default_top_n() -> usize {
    10
}

fn default_min_turnover() -> Decimal {
    Decimal::new(1_000_000, 0) // $1M
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("FSNIPER"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.trade.symbol.is_empty(),
            "trade.symbol must not be empty"
        );

        anyhow::ensure!(self.trade.qty > Decimal::ZERO, "trade.qty must be positive");

        anyhow::ensure!(
            self.trade.funding_interval_hours > 0.0,
            "trade.funding_interval_hours must be positive"
        );

        anyhow::ensure!(
            self.trade.entry_lead_secs > 0.0
                && self.trade.entry_lead_secs < self.trade.funding_interval_hours * 3600.0,
            "trade.entry_lead_secs must be positive and shorter than the funding interval"
        );

        anyhow::ensure!(
            self.trade.close_offset_secs >= 0.0,
            "trade.close_offset_secs must not be negative"
        );

        anyhow::ensure!(
            self.trade.profit_pct > Decimal::ZERO,
            "trade.profit_pct must be positive"
        );

        if let Some(stop) = self.trade.stop_loss_pct {
            anyhow::ensure!(stop > Decimal::ZERO, "trade.stop_loss_pct must be positive");
        }

        anyhow::ensure!(
            self.trade.min_abs_rate_pct >= Decimal::ZERO,
            "trade.min_abs_rate_pct must not be negative"
        );

        anyhow::ensure!(self.trade.leverage >= 1, "trade.leverage must be >= 1");

        anyhow::ensure!(self.poll.tick_ms > 0, "poll.tick_ms must be positive");

        anyhow::ensure!(self.scanner.top_n > 0, "scanner.top_n must be positive");

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bybit: BybitConfig::default(),
            trade: TradeConfig::default(),
            poll: PollConfig::default(),
            scanner: ScannerConfig::default(),
        }
    }
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            testnet: false,
        }
    }
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            qty: default_qty(),
            funding_interval_hours: default_funding_interval_hours(),
            entry_lead_secs: default_entry_lead_secs(),
            close_offset_secs: default_close_offset_secs(),
            profit_pct: default_profit_pct(),
            stop_loss_pct: None,
            reverse: false,
            include_funding_in_target: false,
            min_abs_rate_pct: Decimal::ZERO,
            leverage: default_leverage(),
            coin: default_coin(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            snapshot_refresh_secs: default_snapshot_refresh_secs(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            min_turnover_24h: default_min_turnover(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_entry_lead_must_fit_inside_interval() {
        let mut config = Config::default();
        config.trade.funding_interval_hours = 1.0;
        config.trade.entry_lead_secs = 3600.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_qty_is_rejected() {
        let mut config = Config::default();
        config.trade.qty = Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_stop_loss_is_rejected() {
        let mut config = Config::default();
        config.trade.stop_loss_pct = Some(dec!(-1));
        assert!(config.validate().is_err());
    }
}
