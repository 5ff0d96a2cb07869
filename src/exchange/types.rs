//! Type definitions for Bybit v5 API requests and responses.
//!
//! Bybit serializes every numeric field as a string; money fields map to
//! `Decimal` via `rust_decimal::serde::str`, timestamps via the helpers below.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Deserialize a millisecond timestamp encoded as a JSON string.
pub(crate) mod str_i64 {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Deserialize an optional string-encoded millisecond timestamp.
///
/// Bybit reports `""` for instruments without the field (e.g. expiring
/// contracts in the linear category).
pub(crate) mod opt_str_i64 {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        Ok(s.and_then(|s| s.parse().ok()))
    }
}

/// Deserialize an optional string-encoded decimal, treating `""` as absent.
pub(crate) mod opt_str_decimal {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer};
    use std::str::FromStr;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        Ok(s.and_then(|s| Decimal::from_str(&s).ok()))
    }
}

/// Envelope wrapping every v5 endpoint payload.
///
/// `ret_code != 0` signals an API-level error even on HTTP 200.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub ret_code: i64,
    pub ret_msg: String,
    pub result: Option<T>,
}

/// Generic list payload (`result.list`).
#[derive(Debug, Clone, Deserialize)]
pub struct ListResult<T> {
    pub list: Vec<T>,
}

/// One row of `/v5/market/funding/history`.
///
/// `funding_rate_timestamp` is the *previous* settlement instant in ms.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRateEntry {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub funding_rate: Decimal,
    #[serde(with = "str_i64")]
    pub funding_rate_timestamp: i64,
}

/// One row of `/v5/market/tickers?category=linear`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub last_price: Decimal,
    #[serde(default, with = "opt_str_decimal")]
    pub funding_rate: Option<Decimal>,
    #[serde(default, with = "opt_str_i64")]
    pub next_funding_time: Option<i64>,
    #[serde(default, with = "opt_str_decimal")]
    pub turnover24h: Option<Decimal>,
    #[serde(default, with = "opt_str_decimal")]
    pub bid1_price: Option<Decimal>,
    #[serde(default, with = "opt_str_decimal")]
    pub ask1_price: Option<Decimal>,
}

/// Price precision constraints for an instrument.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceFilter {
    #[serde(with = "rust_decimal::serde::str")]
    pub tick_size: Decimal,
}

/// Quantity precision constraints for an instrument.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotSizeFilter {
    #[serde(with = "rust_decimal::serde::str")]
    pub qty_step: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub min_order_qty: Decimal,
}

/// One row of `/v5/market/instruments-info`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentInfo {
    pub symbol: String,
    pub price_filter: PriceFilter,
    pub lot_size_filter: LotSizeFilter,
}

/// Per-coin balance inside a unified account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinBalance {
    pub coin: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub wallet_balance: Decimal,
}

/// One account entry of `/v5/account/wallet-balance`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAccount {
    pub account_type: String,
    pub coin: Vec<CoinBalance>,
}

/// Payload of `/v5/market/time`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    #[serde(with = "str_i64")]
    pub time_second: i64,
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The side that closes a position opened on `self`.
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "Buy"),
            OrderSide::Sell => write!(f, "Sell"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

/// Time in force for orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    #[serde(rename = "GTC")]
    Gtc,
    #[serde(rename = "IOC")]
    Ioc,
    #[serde(rename = "FOK")]
    Fok,
    PostOnly,
}

/// New order request for `/v5/order/create`.
///
/// `trigger_price`/`trigger_direction` turn the order into a conditional one
/// (used for the stop-loss leg).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub category: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::str_option"
    )]
    pub price: Option<Decimal>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::str_option"
    )]
    pub trigger_price: Option<Decimal>,
    /// 1 = triggered when price rises to trigger_price, 2 = when it falls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_direction: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<TimeInForce>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
}

impl OrderRequest {
    /// Market order in the linear category.
    pub fn market(symbol: &str, side: OrderSide, qty: Decimal) -> Self {
        Self {
            category: "linear".to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            qty,
            price: None,
            trigger_price: None,
            trigger_direction: None,
            time_in_force: Some(TimeInForce::Gtc),
            reduce_only: None,
        }
    }

    /// Reduce-only GTC limit order in the linear category.
    pub fn limit_close(symbol: &str, side: OrderSide, qty: Decimal, price: Decimal) -> Self {
        Self {
            category: "linear".to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            qty,
            price: Some(price),
            trigger_price: None,
            trigger_direction: None,
            time_in_force: Some(TimeInForce::Gtc),
            reduce_only: Some(true),
        }
    }

    /// Reduce-only conditional market order (stop-loss leg).
    pub fn stop_close(
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        trigger_price: Decimal,
        trigger_direction: u8,
    ) -> Self {
        Self {
            category: "linear".to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            qty,
            price: None,
            trigger_price: Some(trigger_price),
            trigger_direction: Some(trigger_direction),
            time_in_force: Some(TimeInForce::Gtc),
            reduce_only: Some(true),
        }
    }
}

/// Acknowledgement from `/v5/order/create`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: String,
    #[serde(default)]
    pub order_link_id: String,
}
