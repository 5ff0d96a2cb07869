//! Execution seam between the engine and the venue.
//!
//! The engine talks to the exchange through this trait so the live client and
//! the paper exchange are interchangeable. It is a test/paper seam, not a
//! multi-venue abstraction: the operations are exactly the Bybit v5 calls the
//! funding-window strategy needs.

use crate::exchange::error::ExchangeError;
use crate::exchange::types::{FundingRateEntry, InstrumentInfo, OrderAck, OrderRequest};
use crate::exchange::BybitClient;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// The venue operations the funding-window engine depends on.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Most recent funding settlement (rate + timestamp) for a symbol.
    async fn funding_history(&self, symbol: &str) -> Result<FundingRateEntry, ExchangeError>;

    /// Last traded price for a symbol.
    async fn last_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// Tick size and lot step for a symbol.
    async fn instrument(&self, symbol: &str) -> Result<InstrumentInfo, ExchangeError>;

    /// Wallet balance of one coin.
    async fn wallet_balance(&self, coin: &str) -> Result<Decimal, ExchangeError>;

    /// Place an order, returning the venue's acknowledgement.
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError>;

    /// Set position leverage for a symbol.
    async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<(), ExchangeError>;
}

#[async_trait]
impl Exchange for crate::exchange::BybitClient {
    async fn funding_history(&self, symbol: &str) -> Result<FundingRateEntry, ExchangeError> {
        BybitClient::funding_history(self, symbol).await
    }

    async fn last_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        Ok(BybitClient::ticker(self, symbol).await?.last_price)
    }

    async fn instrument(&self, symbol: &str) -> Result<InstrumentInfo, ExchangeError> {
        BybitClient::instrument(self, symbol).await
    }

    async fn wallet_balance(&self, coin: &str) -> Result<Decimal, ExchangeError> {
        BybitClient::wallet_balance(self, coin).await
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        BybitClient::place_order(self, order).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<(), ExchangeError> {
        BybitClient::set_leverage(self, symbol, leverage).await
    }
}
