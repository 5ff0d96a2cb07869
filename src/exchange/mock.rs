//! Paper exchange for dry runs and engine tests.
//!
//! Implements [`Exchange`] against in-memory state: scripted prices and
//! funding snapshots, a simulated wallet, and a journal of every order the
//! engine submits. Tests drive the scripted state and assert on the journal.

use crate::exchange::error::ExchangeError;
use crate::exchange::traits::Exchange;
use crate::exchange::types::{
    FundingRateEntry, InstrumentInfo, LotSizeFilter, OrderAck, OrderRequest, PriceFilter,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::info;

/// In-memory exchange double.
pub struct PaperExchange {
    prices: RwLock<HashMap<String, Decimal>>,
    funding: RwLock<HashMap<String, FundingRateEntry>>,
    instruments: RwLock<HashMap<String, InstrumentInfo>>,
    balance: RwLock<Decimal>,
    orders: RwLock<Vec<OrderRequest>>,
    order_seq: AtomicU64,
    fail_orders: AtomicBool,
}

impl PaperExchange {
    /// Create a paper exchange with the given wallet balance.
    pub fn new(balance: Decimal) -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            funding: RwLock::new(HashMap::new()),
            instruments: RwLock::new(HashMap::new()),
            balance: RwLock::new(balance),
            orders: RwLock::new(Vec::new()),
            order_seq: AtomicU64::new(0),
            fail_orders: AtomicBool::new(false),
        }
    }

    /// Script the last traded price for a symbol.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    /// Script the latest funding snapshot for a symbol.
    pub async fn set_funding(&self, symbol: &str, rate: Decimal, settled_at_ms: i64) {
        self.funding.write().await.insert(
            symbol.to_string(),
            FundingRateEntry {
                symbol: symbol.to_string(),
                funding_rate: rate,
                funding_rate_timestamp: settled_at_ms,
            },
        );
    }

    /// Script instrument filters for a symbol.
    pub async fn set_instrument(&self, symbol: &str, tick_size: Decimal, qty_step: Decimal) {
        self.instruments.write().await.insert(
            symbol.to_string(),
            InstrumentInfo {
                symbol: symbol.to_string(),
                price_filter: PriceFilter { tick_size },
                lot_size_filter: LotSizeFilter {
                    qty_step,
                    min_order_qty: qty_step,
                },
            },
        );
    }

    /// Make subsequent `place_order` calls fail with an API error.
    pub fn fail_next_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    /// Orders submitted so far, oldest first.
    pub async fn placed_orders(&self) -> Vec<OrderRequest> {
        self.orders.read().await.clone()
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn funding_history(&self, symbol: &str) -> Result<FundingRateEntry, ExchangeError> {
        self.funding
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or(ExchangeError::EmptyResult("funding history"))
    }

    async fn last_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or(ExchangeError::EmptyResult("ticker"))
    }

    async fn instrument(&self, symbol: &str) -> Result<InstrumentInfo, ExchangeError> {
        if let Some(info) = self.instruments.read().await.get(symbol) {
            return Ok(info.clone());
        }
        // Permissive defaults for symbols tests did not bother scripting
        Ok(InstrumentInfo {
            symbol: symbol.to_string(),
            price_filter: PriceFilter {
                tick_size: dec!(0.0001),
            },
            lot_size_filter: LotSizeFilter {
                qty_step: dec!(1),
                min_order_qty: dec!(1),
            },
        })
    }

    async fn wallet_balance(&self, _coin: &str) -> Result<Decimal, ExchangeError> {
        Ok(*self.balance.read().await)
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(ExchangeError::Api {
                code: 10002,
                message: "scripted order failure".to_string(),
            });
        }

        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.orders.write().await.push(order.clone());

        info!(
            symbol = %order.symbol,
            side = %order.side,
            qty = %order.qty,
            order_type = ?order.order_type,
            "Paper order accepted"
        );

        Ok(OrderAck {
            order_id: format!("paper-{seq}"),
            order_link_id: String::new(),
        })
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: u8) -> Result<(), ExchangeError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::OrderSide;

    #[tokio::test]
    async fn test_orders_are_journaled_in_sequence() {
        let paper = PaperExchange::new(dec!(10000));
        let first = paper
            .place_order(&OrderRequest::market("XEMUSDT", OrderSide::Buy, dec!(1800)))
            .await
            .unwrap();
        let second = paper
            .place_order(&OrderRequest::market("XEMUSDT", OrderSide::Sell, dec!(1800)))
            .await
            .unwrap();

        assert_eq!(first.order_id, "paper-1");
        assert_eq!(second.order_id, "paper-2");
        assert_eq!(paper.placed_orders().await.len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failure_rejects_orders() {
        let paper = PaperExchange::new(dec!(10000));
        paper.fail_next_orders(true);
        let err = paper
            .place_order(&OrderRequest::market("XEMUSDT", OrderSide::Buy, dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Api { .. }));
        assert!(paper.placed_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_unscripted_price_is_an_error() {
        let paper = PaperExchange::new(dec!(10000));
        assert!(paper.last_price("BTCUSDT").await.is_err());
        paper.set_price("BTCUSDT", dec!(50000)).await;
        assert_eq!(paper.last_price("BTCUSDT").await.unwrap(), dec!(50000));
    }
}
