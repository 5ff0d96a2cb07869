//! Bybit connectivity for funding-window trading.
//!
//! Provides REST and WebSocket access for:
//! - Market data (funding history, tickers, instrument filters)
//! - Account operations (orders, leverage, balance)
//!
//! The [`Exchange`] trait is the seam between the engine and the venue; the
//! paper exchange implements it for dry runs and tests.

mod client;
mod error;
pub mod mock;
mod traits;
mod types;
mod websocket;

pub use client::BybitClient;
pub use error::ExchangeError;
pub use mock::PaperExchange;
pub use traits::Exchange;
pub use types::*;
pub use websocket::{BybitWebSocket, PriceUpdate, WsEvent};
