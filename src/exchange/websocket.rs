//! Bybit v5 public WebSocket client for real-time ticker data.
//!
//! Streams `tickers.{symbol}` updates so the engine has a fresher price at
//! the capture instant than a REST round trip can provide. The stream is a
//! freshness optimization only: on disconnect the engine falls back to REST.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const PUBLIC_LINEAR_WS_URL: &str = "wss://stream.bybit.com/v5/public/linear";
const PUBLIC_LINEAR_TESTNET_WS_URL: &str = "wss://stream-testnet.bybit.com/v5/public/linear";

/// Interval for the application-level ping Bybit expects from clients.
const PING_INTERVAL: Duration = Duration::from_secs(20);

/// WebSocket event types.
#[derive(Debug, Clone)]
pub enum WsEvent {
    /// Last-price update for a subscribed symbol
    Price(PriceUpdate),
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
}

/// Last traded price pushed by the ticker stream.
#[derive(Debug, Clone)]
pub struct PriceUpdate {
    pub symbol: String,
    pub last_price: Decimal,
}

#[derive(Debug, Deserialize)]
struct TickerPush {
    topic: String,
    data: TickerPushData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerPushData {
    symbol: String,
    // Deltas omit unchanged fields; lastPrice is not guaranteed per message
    #[serde(default, with = "super::types::opt_str_decimal")]
    last_price: Option<Decimal>,
}

/// Bybit public WebSocket client.
pub struct BybitWebSocket {
    url: String,
}

impl BybitWebSocket {
    /// Create a new WebSocket client.
    pub fn new(testnet: bool) -> Self {
        let url = if testnet {
            PUBLIC_LINEAR_TESTNET_WS_URL.to_string()
        } else {
            PUBLIC_LINEAR_WS_URL.to_string()
        };
        Self { url }
    }

    /// Subscribe to the ticker stream for one symbol.
    ///
    /// Spawns a task that forwards price updates over `tx` and keeps the
    /// connection alive with the JSON ping Bybit requires. Returns after the
    /// subscription request is sent; stream loss is reported as
    /// [`WsEvent::Disconnected`].
    pub async fn subscribe_ticker(&self, symbol: &str, tx: mpsc::Sender<WsEvent>) -> Result<()> {
        info!(url = %self.url, %symbol, "Connecting to ticker stream");

        let (ws_stream, _) = connect_async(&self.url)
            .await
            .context("Failed to connect to WebSocket")?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = serde_json::json!({
            "op": "subscribe",
            "args": [format!("tickers.{symbol}")],
        });
        write
            .send(Message::Text(subscribe.to_string().into()))
            .await
            .context("Failed to send subscribe request")?;

        let _ = tx.send(WsEvent::Connected).await;

        tokio::spawn(async move {
            let mut ping_timer = tokio::time::interval(PING_INTERVAL);
            ping_timer.tick().await; // first tick fires immediately

            loop {
                tokio::select! {
                    _ = ping_timer.tick() => {
                        let ping = Message::Text(r#"{"op":"ping"}"#.into());
                        if write.send(ping).await.is_err() {
                            warn!("Ping failed, closing ticker stream");
                            let _ = tx.send(WsEvent::Disconnected).await;
                            return;
                        }
                    }
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                for event in parse_ticker_message(&text) {
                                    if tx.send(event).await.is_err() {
                                        warn!("Event receiver dropped");
                                        return;
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(_))) => {
                                debug!("Received ping frame");
                                // Pong is handled automatically by tungstenite
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                info!("WebSocket closed by server");
                                let _ = tx.send(WsEvent::Disconnected).await;
                                return;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error: {}", e);
                                let _ = tx.send(WsEvent::Disconnected).await;
                                return;
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        Ok(())
    }
}

/// Parse one text frame into zero or more events.
///
/// Non-ticker frames (subscription acks, pong responses) are ignored.
fn parse_ticker_message(text: &str) -> Vec<WsEvent> {
    let Ok(push) = serde_json::from_str::<TickerPush>(text) else {
        return Vec::new();
    };
    if !push.topic.starts_with("tickers.") {
        return Vec::new();
    }
    match push.data.last_price {
        Some(last_price) => vec![WsEvent::Price(PriceUpdate {
            symbol: push.data.symbol,
            last_price,
        })],
        None => Vec::new(),
    }
}
