//! Bybit v5 REST API client.

use crate::config::BybitConfig;
use crate::exchange::error::ExchangeError;
use crate::exchange::types::*;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

const BASE_URL: &str = "https://api.bybit.com";
const TESTNET_URL: &str = "https://api-testnet.bybit.com";

const RECV_WINDOW: &str = "5000";

/// Bybit v5 client for the linear perpetuals category.
pub struct BybitClient {
    http: Client,
    api_key: String,
    api_secret: String,
    base_url: String,
}

impl BybitClient {
    /// Create a new Bybit client from configuration.
    pub fn new(config: &BybitConfig) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let base_url = if config.testnet {
            TESTNET_URL.to_string()
        } else {
            BASE_URL.to_string()
        };

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            base_url,
        })
    }

    /// Generate the v5 HMAC-SHA256 signature.
    ///
    /// Signs `timestamp + api_key + recv_window + payload`, where payload is
    /// the query string for GET and the raw JSON body for POST.
    fn sign(&self, timestamp: u64, payload: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(self.api_key.as_bytes());
        mac.update(RECV_WINDOW.as_bytes());
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Get current timestamp in milliseconds.
    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as u64
    }

    /// Unwrap the v5 envelope, mapping non-zero retCode to an error.
    fn unwrap_envelope<T: DeserializeOwned>(
        envelope: ApiResponse<serde_json::Value>,
        what: &'static str,
    ) -> Result<T, ExchangeError> {
        if envelope.ret_code != 0 {
            return Err(ExchangeError::Api {
                code: envelope.ret_code,
                message: envelope.ret_msg,
            });
        }
        let value = envelope.result.ok_or(ExchangeError::EmptyResult(what))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Public (unsigned) GET.
    async fn get_public<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
        what: &'static str,
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        let envelope: ApiResponse<serde_json::Value> =
            self.http.get(&url).send().await?.json().await?;
        Self::unwrap_envelope(envelope, what)
    }

    /// Authenticated GET (signed query string).
    async fn get_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
        what: &'static str,
    ) -> Result<T, ExchangeError> {
        let timestamp = Self::timestamp();
        let signature = self.sign(timestamp, query);
        let url = format!("{}{}?{}", self.base_url, path, query);

        let envelope: ApiResponse<serde_json::Value> = self
            .http
            .get(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .send()
            .await?
            .json()
            .await?;
        Self::unwrap_envelope(envelope, what)
    }

    /// Authenticated POST (signed JSON body).
    async fn post_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl serde::Serialize,
        what: &'static str,
    ) -> Result<T, ExchangeError> {
        let raw = serde_json::to_string(body)?;
        let timestamp = Self::timestamp();
        let signature = self.sign(timestamp, &raw);
        let url = format!("{}{}", self.base_url, path);

        debug!(%url, body = %raw, "Signed POST");

        let envelope: ApiResponse<serde_json::Value> = self
            .http
            .post(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(raw)
            .send()
            .await?
            .json()
            .await?;
        Self::unwrap_envelope(envelope, what)
    }

    // ==================== Market Data (Public) ====================

    /// Most recent funding settlement for a symbol (rate + timestamp).
    #[instrument(skip(self))]
    pub async fn funding_history(
        &self,
        symbol: &str,
    ) -> Result<FundingRateEntry, ExchangeError> {
        let query = format!(
            "category=linear&symbol={}&limit=1",
            urlencoding::encode(symbol)
        );
        let result: ListResult<FundingRateEntry> = self
            .get_public("/v5/market/funding/history", &query, "funding history")
            .await?;
        result
            .list
            .into_iter()
            .next()
            .ok_or(ExchangeError::EmptyResult("funding history"))
    }

    /// Ticker for a single symbol.
    #[instrument(skip(self))]
    pub async fn ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let query = format!(
            "category=linear&symbol={}",
            urlencoding::encode(symbol)
        );
        let result: ListResult<Ticker> = self
            .get_public("/v5/market/tickers", &query, "ticker")
            .await?;
        result
            .list
            .into_iter()
            .next()
            .ok_or(ExchangeError::EmptyResult("ticker"))
    }

    /// Tickers for the whole linear category (scanner input).
    #[instrument(skip(self))]
    pub async fn tickers(&self) -> Result<Vec<Ticker>, ExchangeError> {
        let result: ListResult<Ticker> = self
            .get_public("/v5/market/tickers", "category=linear", "tickers")
            .await?;
        Ok(result.list)
    }

    /// Instrument filters (tick size, qty step) for a symbol.
    #[instrument(skip(self))]
    pub async fn instrument(&self, symbol: &str) -> Result<InstrumentInfo, ExchangeError> {
        let query = format!(
            "category=linear&symbol={}",
            urlencoding::encode(symbol)
        );
        let result: ListResult<InstrumentInfo> = self
            .get_public("/v5/market/instruments-info", &query, "instrument info")
            .await?;
        result
            .list
            .into_iter()
            .next()
            .ok_or(ExchangeError::EmptyResult("instrument info"))
    }

    /// Exchange server time.
    pub async fn server_time(&self) -> Result<DateTime<Utc>, ExchangeError> {
        let result: ServerTime = self
            .get_public("/v5/market/time", "", "server time")
            .await?;
        Ok(Utc
            .timestamp_opt(result.time_second, 0)
            .single()
            .unwrap_or_else(Utc::now))
    }

    /// Round-trip latency of the server-time endpoint.
    pub async fn measure_ping(&self) -> Result<Duration, ExchangeError> {
        let start = Instant::now();
        self.server_time().await?;
        Ok(start.elapsed())
    }

    // ==================== Account (Authenticated) ====================

    /// Wallet balance of one coin in the unified account.
    #[instrument(skip(self))]
    pub async fn wallet_balance(&self, coin: &str) -> Result<Decimal, ExchangeError> {
        let query = format!("accountType=UNIFIED&coin={}", urlencoding::encode(coin));
        let result: ListResult<WalletAccount> = self
            .get_signed("/v5/account/wallet-balance", &query, "wallet balance")
            .await?;

        result
            .list
            .first()
            .and_then(|account| account.coin.iter().find(|c| c.coin == coin))
            .map(|c| c.wallet_balance)
            .ok_or(ExchangeError::EmptyResult("wallet balance"))
    }

    // ==================== Orders (Authenticated) ====================

    /// Place an order.
    #[instrument(skip(self, order), fields(symbol = %order.symbol, side = %order.side))]
    pub async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        self.post_signed("/v5/order/create", order, "order create")
            .await
    }

    /// Set leverage for a symbol. "Not modified" responses are treated as
    /// success.
    #[instrument(skip(self))]
    pub async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<(), ExchangeError> {
        let body = serde_json::json!({
            "category": "linear",
            "symbol": symbol,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });

        match self
            .post_signed::<serde_json::Value>("/v5/position/set-leverage", &body, "set leverage")
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_leverage_not_modified() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BybitConfig;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: String) -> BybitClient {
        BybitClient {
            http: Client::new(),
            api_key: "test-key".to_string(),
            api_secret: "test-secret".to_string(),
            base_url,
        }
    }

    #[test]
    fn test_base_url_follows_testnet_flag() {
        let client = BybitClient::new(&BybitConfig {
            api_key: String::new(),
            api_secret: String::new(),
            testnet: true,
        })
        .unwrap();
        assert_eq!(client.base_url, TESTNET_URL);
    }

    #[test]
    fn test_signature_is_deterministic_hex() {
        let client = test_client(BASE_URL.to_string());
        let a = client.sign(1_700_000_000_000, "category=linear");
        let b = client.sign(1_700_000_000_000, "category=linear");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        // Payload changes the signature
        assert_ne!(a, client.sign(1_700_000_000_000, "category=spot"));
    }

    #[tokio::test]
    async fn test_funding_history_parses_latest_row() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v5/market/funding/history"))
            .and(query_param("symbol", "XEMUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{
                    "retCode": 0,
                    "retMsg": "OK",
                    "result": {
                        "category": "linear",
                        "list": [{
                            "symbol": "XEMUSDT",
                            "fundingRate": "0.0001",
                            "fundingRateTimestamp": "1700006400000"
                        }]
                    }
                }"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let entry = client.funding_history("XEMUSDT").await.unwrap();
        assert_eq!(entry.funding_rate, dec!(0.0001));
        assert_eq!(entry.funding_rate_timestamp, 1_700_006_400_000);
    }

    #[tokio::test]
    async fn test_nonzero_ret_code_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v5/market/tickers"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"retCode": 10001, "retMsg": "params error", "result": {}}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let err = client.ticker("NOPEUSDT").await.unwrap_err();
        match err {
            ExchangeError::Api { code, message } => {
                assert_eq!(code, 10001);
                assert_eq!(message, "params error");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_list_maps_to_empty_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v5/market/funding/history"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"retCode": 0, "retMsg": "OK", "result": {"category": "linear", "list": []}}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let err = client.funding_history("XEMUSDT").await.unwrap_err();
        assert!(matches!(err, ExchangeError::EmptyResult(_)));
    }

    #[tokio::test]
    async fn test_place_order_sends_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v5/order/create"))
            .and(header_exists("X-BAPI-API-KEY"))
            .and(header_exists("X-BAPI-SIGN"))
            .and(header_exists("X-BAPI-TIMESTAMP"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{
                    "retCode": 0,
                    "retMsg": "OK",
                    "result": {"orderId": "abc-123", "orderLinkId": ""}
                }"#,
                "application/json",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let ack = client
            .place_order(&OrderRequest::market("XEMUSDT", OrderSide::Buy, dec!(1800)))
            .await
            .unwrap();
        assert_eq!(ack.order_id, "abc-123");
    }

    #[tokio::test]
    async fn test_set_leverage_tolerates_not_modified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v5/position/set-leverage"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"retCode": 110043, "retMsg": "leverage not modified", "result": {}}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        assert!(client.set_leverage("XEMUSDT", 4).await.is_ok());
    }
}
