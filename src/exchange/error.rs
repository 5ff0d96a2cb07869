//! Exchange error types.

use thiserror::Error;

/// Errors surfaced by the Bybit client.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Bybit API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("failed to decode response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("empty result for {0}")]
    EmptyResult(&'static str),
}

impl ExchangeError {
    /// Leverage already set to the requested value; not a real failure.
    pub fn is_leverage_not_modified(&self) -> bool {
        matches!(self, ExchangeError::Api { code: 110043, .. })
    }
}
