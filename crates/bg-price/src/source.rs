//! Upstream spot-price sources.

use std::fmt;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum PriceError {
    /// Network or transport failure.
    Transport(String),
    /// The upstream API returned an application-level error.
    Api { code: Option<i64>, message: String },
    /// A response payload could not be decoded.
    Decode(String),
    /// Call budget spent and nothing cached for this symbol.
    BudgetExhausted { symbol: String },
}

impl fmt::Display for PriceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceError::Transport(msg) => write!(f, "transport error: {msg}"),
            PriceError::Api {
                code: Some(c),
                message,
            } => write!(f, "price api error code={c}: {message}"),
            PriceError::Api {
                code: None,
                message,
            } => write!(f, "price api error: {message}"),
            PriceError::Decode(msg) => write!(f, "decode error: {msg}"),
            PriceError::BudgetExhausted { symbol } => {
                write!(f, "price call budget exhausted and no cached price for {symbol}")
            }
        }
    }
}

impl std::error::Error for PriceError {}

// ---------------------------------------------------------------------------
// Source trait
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Latest quote-currency price for `symbol` (e.g. `"BTC/USD"`).
    async fn fetch_price(&self, symbol: &str) -> Result<f64, PriceError>;
}

// ---------------------------------------------------------------------------
// TwelveData
// ---------------------------------------------------------------------------

/// TwelveData `/price` endpoint.
///
/// API key is resolved by the caller and passed in; never logged.
#[derive(Clone)]
pub struct TwelveDataPriceSource {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl fmt::Debug for TwelveDataPriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwelveDataPriceSource")
            .field("api_key", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl TwelveDataPriceSource {
    pub fn new(api_key: String) -> Self {
        Self::new_with_base_url(api_key, "https://api.twelvedata.com".to_string())
    }

    pub fn new_with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn price_url(&self) -> String {
        format!("{}/price", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl PriceSource for TwelveDataPriceSource {
    fn source_name(&self) -> &'static str {
        "twelvedata"
    }

    async fn fetch_price(&self, symbol: &str) -> Result<f64, PriceError> {
        let resp = self
            .http
            .get(self.price_url())
            .query(&[("symbol", symbol), ("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| PriceError::Transport(e.without_url().to_string()))?;

        let status = resp.status();
        let body: TwelveDataPriceResponse = resp
            .json()
            .await
            .map_err(|e| PriceError::Decode(e.without_url().to_string()))?;

        if !status.is_success() || body.status.as_deref() == Some("error") {
            return Err(PriceError::Api {
                code: body.code.or(Some(status.as_u16() as i64)),
                message: body.message.unwrap_or_else(|| "unknown".to_string()),
            });
        }

        let raw = body
            .price
            .ok_or_else(|| PriceError::Decode(format!("no price field for {symbol}")))?;
        let price: f64 = raw
            .trim()
            .parse()
            .map_err(|_| PriceError::Decode(format!("unparseable price for {symbol}: {raw}")))?;
        if !price.is_finite() || price <= 0.0 {
            return Err(PriceError::Decode(format!(
                "non-positive price for {symbol}: {raw}"
            )));
        }
        Ok(price)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TwelveDataPriceResponse {
    price: Option<String>,
    status: Option<String>,
    message: Option<String>,
    code: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_api_key() {
        let s = TwelveDataPriceSource::new("very-secret-key".to_string());
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("very-secret-key"));
    }

    #[test]
    fn budget_error_names_symbol() {
        let e = PriceError::BudgetExhausted {
            symbol: "ETH/USD".to_string(),
        };
        assert!(e.to_string().contains("ETH/USD"));
    }
}
