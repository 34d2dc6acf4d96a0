use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::slots::SlotError;

pub const DEFAULT_CMC_URL: &str = "https://pro-api.coinmarketcap.com";

/// CoinMarketCap's id for bitcoin in the `data` map.
const BITCOIN_ID: &str = "1";

#[derive(Debug, thiserror::Error)]
pub enum RateClientError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to parse quote: {0}")]
    Parse(String),
    #[error("response carried no BTC/USD quote")]
    MissingQuote,
    #[error(transparent)]
    Slot(#[from] SlotError),
}

#[derive(Debug, Deserialize)]
struct QuotesResponse {
    status: QuoteStatus,
    #[serde(default)]
    data: HashMap<String, Asset>,
}

#[derive(Debug, Deserialize)]
struct QuoteStatus {
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    quote: HashMap<String, Price>,
}

#[derive(Debug, Deserialize)]
struct Price {
    price: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BtcQuote {
    pub price: f64,
    pub rate_date: NaiveDateTime,
}

pub struct RateClient {
    client: Client,
    url: String,
    api_key: String,
}

impl RateClient {
    pub fn new(client: Client, url: String, api_key: String) -> Self {
        RateClient {
            client,
            url,
            api_key,
        }
    }

    pub async fn fetch_btc_quote(&self) -> Result<BtcQuote, RateClientError> {
        let res = self
            .client
            .get(format!(
                "{}/v1/cryptocurrency/quotes/latest?slug=bitcoin&convert=USD",
                self.url.trim_end_matches('/')
            ))
            .header("Accepts", "application/json")
            .header("X-CMC_PRO_API_KEY", &self.api_key)
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(RateClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        parse_quote(&body)
    }
}

fn parse_quote(body: &str) -> Result<BtcQuote, RateClientError> {
    let res: QuotesResponse =
        serde_json::from_str(body).map_err(|e| RateClientError::Parse(e.to_string()))?;
    let price = res
        .data
        .get(BITCOIN_ID)
        .and_then(|asset| asset.quote.get("USD"))
        .and_then(|usd| usd.price)
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or(RateClientError::MissingQuote)?;
    Ok(BtcQuote {
        price,
        rate_date: res.status.timestamp.naive_utc(),
    })
}
