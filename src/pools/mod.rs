use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;

use crate::{
    models::{Coin, Credentials, DeviceReport, HashPoint},
    slots::SlotError,
};

pub mod binance;
pub mod emcd;
pub mod f2pool;
pub mod num;
pub mod viabtc;

/// Response bodies are cut to this many characters inside errors.
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
    #[error("provider error {code}: {message}")]
    Provider { code: i64, message: String },
    #[error("provider requires a signing secret but the account has none")]
    MissingSecret,
    #[error(transparent)]
    Slot(#[from] SlotError),
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Parse(e.to_string())
    }
}

/// The closed set of supported pool providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    ViaBtc,
    F2Pool,
    Emcd,
    Binance,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::ViaBtc => "viabtc",
            Provider::F2Pool => "f2pool",
            Provider::Emcd => "emcd",
            Provider::Binance => "binance",
        }
    }

    /// Providers that sign every request with the account's secret key.
    pub fn requires_secret(&self) -> bool {
        matches!(self, Provider::Binance)
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viabtc" => Ok(Provider::ViaBtc),
            "f2pool" => Ok(Provider::F2Pool),
            "emcd" => Ok(Provider::Emcd),
            "binance" => Ok(Provider::Binance),
            other => Err(format!("unknown pool provider: {}", other)),
        }
    }
}

/// Everything an adapter needs to address one account on one pool.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub base_url: String,
    pub account_name: String,
    pub credentials: Credentials,
}

impl FetchContext {
    pub fn secret_key(&self) -> Result<&str, FetchError> {
        match self.credentials.secret_key.as_deref() {
            Some(secret) if !secret.is_empty() => Ok(secret),
            _ => Err(FetchError::MissingSecret),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DevicePage {
    pub reports: Vec<DeviceReport>,
    pub has_next: bool,
    /// Known when the provider reports a page count with the first page.
    pub total_pages: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryPage {
    pub points: Vec<HashPoint>,
    pub has_next: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(DateRange { start, end })
    }
}

/// One implementation per provider. Adapters never retry; a single call maps
/// to a single request sequence and every failure comes back as `FetchError`.
#[async_trait]
pub trait PoolApi: Send + Sync {
    fn provider(&self) -> Provider;

    /// Whether the provider reports an account-wide 24h total. When it does
    /// not, the total is summed from the device reports.
    fn reports_account_total(&self) -> bool;

    async fn fetch_device_reports(
        &self,
        ctx: &FetchContext,
        coin: &Coin,
        page: u32,
    ) -> Result<DevicePage, FetchError>;

    async fn fetch_account_total(
        &self,
        ctx: &FetchContext,
        coin: &Coin,
    ) -> Result<Option<f64>, FetchError>;

    fn supports_history(&self) -> bool {
        false
    }

    async fn fetch_account_history(
        &self,
        _ctx: &FetchContext,
        _coin: &Coin,
        _range: &DateRange,
        _page: u32,
    ) -> Result<HistoryPage, FetchError> {
        Ok(HistoryPage::default())
    }

    async fn fetch_device_history(
        &self,
        _ctx: &FetchContext,
        _coin: &Coin,
        _pool_worker_id: i64,
        _range: &DateRange,
        _page: u32,
    ) -> Result<HistoryPage, FetchError> {
        Ok(HistoryPage::default())
    }
}

pub trait AdapterFactory: Send + Sync {
    fn adapter_for(&self, provider: Provider) -> Arc<dyn PoolApi>;
}

/// Production adapters sharing one pooled HTTP client.
pub struct HttpAdapters {
    viabtc: Arc<viabtc::ViaBtcApi>,
    f2pool: Arc<f2pool::F2PoolApi>,
    emcd: Arc<emcd::EmcdApi>,
    binance: Arc<binance::BinanceApi>,
}

impl HttpAdapters {
    pub fn new(client: Client) -> Self {
        HttpAdapters {
            viabtc: Arc::new(viabtc::ViaBtcApi::new(client.clone())),
            f2pool: Arc::new(f2pool::F2PoolApi::new(client.clone())),
            emcd: Arc::new(emcd::EmcdApi::new(client.clone())),
            binance: Arc::new(binance::BinanceApi::new(client)),
        }
    }
}

impl AdapterFactory for HttpAdapters {
    fn adapter_for(&self, provider: Provider) -> Arc<dyn PoolApi> {
        match provider {
            Provider::ViaBtc => self.viabtc.clone(),
            Provider::F2Pool => self.f2pool.clone(),
            Provider::Emcd => self.emcd.clone(),
            Provider::Binance => self.binance.clone(),
        }
    }
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Reads the body, turning any non-2xx status into `FetchError::Status`.
pub(crate) async fn read_body(response: reqwest::Response) -> Result<String, FetchError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            body: truncate(body),
        });
    }
    Ok(body)
}

fn truncate(mut body: String) -> String {
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
