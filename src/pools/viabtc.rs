use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;

use super::{
    endpoint,
    num::{lenient_f64, lenient_i64},
    read_body, DateRange, DevicePage, FetchContext, FetchError, HistoryPage, PoolApi, Provider,
};
use crate::models::{Coin, DeviceReport, HashPoint};

const API_KEY_HEADER: &str = "X-API-KEY";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, FetchError> {
        if self.code != 0 {
            return Err(FetchError::Provider {
                code: self.code,
                message: self.message,
            });
        }
        self.data
            .ok_or_else(|| FetchError::Parse("response has no data".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct Paged<T> {
    #[serde(default)]
    total_page: Option<u32>,
    #[serde(default)]
    has_next: bool,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct WorkerRow {
    #[serde(default, deserialize_with = "lenient_i64")]
    worker_id: Option<i64>,
    worker_name: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    hashrate_24h: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    reject_rate: Option<f64>,
    #[serde(default)]
    last_active: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AccountHashrate {
    #[serde(default, deserialize_with = "lenient_f64")]
    hashrate_24hour: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HistoryRow {
    date: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    hashrate: Option<f64>,
}

pub struct ViaBtcApi {
    client: Client,
}

impl ViaBtcApi {
    pub fn new(client: Client) -> Self {
        ViaBtcApi { client }
    }

    async fn get(
        &self,
        ctx: &FetchContext,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<String, FetchError> {
        let response = self
            .client
            .get(endpoint(&ctx.base_url, path))
            .header(API_KEY_HEADER, &ctx.credentials.public_key)
            .query(query)
            .send()
            .await?;
        read_body(response).await
    }
}

#[async_trait]
impl PoolApi for ViaBtcApi {
    fn provider(&self) -> Provider {
        Provider::ViaBtc
    }

    fn reports_account_total(&self) -> bool {
        true
    }

    async fn fetch_device_reports(
        &self,
        ctx: &FetchContext,
        coin: &Coin,
        page: u32,
    ) -> Result<DevicePage, FetchError> {
        let body = self
            .get(
                ctx,
                "v1/hashrate/worker",
                &[("coin", coin.code.clone()), ("page", page.to_string())],
            )
            .await?;
        parse_worker_page(&body)
    }

    async fn fetch_account_total(
        &self,
        ctx: &FetchContext,
        coin: &Coin,
    ) -> Result<Option<f64>, FetchError> {
        let body = self
            .get(ctx, "v1/hashrate", &[("coin", coin.code.clone())])
            .await?;
        parse_account_total(&body)
    }

    fn supports_history(&self) -> bool {
        true
    }

    async fn fetch_account_history(
        &self,
        ctx: &FetchContext,
        coin: &Coin,
        range: &DateRange,
        page: u32,
    ) -> Result<HistoryPage, FetchError> {
        let body = self
            .get(ctx, "v1/hashrate/history", &history_query(coin, range, page))
            .await?;
        parse_history_page(&body)
    }

    async fn fetch_device_history(
        &self,
        ctx: &FetchContext,
        coin: &Coin,
        pool_worker_id: i64,
        range: &DateRange,
        page: u32,
    ) -> Result<HistoryPage, FetchError> {
        let path = format!("v1/hashrate/worker/{}/history", pool_worker_id);
        let body = self
            .get(ctx, &path, &history_query(coin, range, page))
            .await?;
        parse_history_page(&body)
    }
}

fn history_query(coin: &Coin, range: &DateRange, page: u32) -> Vec<(&'static str, String)> {
    vec![
        ("coin", coin.code.clone()),
        ("start_date", range.start.format("%Y-%m-%d").to_string()),
        ("end_date", range.end.format("%Y-%m-%d").to_string()),
        ("page", page.to_string()),
    ]
}

fn parse_worker_page(body: &str) -> Result<DevicePage, FetchError> {
    let envelope: Envelope<Paged<WorkerRow>> = serde_json::from_str(body)?;
    let paged = envelope.into_data()?;
    let reports = paged
        .data
        .into_iter()
        .map(|row| DeviceReport {
            name: row.worker_name,
            hashrate_24h: row.hashrate_24h.unwrap_or(0.0),
            reject_rate: row.reject_rate,
            last_share_at: row.last_active,
            pool_worker_id: row.worker_id,
        })
        .collect();
    Ok(DevicePage {
        reports,
        has_next: paged.has_next,
        total_pages: paged.total_page,
    })
}

fn parse_account_total(body: &str) -> Result<Option<f64>, FetchError> {
    let envelope: Envelope<AccountHashrate> = serde_json::from_str(body)?;
    Ok(envelope.into_data()?.hashrate_24hour)
}

fn parse_history_page(body: &str) -> Result<HistoryPage, FetchError> {
    let envelope: Envelope<Paged<HistoryRow>> = serde_json::from_str(body)?;
    let paged = envelope.into_data()?;
    let mut points = Vec::with_capacity(paged.data.len());
    for row in paged.data {
        let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
            .map_err(|e| FetchError::Parse(format!("bad history date {:?}: {}", row.date, e)))?;
        points.push(HashPoint {
            date,
            hashrate: row.hashrate.unwrap_or(0.0),
        });
    }
    Ok(HistoryPage {
        points,
        has_next: paged.has_next,
    })
}
