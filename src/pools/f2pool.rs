use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    endpoint, num::lenient_f64, read_body, DevicePage, FetchContext, FetchError, PoolApi, Provider,
};
use crate::models::{Coin, DeviceReport};

const API_SECRET_HEADER: &str = "F2P-API-SECRET";

#[derive(Debug, Serialize)]
struct UserRequest<'a> {
    mining_user_name: &'a str,
    currency: &'a str,
}

/// Error shape shared by every F2Pool endpoint; absent on success.
#[derive(Debug, Default, Deserialize)]
struct ErrorFields {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
}

impl ErrorFields {
    fn check(&self) -> Result<(), FetchError> {
        match self.code {
            Some(code) if code != 0 => Err(FetchError::Provider {
                code,
                message: self.msg.clone().unwrap_or_default(),
            }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HashRateInfo {
    #[serde(default)]
    name: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    h24_hash_rate: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    h24_stale_hash_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WorkerRow {
    hash_rate_info: HashRateInfo,
    #[serde(default)]
    last_share_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WorkerListResponse {
    #[serde(flatten)]
    error: ErrorFields,
    #[serde(default)]
    workers: Vec<WorkerRow>,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    #[serde(flatten)]
    error: ErrorFields,
    info: Option<HashRateInfo>,
}

pub struct F2PoolApi {
    client: Client,
}

impl F2PoolApi {
    pub fn new(client: Client) -> Self {
        F2PoolApi { client }
    }

    async fn post(&self, ctx: &FetchContext, path: &str, coin: &Coin) -> Result<String, FetchError> {
        let request = UserRequest {
            mining_user_name: &ctx.account_name,
            currency: coin.full_name_or_code(),
        };
        let response = self
            .client
            .post(endpoint(&ctx.base_url, path))
            .header(API_SECRET_HEADER, &ctx.credentials.public_key)
            .json(&request)
            .send()
            .await?;
        read_body(response).await
    }
}

#[async_trait]
impl PoolApi for F2PoolApi {
    fn provider(&self) -> Provider {
        Provider::F2Pool
    }

    fn reports_account_total(&self) -> bool {
        true
    }

    async fn fetch_device_reports(
        &self,
        ctx: &FetchContext,
        coin: &Coin,
        _page: u32,
    ) -> Result<DevicePage, FetchError> {
        let body = self.post(ctx, "hash_rate/worker/list", coin).await?;
        parse_worker_list(&body)
    }

    async fn fetch_account_total(
        &self,
        ctx: &FetchContext,
        coin: &Coin,
    ) -> Result<Option<f64>, FetchError> {
        let body = self.post(ctx, "hash_rate/info", coin).await?;
        parse_info(&body)
    }
}

fn reject_rate(info: &HashRateInfo) -> Option<f64> {
    let stale = info.h24_stale_hash_rate?;
    let total = info.h24_hash_rate.unwrap_or(0.0) + stale;
    (total > 0.0).then(|| stale / total)
}

fn parse_worker_list(body: &str) -> Result<DevicePage, FetchError> {
    let response: WorkerListResponse = serde_json::from_str(body)?;
    response.error.check()?;
    let reports = response
        .workers
        .into_iter()
        .map(|row| DeviceReport {
            reject_rate: reject_rate(&row.hash_rate_info),
            hashrate_24h: row.hash_rate_info.h24_hash_rate.unwrap_or(0.0),
            name: row.hash_rate_info.name,
            last_share_at: row.last_share_at,
            pool_worker_id: None,
        })
        .collect();
    Ok(DevicePage {
        reports,
        has_next: false,
        total_pages: Some(1),
    })
}

fn parse_info(body: &str) -> Result<Option<f64>, FetchError> {
    let response: InfoResponse = serde_json::from_str(body)?;
    response.error.check()?;
    Ok(response.info.and_then(|info| info.h24_hash_rate))
}
