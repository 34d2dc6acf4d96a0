use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;

use super::{
    endpoint,
    num::{lenient_f64, lenient_i64},
    read_body, DevicePage, FetchContext, FetchError, PoolApi, Provider,
};
use crate::models::{Coin, DeviceReport};

const API_KEY_HEADER: &str = "X-MBX-APIKEY";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct ServerTime {
    #[serde(rename = "serverTime")]
    server_time: i64,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<Option<T>, FetchError> {
        if self.code != 0 {
            return Err(FetchError::Provider {
                code: self.code,
                message: self.msg,
            });
        }
        Ok(self.data)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerRow {
    #[serde(default, deserialize_with = "lenient_i64")]
    worker_id: Option<i64>,
    worker_name: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    day_hash_rate: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    reject_rate: Option<f64>,
    #[serde(default)]
    last_share_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerList {
    #[serde(default)]
    worker_datas: Vec<WorkerRow>,
    #[serde(default)]
    total_num: u32,
    #[serde(default)]
    page_size: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserStatus {
    #[serde(default, deserialize_with = "lenient_f64")]
    day_hash_rate: Option<f64>,
}

/// Binance signs every request against its own clock, so each signed call is
/// preceded by a server time lookup.
pub struct BinanceApi {
    client: Client,
}

impl BinanceApi {
    pub fn new(client: Client) -> Self {
        BinanceApi { client }
    }

    async fn server_time(&self, base_url: &str) -> Result<i64, FetchError> {
        let response = self.client.get(endpoint(base_url, "api/v3/time")).send().await?;
        let body = read_body(response).await?;
        let time: ServerTime = serde_json::from_str(&body)?;
        Ok(time.server_time)
    }

    async fn signed_get(
        &self,
        ctx: &FetchContext,
        path: &str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<String, FetchError> {
        let secret = ctx.secret_key()?;
        let timestamp = self.server_time(&ctx.base_url).await?;
        params.push(("timestamp", timestamp.to_string()));
        let query = canonical_query(params);
        let signature = sign(&query, secret)?;
        let url = format!("{}?{}&signature={}", endpoint(&ctx.base_url, path), query, signature);
        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &ctx.credentials.public_key)
            .send()
            .await?;
        read_body(response).await
    }
}

#[async_trait]
impl PoolApi for BinanceApi {
    fn provider(&self) -> Provider {
        Provider::Binance
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
        let params = vec![
            ("algo", coin.full_name_or_code().to_string()),
            ("userName", ctx.account_name.clone()),
            ("pageIndex", page.to_string()),
        ];
        let body = self.signed_get(ctx, "sapi/v1/mining/worker/list", params).await?;
        parse_worker_list(&body, page)
    }

    async fn fetch_account_total(
        &self,
        ctx: &FetchContext,
        coin: &Coin,
    ) -> Result<Option<f64>, FetchError> {
        let params = vec![
            ("algo", coin.full_name_or_code().to_string()),
            ("userName", ctx.account_name.clone()),
        ];
        let body = self
            .signed_get(ctx, "sapi/v1/mining/statistics/user/status", params)
            .await?;
        parse_user_status(&body)
    }
}

/// Sorted `key=value` pairs joined by `&`; the exact string that gets signed.
fn canonical_query(mut params: Vec<(&'static str, String)>) -> String {
    params.sort_by(|a, b| a.0.cmp(b.0));
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn sign(data: &str, secret: &str) -> Result<String, FetchError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| FetchError::Parse(format!("invalid signing key: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn parse_worker_list(body: &str, page: u32) -> Result<DevicePage, FetchError> {
    let envelope: Envelope<WorkerList> = serde_json::from_str(body)?;
    let Some(list) = envelope.into_data()? else {
        return Ok(DevicePage::default());
    };
    let total_pages = if list.page_size > 0 {
        list.total_num.div_ceil(list.page_size)
    } else {
        1
    };
    let reports = list
        .worker_datas
        .into_iter()
        .map(|row| DeviceReport {
            name: row.worker_name,
            hashrate_24h: row.day_hash_rate.unwrap_or(0.0),
            reject_rate: row.reject_rate,
            last_share_at: row.last_share_time,
            pool_worker_id: row.worker_id,
        })
        .collect();
    Ok(DevicePage {
        reports,
        has_next: page < total_pages,
        total_pages: Some(total_pages.max(1)),
    })
}

fn parse_user_status(body: &str) -> Result<Option<f64>, FetchError> {
    let envelope: Envelope<UserStatus> = serde_json::from_str(body)?;
    Ok(envelope.into_data()?.and_then(|s| s.day_hash_rate))
}
