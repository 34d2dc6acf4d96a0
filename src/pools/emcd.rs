use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{
    endpoint, num::lenient_f64, read_body, DevicePage, FetchContext, FetchError, PoolApi, Provider,
};
use crate::models::{Coin, DeviceReport};

#[derive(Debug, Default, Deserialize)]
struct TotalHashrate {
    #[serde(default, deserialize_with = "lenient_f64")]
    hashrate24h: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WorkerRow {
    worker: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    hashrate24h: Option<f64>,
    #[serde(default, rename = "lastActivity")]
    last_activity: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WorkersResponse {
    #[serde(default)]
    total_hashrate: Option<TotalHashrate>,
    #[serde(default)]
    details: Vec<WorkerRow>,
}

/// EMCD keys the whole request on the account's API key in the path.
pub struct EmcdApi {
    client: Client,
}

impl EmcdApi {
    pub fn new(client: Client) -> Self {
        EmcdApi { client }
    }

    async fn workers(&self, ctx: &FetchContext, coin: &Coin) -> Result<WorkersResponse, FetchError> {
        let path = format!(
            "v1/{}/workers/{}",
            coin.code.to_ascii_lowercase(),
            ctx.credentials.public_key
        );
        let response = self
            .client
            .get(endpoint(&ctx.base_url, &path))
            .send()
            .await
            .map_err(|e| FetchError::Http(e.without_url()))?;
        let body = read_body(response).await.map_err(strip_url)?;
        Ok(serde_json::from_str(&body)?)
    }
}

// The key is part of the path; keep it out of error messages.
fn strip_url(e: FetchError) -> FetchError {
    match e {
        FetchError::Http(e) => FetchError::Http(e.without_url()),
        other => other,
    }
}

#[async_trait]
impl PoolApi for EmcdApi {
    fn provider(&self) -> Provider {
        Provider::Emcd
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
        Ok(device_page(self.workers(ctx, coin).await?))
    }

    async fn fetch_account_total(
        &self,
        ctx: &FetchContext,
        coin: &Coin,
    ) -> Result<Option<f64>, FetchError> {
        Ok(self
            .workers(ctx, coin)
            .await?
            .total_hashrate
            .and_then(|t| t.hashrate24h))
    }
}

fn device_page(response: WorkersResponse) -> DevicePage {
    let reports = response
        .details
        .into_iter()
        .map(|row| DeviceReport {
            name: row.worker,
            hashrate_24h: row.hashrate24h.unwrap_or(0.0),
            reject_rate: None,
            last_share_at: row.last_activity,
            pool_worker_id: None,
        })
        .collect();
    DevicePage {
        reports,
        has_next: false,
        total_pages: Some(1),
    }
}
