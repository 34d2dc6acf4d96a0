use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::{
    app_database::AppDatabaseError,
    models::{
        Account, AccountHashRecord, Coin, Credentials, Device, DeviceHashRecord, Pool,
        UnidentifiedHashRecord,
    },
};

/// Read-only view of the administrative inventory, plus the one piece of
/// device metadata the ingest cycle is allowed to learn.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn list_active_accounts(&self) -> Result<Vec<Account>, AppDatabaseError>;

    async fn get_credentials(&self, account_id: &str) -> Result<Credentials, AppDatabaseError>;

    async fn get_pool(&self, pool_id: &str) -> Result<Pool, AppDatabaseError>;

    async fn get_coins(&self, pool_id: &str) -> Result<Vec<Coin>, AppDatabaseError>;

    /// `None` when the pool does not carry the coin.
    async fn resolve_pool_coin(
        &self,
        pool_id: &str,
        coin_code: &str,
    ) -> Result<Option<String>, AppDatabaseError>;

    async fn list_devices(&self, account_id: &str) -> Result<Vec<Device>, AppDatabaseError>;

    async fn record_pool_worker_id(
        &self,
        device_id: &str,
        pool_worker_id: i64,
    ) -> Result<(), AppDatabaseError>;
}

/// Day-bucketed idempotent writes. A second write for the same key replaces
/// the value and refreshes the edit time.
#[async_trait]
pub trait HashSink: Send + Sync {
    async fn upsert_account_hash(&self, record: &AccountHashRecord) -> Result<(), AppDatabaseError>;

    async fn upsert_device_hash(&self, record: &DeviceHashRecord) -> Result<(), AppDatabaseError>;

    async fn upsert_unidentified(
        &self,
        record: &UnidentifiedHashRecord,
    ) -> Result<(), AppDatabaseError>;
}

/// Periodic BTC/USD quotes. Inserting a quote for an instant that is already
/// stored is a no-op reported as `false`.
#[async_trait]
pub trait RateSink: Send + Sync {
    async fn add_btc_rate(&self, rate_date: NaiveDateTime, rate: f64) -> Result<bool, AppDatabaseError>;
}
