use async_trait::async_trait;
use chrono::NaiveDateTime;
use deadpool_diesel::mysql::{Manager, Pool};
use diesel::{
    sql_types::{BigInt, Date, Double, Nullable, Text, Timestamp},
    MysqlConnection, OptionalExtension, QueryResult, RunQueryDsl,
};

use crate::{
    models::{
        Account, AccountHashRecord, Coin, Credentials, CredentialsRow, Device, DeviceHashRecord,
        PoolCoinRow, UnidentifiedHashRecord,
    },
    slots::SlotError,
    store::{AccountStore, HashSink, RateSink},
};

#[derive(Debug, thiserror::Error)]
pub enum AppDatabaseError {
    #[error("failed to build database connection pool: {0}")]
    FailedToBuildPool(String),
    #[error("failed to get connection from pool")]
    FailedToGetConnectionFromPool,
    #[error("entity does not exist")]
    EntityDoesNotExist,
    #[error("account has no public key")]
    MissingCredentials,
    #[error("pool coin reference is empty")]
    UnresolvedPoolCoin,
    #[error("query failed: {0}")]
    QueryFailed(String),
    #[error(transparent)]
    Slot(#[from] SlotError),
}

pub struct AppDatabase {
    connection_pool: Pool,
}

impl AppDatabase {
    pub fn new(url: String, max_connections: usize) -> Result<Self, AppDatabaseError> {
        let manager = Manager::new(url, deadpool_diesel::Runtime::Tokio1);

        let pool = Pool::builder(manager)
            .max_size(max_connections.max(1))
            .build()
            .map_err(|e| AppDatabaseError::FailedToBuildPool(e.to_string()))?;

        Ok(AppDatabase {
            connection_pool: pool,
        })
    }

    /// Startup probe; an unreachable store is fatal.
    pub async fn ping(&self) -> Result<(), AppDatabaseError> {
        self.interact(|conn| diesel::sql_query("SELECT 1").execute(conn).map(|_| ()))
            .await
    }

    async fn interact<T, F>(&self, query: F) -> Result<T, AppDatabaseError>
    where
        F: FnOnce(&mut MysqlConnection) -> QueryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db_conn = self
            .connection_pool
            .get()
            .await
            .map_err(|_| AppDatabaseError::FailedToGetConnectionFromPool)?;

        match db_conn.interact(query).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(diesel::result::Error::NotFound)) => Err(AppDatabaseError::EntityDoesNotExist),
            Ok(Err(e)) => Err(AppDatabaseError::QueryFailed(e.to_string())),
            Err(e) => Err(AppDatabaseError::QueryFailed(format!("{:?}", e))),
        }
    }
}

fn require_pool_coin(pool_coin_id: &str) -> Result<(), AppDatabaseError> {
    if pool_coin_id.trim().is_empty() {
        return Err(AppDatabaseError::UnresolvedPoolCoin);
    }
    Ok(())
}

#[async_trait]
impl AccountStore for AppDatabase {
    async fn list_active_accounts(&self) -> Result<Vec<Account>, AppDatabaseError> {
        self.interact(|conn: &mut MysqlConnection| {
            diesel::sql_query("SELECT id, name, public_key, pool_id FROM accounts WHERE status = 0")
                .load::<Account>(conn)
        })
        .await
    }

    async fn get_credentials(&self, account_id: &str) -> Result<Credentials, AppDatabaseError> {
        let account_id = account_id.to_string();
        let row = self
            .interact(move |conn: &mut MysqlConnection| {
                diesel::sql_query("SELECT public_key, secret_key FROM accounts WHERE id = ?")
                    .bind::<Text, _>(account_id)
                    .get_result::<CredentialsRow>(conn)
            })
            .await?;

        match row.public_key {
            Some(public_key) if !public_key.trim().is_empty() => Ok(Credentials {
                public_key,
                secret_key: row.secret_key.filter(|s| !s.is_empty()),
            }),
            _ => Err(AppDatabaseError::MissingCredentials),
        }
    }

    async fn get_pool(&self, pool_id: &str) -> Result<crate::models::Pool, AppDatabaseError> {
        let pool_id = pool_id.to_string();
        self.interact(move |conn: &mut MysqlConnection| {
            diesel::sql_query("SELECT id, name, url FROM pools WHERE id = ?")
                .bind::<Text, _>(pool_id)
                .get_result::<crate::models::Pool>(conn)
        })
        .await
    }

    async fn get_coins(&self, pool_id: &str) -> Result<Vec<Coin>, AppDatabaseError> {
        let pool_id = pool_id.to_string();
        self.interact(move |conn: &mut MysqlConnection| {
            diesel::sql_query(
                "SELECT c.code, c.full_name FROM coins c INNER JOIN pool_coins pc ON c.id = pc.coin_id WHERE pc.pool_id = ?",
            )
            .bind::<Text, _>(pool_id)
            .load::<Coin>(conn)
        })
        .await
    }

    async fn resolve_pool_coin(
        &self,
        pool_id: &str,
        coin_code: &str,
    ) -> Result<Option<String>, AppDatabaseError> {
        let pool_id = pool_id.to_string();
        let coin_code = coin_code.to_string();
        let row = self
            .interact(move |conn: &mut MysqlConnection| {
                diesel::sql_query(
                    "SELECT pc.id FROM pool_coins pc JOIN coins c ON pc.coin_id = c.id WHERE pc.pool_id = ? AND c.code = ? LIMIT 1",
                )
                .bind::<Text, _>(pool_id)
                .bind::<Text, _>(coin_code)
                .get_result::<PoolCoinRow>(conn)
                .optional()
            })
            .await?;
        Ok(row.map(|r| r.id))
    }

    async fn list_devices(&self, account_id: &str) -> Result<Vec<Device>, AppDatabaseError> {
        let account_id = account_id.to_string();
        self.interact(move |conn: &mut MysqlConnection| {
            diesel::sql_query("SELECT id, name, pool_worker_id FROM devices WHERE account_id = ?")
                .bind::<Text, _>(account_id)
                .load::<Device>(conn)
        })
        .await
    }

    async fn record_pool_worker_id(
        &self,
        device_id: &str,
        pool_worker_id: i64,
    ) -> Result<(), AppDatabaseError> {
        let device_id = device_id.to_string();
        self.interact(move |conn: &mut MysqlConnection| {
            diesel::sql_query("UPDATE devices SET pool_worker_id = ?, updated_at = NOW() WHERE id = ?")
                .bind::<BigInt, _>(pool_worker_id)
                .bind::<Text, _>(device_id)
                .execute(conn)
        })
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl HashSink for AppDatabase {
    async fn upsert_account_hash(&self, record: &AccountHashRecord) -> Result<(), AppDatabaseError> {
        require_pool_coin(&record.pool_coin_id)?;
        let record = record.clone();
        self.interact(move |conn: &mut MysqlConnection| {
            diesel::sql_query(
                "INSERT INTO account_hashes (account_id, pool_coin_id, hash_date, daily_hash, last_edit) \
                 VALUES (?, ?, ?, ?, NOW()) \
                 ON DUPLICATE KEY UPDATE daily_hash = VALUES(daily_hash), last_edit = NOW()",
            )
            .bind::<Text, _>(record.account_id)
            .bind::<Text, _>(record.pool_coin_id)
            .bind::<Date, _>(record.hash_date)
            .bind::<Double, _>(record.daily_hash)
            .execute(conn)
        })
        .await
        .map(|_| ())
    }

    async fn upsert_device_hash(&self, record: &DeviceHashRecord) -> Result<(), AppDatabaseError> {
        require_pool_coin(&record.pool_coin_id)?;
        let record = record.clone();
        self.interact(move |conn: &mut MysqlConnection| {
            diesel::sql_query(
                "INSERT INTO device_hashes (device_id, pool_coin_id, hash_date, daily_hash, last_edit) \
                 VALUES (?, ?, ?, ?, NOW()) \
                 ON DUPLICATE KEY UPDATE daily_hash = VALUES(daily_hash), last_edit = NOW()",
            )
            .bind::<Text, _>(record.device_id)
            .bind::<Text, _>(record.pool_coin_id)
            .bind::<Date, _>(record.hash_date)
            .bind::<Double, _>(record.daily_hash)
            .execute(conn)
        })
        .await
        .map(|_| ())
    }

    async fn upsert_unidentified(
        &self,
        record: &UnidentifiedHashRecord,
    ) -> Result<(), AppDatabaseError> {
        require_pool_coin(&record.pool_coin_id)?;
        let record = record.clone();
        self.interact(move |conn: &mut MysqlConnection| {
            diesel::sql_query(
                "INSERT INTO unidentified_hashes (account_id, pool_coin_id, hash_date, reported_name, pool_worker_id, daily_hash, last_edit) \
                 VALUES (?, ?, ?, ?, ?, ?, NOW()) \
                 ON DUPLICATE KEY UPDATE daily_hash = VALUES(daily_hash), \
                 pool_worker_id = COALESCE(VALUES(pool_worker_id), pool_worker_id), last_edit = NOW()",
            )
            .bind::<Text, _>(record.account_id)
            .bind::<Text, _>(record.pool_coin_id)
            .bind::<Date, _>(record.hash_date)
            .bind::<Text, _>(record.reported_name)
            .bind::<Nullable<BigInt>, _>(record.pool_worker_id)
            .bind::<Double, _>(record.daily_hash)
            .execute(conn)
        })
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl RateSink for AppDatabase {
    async fn add_btc_rate(&self, rate_date: NaiveDateTime, rate: f64) -> Result<bool, AppDatabaseError> {
        let inserted = self
            .interact(move |conn: &mut MysqlConnection| {
                diesel::sql_query("INSERT IGNORE INTO btc_rates (rate_date, rate) VALUES (?, ?)")
                    .bind::<Timestamp, _>(rate_date)
                    .bind::<Double, _>(rate)
                    .execute(conn)
            })
            .await?;
        Ok(inserted > 0)
    }
}
