use chrono::NaiveDate;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// A tenant's credentialed binding to one mining pool.
///
/// `public_key` and `pool_id` are optional at the storage level; an account
/// missing either is skipped by the ingest cycle.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, QueryableByName)]
#[diesel(table_name = crate::schema::accounts)]
#[diesel(check_for_backend(diesel::mysql::Mysql))]
pub struct Account {
    pub id: String,
    pub name: String,
    pub public_key: Option<String>,
    pub pool_id: Option<String>,
}

impl Account {
    /// Pool reference of an account that can be processed.
    pub fn eligible_pool_id(&self) -> Option<&str> {
        let has_key = self.public_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        match self.pool_id.as_deref() {
            Some(pool_id) if has_key && !pool_id.is_empty() => Some(pool_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, QueryableByName)]
#[diesel(table_name = crate::schema::accounts)]
#[diesel(check_for_backend(diesel::mysql::Mysql))]
pub struct CredentialsRow {
    pub public_key: Option<String>,
    pub secret_key: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub public_key: String,
    pub secret_key: Option<String>,
}

impl Credentials {
    pub fn has_secret(&self) -> bool {
        self.secret_key.as_deref().is_some_and(|secret| !secret.is_empty())
    }
}

// Keys never end up in logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("public_key", &"[REDACTED]")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, QueryableByName)]
#[diesel(table_name = crate::schema::pools)]
#[diesel(check_for_backend(diesel::mysql::Mysql))]
pub struct Pool {
    pub id: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Queryable, Selectable, QueryableByName)]
#[diesel(table_name = crate::schema::coins)]
#[diesel(check_for_backend(diesel::mysql::Mysql))]
pub struct Coin {
    pub code: String,
    pub full_name: Option<String>,
}

#[cfg(test)]
impl Coin {
    pub fn new(code: &str) -> Self {
        Coin {
            code: code.to_string(),
            full_name: None,
        }
    }

    pub fn with_full_name(code: &str, full_name: &str) -> Self {
        Coin {
            code: code.to_string(),
            full_name: Some(full_name.to_string()),
        }
    }
}

impl Coin {
    /// Name used by providers that address coins by their full name,
    /// falling back to the short code.
    pub fn full_name_or_code(&self) -> &str {
        match self.full_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.code,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, QueryableByName)]
#[diesel(table_name = crate::schema::pool_coins)]
#[diesel(check_for_backend(diesel::mysql::Mysql))]
pub struct PoolCoinRow {
    pub id: String,
}

/// A physical miner owned by an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, QueryableByName)]
#[diesel(table_name = crate::schema::devices)]
#[diesel(check_for_backend(diesel::mysql::Mysql))]
pub struct Device {
    pub id: String,
    pub name: String,
    pub pool_worker_id: Option<i64>,
}

/// One device line of one page of one coin, as reported by a pool.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub name: String,
    pub hashrate_24h: f64,
    pub reject_rate: Option<f64>,
    pub last_share_at: Option<i64>,
    pub pool_worker_id: Option<i64>,
}

#[cfg(test)]
impl DeviceReport {
    pub fn new(name: &str, hashrate_24h: f64) -> Self {
        DeviceReport {
            name: name.to_string(),
            hashrate_24h,
            reject_rate: None,
            last_share_at: None,
            pool_worker_id: None,
        }
    }
}

/// One dated hashrate value from a provider's history endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HashPoint {
    pub date: NaiveDate,
    pub hashrate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountHashRecord {
    pub account_id: String,
    pub pool_coin_id: String,
    pub hash_date: NaiveDate,
    pub daily_hash: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceHashRecord {
    pub device_id: String,
    pub pool_coin_id: String,
    pub hash_date: NaiveDate,
    pub daily_hash: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnidentifiedHashRecord {
    pub account_id: String,
    pub pool_coin_id: String,
    pub hash_date: NaiveDate,
    pub reported_name: String,
    pub pool_worker_id: Option<i64>,
    pub daily_hash: f64,
}
