use std::{net::SocketAddr, path::PathBuf, time::Duration};

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::{pools::DateRange, retry::RetryPolicy};

#[derive(Parser, Debug)]
#[command(version, author, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,
    #[arg(
        long,
        env = "DATABASE_URL",
        value_name = "database url",
        help = "MySQL connection url",
        hide_env_values = true,
        global = true
    )]
    pub database_url: Option<String>,
    #[arg(
        long,
        env = "API_SLOTS",
        value_name = "api slots",
        help = "Maximum number of pool API calls in flight",
        default_value = "100",
        global = true
    )]
    pub api_slots: usize,
    #[arg(
        long,
        env = "DB_SLOTS",
        value_name = "db slots",
        help = "Maximum number of database statements in flight",
        default_value = "10",
        global = true
    )]
    pub db_slots: usize,
    #[arg(
        long,
        env = "RETRY_ATTEMPTS",
        value_name = "retry attempts",
        help = "Attempts per pool API call before giving up",
        default_value = "3",
        global = true
    )]
    pub retry_attempts: u32,
    #[arg(
        long,
        env = "RETRY_DELAY_SECS",
        value_name = "retry delay",
        help = "Seconds to wait between attempts",
        default_value = "2",
        global = true
    )]
    pub retry_delay_secs: u64,
    #[arg(
        long,
        env = "CYCLE_HOURS",
        value_name = "cycle hours",
        help = "Hours between scheduled cycles",
        default_value = "24",
        global = true
    )]
    pub cycle_hours: u64,
    #[arg(
        long,
        env = "HTTP_TIMEOUT_SECS",
        value_name = "http timeout",
        help = "Timeout for a single outbound HTTP request, in seconds",
        default_value = "30",
        global = true
    )]
    pub http_timeout_secs: u64,
    #[arg(
        long,
        env = "STATUS_ADDR",
        value_name = "status addr",
        help = "Listen address of the status API",
        default_value = "0.0.0.0:3000",
        global = true
    )]
    pub status_addr: SocketAddr,
    #[arg(
        long,
        env = "LOG_DIR",
        value_name = "log dir",
        help = "Directory for the daily rolling log file",
        default_value = "logs",
        global = true
    )]
    pub log_dir: PathBuf,
    #[arg(
        long,
        env = "CMC_API_KEY",
        value_name = "cmc api key",
        help = "CoinMarketCap key; enables the BTC rate system",
        hide_env_values = true,
        global = true
    )]
    pub cmc_api_key: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a cycle now and then on every period, with the status API.
    Run,
    /// Run a single daily cycle for yesterday and exit.
    Once,
    /// Replay provider history for a date range and exit.
    Backfill {
        #[arg(long, value_name = "YYYY-MM-DD")]
        start: NaiveDate,
        #[arg(long, value_name = "YYYY-MM-DD")]
        end: NaiveDate,
        #[arg(long, value_name = "account name", help = "Only backfill this account")]
        account: Option<String>,
    },
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    #[error("backfill start {start} is after end {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub api_slots: usize,
    pub db_slots: usize,
    pub retry: RetryPolicy,
    pub cycle_period: Duration,
    pub http_timeout: Duration,
    pub status_addr: SocketAddr,
    pub log_dir: PathBuf,
    pub cmc_api_key: Option<String>,
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let database_url = args
            .database_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let checks = [
            ("API_SLOTS", args.api_slots as u64),
            ("DB_SLOTS", args.db_slots as u64),
            ("RETRY_ATTEMPTS", u64::from(args.retry_attempts)),
            ("CYCLE_HOURS", args.cycle_hours),
            ("HTTP_TIMEOUT_SECS", args.http_timeout_secs),
        ];
        if let Some((name, _)) = checks.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero(*name));
        }

        Ok(Config {
            database_url,
            api_slots: args.api_slots,
            db_slots: args.db_slots,
            retry: RetryPolicy::new(args.retry_attempts, Duration::from_secs(args.retry_delay_secs)),
            cycle_period: Duration::from_secs(args.cycle_hours * 60 * 60),
            http_timeout: Duration::from_secs(args.http_timeout_secs),
            status_addr: args.status_addr,
            log_dir: args.log_dir.clone(),
            cmc_api_key: args.cmc_api_key.clone().filter(|key| !key.is_empty()),
        })
    }
}

pub fn backfill_range(start: NaiveDate, end: NaiveDate) -> Result<DateRange, ConfigError> {
    DateRange::new(start, end).ok_or(ConfigError::InvertedRange { start, end })
}
