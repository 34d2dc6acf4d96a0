use std::sync::Arc;

use app_database::AppDatabase;
use axum::{routing::get, Extension, Router};
use chrono::Utc;
use clap::Parser;
use config::{backfill_range, Args, Command, Config};
use ingest::{processing_date, CycleReport, IngestPipeline};
use pools::HttpAdapters;
use rate_client::{RateClient, DEFAULT_CMC_URL};
use slots::SlotPools;
use systems::{btc_rate_system::btc_rate_system, hashrate_ingest_system::hashrate_ingest_system};
use tokio::sync::RwLock;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app_database;
mod config;
mod ingest;
mod models;
mod pools;
mod rate_client;
mod reconcile;
mod retry;
mod routes;
mod schema;
mod slots;
mod store;
mod systems;
#[cfg(test)]
mod test_support;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let file_appender = tracing_appender::rolling::daily(&args.log_dir, "hashrate-ingest.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "server_log=info,hashrate_ingest=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    let config = match Config::from_args(&args) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(target: "server_log", "Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    let app_database = Arc::new(AppDatabase::new(config.database_url.clone(), config.db_slots)?);
    if let Err(e) = app_database.ping().await {
        error!(target: "server_log", "Database is unreachable: {}", e);
        return Err(e.into());
    }

    let http_client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .pool_max_idle_per_host(config.api_slots)
        .build()?;

    let slots = SlotPools::new(config.api_slots, config.db_slots);
    info!(target: "server_log", "Slot pools ready: {}={} {}={}", slots.api.name(), slots.api.capacity(), slots.db.name(), slots.db.capacity());

    let pipeline = IngestPipeline::new(
        app_database.clone(),
        app_database.clone(),
        Arc::new(HttpAdapters::new(http_client.clone())),
        slots.clone(),
        config.retry,
    );

    match args.command.clone().unwrap_or(Command::Run) {
        Command::Once => {
            pipeline.run_daily_cycle(processing_date(Utc::now())).await;
            Ok(())
        }
        Command::Backfill {
            start,
            end,
            account,
        } => {
            let range = backfill_range(start, end)?;
            pipeline.run_backfill(range, account).await;
            Ok(())
        }
        Command::Run => {
            let latest_cycle: Arc<RwLock<Option<CycleReport>>> = Arc::new(RwLock::new(None));

            let app_latest_cycle = latest_cycle.clone();
            let cycle_period = config.cycle_period;
            tokio::spawn(async move {
                hashrate_ingest_system(pipeline, cycle_period, app_latest_cycle).await;
            });

            match config.cmc_api_key.clone() {
                Some(api_key) => {
                    let rate_client = RateClient::new(http_client, DEFAULT_CMC_URL.to_string(), api_key);
                    let app_database = app_database.clone();
                    let app_slots = slots.clone();
                    let retry = config.retry;
                    tokio::spawn(async move {
                        btc_rate_system(rate_client, app_database, app_slots, retry, cycle_period).await;
                    });
                }
                None => {
                    info!(target: "server_log", "CMC_API_KEY not set, BTC rate system disabled");
                }
            }

            let app = Router::new()
                .route("/health", get(routes::get_health))
                .route("/cycles/latest", get(routes::get_latest_cycle))
                .route("/slots", get(routes::get_slots))
                .layer(Extension(latest_cycle))
                .layer(Extension(slots))
                // Logging
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::default().include_headers(true)),
                );

            let listener = tokio::net::TcpListener::bind(config.status_addr).await?;
            info!(target: "server_log", "Status API listening on {}", listener.local_addr()?);

            axum::serve(listener, app).await?;
            Ok(())
        }
    }
}
