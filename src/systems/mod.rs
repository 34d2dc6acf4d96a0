pub mod btc_rate_system;
pub mod hashrate_ingest_system;
