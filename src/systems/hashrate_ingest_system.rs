use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{sync::RwLock, time::MissedTickBehavior};

use crate::ingest::{processing_date, CycleReport, IngestPipeline};

/// Runs a daily cycle immediately and then once per `period`. A cycle that
/// overruns its period delays the next one instead of overlapping it.
pub async fn hashrate_ingest_system(
    pipeline: IngestPipeline,
    period: Duration,
    latest_cycle: Arc<RwLock<Option<CycleReport>>>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let hash_date = processing_date(Utc::now());
        let report = pipeline.run_daily_cycle(hash_date).await;
        if report.units_failed > 0 || report.writes_failed > 0 {
            tracing::warn!(target: "server_log", "{} - Cycle for {} finished with {} failed units and {} dropped writes", report.cycle_id, hash_date, report.units_failed, report.writes_failed);
        }
        *latest_cycle.write().await = Some(report);
    }
}
